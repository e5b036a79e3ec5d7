//! Strata Storage - Partition and store-engine layer
//!
//! This crate provides:
//! - Store-engine contracts for extent and blob partitions
//! - In-memory reference engines
//! - Disks with I/O error counters and compaction task admission
//! - Partitions and the node-wide partition space

pub mod disk;
pub mod memory;
pub mod partition;
pub mod space;
pub mod store;

pub use disk::{CompactAdmission, CompactTask, Disk, DiskStatsSnapshot, IoDirection};
pub use memory::{MemBlobStore, MemExtentStore};
pub use partition::{Partition, PartitionMetrics, PartitionMetricsSnapshot, PartitionSnapshot, PartitionStore};
pub use space::{EngineFactory, MemoryEngineFactory, PartitionSpace, SpaceUsage};
pub use store::{BlobObject, BlobStore, ExtentStore, FileStore};
