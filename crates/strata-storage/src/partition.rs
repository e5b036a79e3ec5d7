//! Partition: one replica shard on a disk
//!
//! A partition is shared by every request addressing it and does no locking
//! of its own around engine calls.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strata_common::{FileInfo, PartitionId, PartitionStatus, Result, StoreMode, unix_now};

use crate::disk::Disk;
use crate::store::{BlobStore, ExtentStore, FileStore};

/// The engine backing a partition, tagged by store mode
#[derive(Clone)]
pub enum PartitionStore {
    Extent(Arc<dyn ExtentStore>),
    Blob(Arc<dyn BlobStore>),
}

impl PartitionStore {
    #[must_use]
    pub const fn mode(&self) -> StoreMode {
        match self {
            Self::Extent(_) => StoreMode::Extent,
            Self::Blob(_) => StoreMode::Blob,
        }
    }

    /// Operations common to both engines
    #[must_use]
    pub fn files(&self) -> &dyn FileStore {
        match self {
            Self::Extent(store) => store.as_ref(),
            Self::Blob(store) => store.as_ref(),
        }
    }
}

impl std::fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PartitionStore({})", self.mode())
    }
}

/// Live runtime counters of a partition
#[derive(Debug, Default)]
pub struct PartitionMetrics {
    read_ops: AtomicU64,
    read_bytes: AtomicU64,
    read_errors: AtomicU64,
    read_latency_us: AtomicU64,
    write_ops: AtomicU64,
    write_bytes: AtomicU64,
    write_errors: AtomicU64,
    write_latency_us: AtomicU64,
}

/// Serialized form returned by the metrics query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionMetricsSnapshot {
    pub partition_id: PartitionId,
    pub read_ops: u64,
    pub read_bytes: u64,
    pub read_errors: u64,
    pub avg_read_latency_us: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
    pub write_errors: u64,
    pub avg_write_latency_us: u64,
}

impl PartitionMetrics {
    pub fn record_read(&self, bytes: u64, elapsed: Duration, ok: bool) {
        Self::record(
            [&self.read_ops, &self.read_bytes, &self.read_errors, &self.read_latency_us],
            bytes,
            elapsed,
            ok,
        );
    }

    pub fn record_write(&self, bytes: u64, elapsed: Duration, ok: bool) {
        Self::record(
            [&self.write_ops, &self.write_bytes, &self.write_errors, &self.write_latency_us],
            bytes,
            elapsed,
            ok,
        );
    }

    fn record([ops, total, errors, latency]: [&AtomicU64; 4], bytes: u64, elapsed: Duration, ok: bool) {
        ops.fetch_add(1, Ordering::Relaxed);
        latency.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if ok {
            total.fetch_add(bytes, Ordering::Relaxed);
        } else {
            errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self, partition_id: PartitionId) -> PartitionMetricsSnapshot {
        let read_ops = self.read_ops.load(Ordering::Relaxed);
        let write_ops = self.write_ops.load(Ordering::Relaxed);
        PartitionMetricsSnapshot {
            partition_id,
            read_ops,
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            avg_read_latency_us: self.read_latency_us.load(Ordering::Relaxed) / read_ops.max(1),
            write_ops,
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            avg_write_latency_us: self.write_latency_us.load(Ordering::Relaxed) / write_ops.max(1),
        }
    }
}

/// Result of a partition load: status, usage and every file watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub status: PartitionStatus,
    pub used: u64,
    pub files: Vec<FileInfo>,
}

#[derive(Debug)]
pub struct Partition {
    id: PartitionId,
    volume_id: String,
    size: u64,
    status: RwLock<PartitionStatus>,
    disk: Arc<Disk>,
    store: PartitionStore,
    metrics: PartitionMetrics,
    created_at: u64,
}

impl Partition {
    #[must_use]
    pub fn new(
        id: PartitionId,
        volume_id: impl Into<String>,
        size: u64,
        disk: Arc<Disk>,
        store: PartitionStore,
    ) -> Self {
        Self {
            id,
            volume_id: volume_id.into(),
            size,
            status: RwLock::new(PartitionStatus::ReadWrite),
            disk,
            store,
            metrics: PartitionMetrics::default(),
            created_at: unix_now(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> PartitionId {
        self.id
    }

    #[must_use]
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// Configured capacity in bytes
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn status(&self) -> PartitionStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: PartitionStatus) {
        let mut current = self.status.write();
        if *current != status {
            tracing::info!(partition_id = self.id, from = %*current, to = %status, "partition status changed");
            *current = status;
        }
    }

    #[must_use]
    pub const fn mode(&self) -> StoreMode {
        self.store.mode()
    }

    #[must_use]
    pub const fn store(&self) -> &PartitionStore {
        &self.store
    }

    #[must_use]
    pub const fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    #[must_use]
    pub const fn metrics(&self) -> &PartitionMetrics {
        &self.metrics
    }

    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.store.files().used_bytes()
    }

    /// Remaining capacity; zero or negative means full
    #[must_use]
    pub fn available(&self) -> i64 {
        self.size as i64 - self.used() as i64
    }

    /// Status, usage and all file watermarks for the master
    pub fn load(&self) -> Result<PartitionSnapshot> {
        let files = match &self.store {
            PartitionStore::Extent(store) => store.all_watermarks(false)?,
            PartitionStore::Blob(store) => store.all_watermarks()?,
        };
        Ok(PartitionSnapshot {
            status: self.status(),
            used: self.used(),
            files,
        })
    }
}
