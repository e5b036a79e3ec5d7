//! Partition space: the node's disks and the partitions placed on them

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_common::config::StorageConfig;
use strata_common::{Error, PartitionId, Result, StoreMode};
use tracing::info;

use crate::disk::Disk;
use crate::memory::{MemBlobStore, MemExtentStore};
use crate::partition::{Partition, PartitionStore};

/// Opens the engine for a new partition
pub trait EngineFactory: Send + Sync {
    fn open(&self, mode: StoreMode, disk: &Disk, partition_id: PartitionId) -> Result<PartitionStore>;
}

/// Factory producing in-memory engines
#[derive(Debug, Clone)]
pub struct MemoryEngineFactory {
    pub active_window: Duration,
}

impl Default for MemoryEngineFactory {
    fn default() -> Self {
        Self {
            active_window: Duration::from_secs(10),
        }
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn open(&self, mode: StoreMode, _disk: &Disk, _partition_id: PartitionId) -> Result<PartitionStore> {
        Ok(match mode {
            StoreMode::Extent => {
                PartitionStore::Extent(Arc::new(MemExtentStore::new(self.active_window)))
            }
            StoreMode::Blob => PartitionStore::Blob(Arc::new(MemBlobStore::new())),
        })
    }
}

/// Aggregate usage reported in heartbeats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpaceUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub partition_count: u32,
}

pub struct PartitionSpace {
    disks: HashMap<PathBuf, Arc<Disk>>,
    partitions: RwLock<HashMap<PartitionId, Arc<Partition>>>,
    factory: Arc<dyn EngineFactory>,
}

impl PartitionSpace {
    pub fn new(disks: Vec<Arc<Disk>>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            disks: disks
                .into_iter()
                .map(|d| (d.path().to_path_buf(), d))
                .collect(),
            partitions: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Space over the configured disks with in-memory engines
    pub fn from_config(config: &StorageConfig) -> Self {
        let disks = config
            .disks
            .iter()
            .map(|d| Arc::new(Disk::from_config(d)))
            .collect();
        Self::new(disks, Arc::new(MemoryEngineFactory::default()))
    }

    /// Create a partition, or return the existing one with the same id.
    ///
    /// The partition goes to the disk with the most unallocated capacity.
    pub fn create_partition(
        &self,
        volume_id: &str,
        partition_id: PartitionId,
        size: u64,
        partition_type: &str,
    ) -> Result<Arc<Partition>> {
        let mode = StoreMode::from_partition_type(partition_type)?;
        let mut partitions = self.partitions.write();
        if let Some(existing) = partitions.get(&partition_id) {
            return Ok(Arc::clone(existing));
        }

        let allocated = |disk: &Disk| -> u64 {
            partitions
                .values()
                .filter(|p| p.disk().path() == disk.path())
                .map(|p| p.size())
                .sum()
        };
        let (disk, free) = self
            .disks
            .values()
            .map(|d| (d, d.capacity().saturating_sub(allocated(d))))
            .max_by_key(|(_, free)| *free)
            .ok_or_else(|| Error::storage("no disks configured"))?;
        if free < size {
            return Err(Error::NoSpace(partition_id));
        }

        let store = self.factory.open(mode, disk, partition_id)?;
        let partition = Arc::new(Partition::new(
            partition_id,
            volume_id,
            size,
            Arc::clone(disk),
            store,
        ));
        partitions.insert(partition_id, Arc::clone(&partition));
        info!(
            partition_id,
            volume_id,
            size,
            %mode,
            disk = %disk.path().display(),
            "partition created"
        );
        Ok(partition)
    }

    /// Remove a partition; unknown ids are ignored
    pub fn delete_partition(&self, partition_id: PartitionId) -> Option<Arc<Partition>> {
        let removed = self.partitions.write().remove(&partition_id);
        if removed.is_some() {
            info!(partition_id, "partition deleted");
        }
        removed
    }

    pub fn get_partition(&self, partition_id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions.read().get(&partition_id).cloned()
    }

    pub fn partitions(&self) -> Vec<Arc<Partition>> {
        let mut list: Vec<_> = self.partitions.read().values().cloned().collect();
        list.sort_by_key(|p| p.id());
        list
    }

    pub fn get_disk(&self, path: &Path) -> Result<Arc<Disk>> {
        self.disks
            .get(path)
            .cloned()
            .ok_or_else(|| Error::DiskNotFound(path.display().to_string()))
    }

    pub fn disks(&self) -> Vec<Arc<Disk>> {
        self.disks.values().cloned().collect()
    }

    pub fn usage(&self) -> SpaceUsage {
        let total = self.disks.values().map(|d| d.capacity()).sum();
        let partitions = self.partitions.read();
        let used = partitions.values().map(|p| p.used()).sum();
        SpaceUsage {
            total,
            used,
            available: u64::saturating_sub(total, used),
            partition_count: partitions.len() as u32,
        }
    }
}
