//! Disk: I/O outcome counters and compaction task admission
//!
//! A disk is shared by every partition resident on it. Counters are atomics
//! and only grow. Compaction admission is the one check-then-insert that
//! must hold a lock, scoped to the disk.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{BlobFileId, Error, PartitionId, Result};
use strata_common::config::DiskConfig;

/// Direction of a data-path operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct IoCounters {
    ops: AtomicU64,
    errors: AtomicU64,
}

/// Disk totals
#[derive(Debug, Default)]
struct DiskStats {
    reads: AtomicU64,
    writes: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
}

/// Point-in-time copy of a disk's totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub compact_tasks: u64,
}

/// Background compaction of one blob file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactTask {
    pub partition_id: PartitionId,
    pub blob_file_id: BlobFileId,
    pub is_leader: bool,
}

impl CompactTask {
    #[must_use]
    pub const fn new(partition_id: PartitionId, blob_file_id: BlobFileId, is_leader: bool) -> Self {
        Self {
            partition_id,
            blob_file_id,
            is_leader,
        }
    }

    /// Identity used for deduplication; the leader flag is not part of it
    #[must_use]
    pub fn key(&self) -> String {
        format!("dp({})_blobfile({})", self.partition_id, self.blob_file_id)
    }
}

impl std::fmt::Display for CompactTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} leader({})", self.key(), self.is_leader)
    }
}

/// Result of a successful admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactAdmission {
    Admitted,
    /// A task with the same identity is already in flight
    AlreadyAdmitted,
}

#[derive(Debug, Default)]
struct CompactQueue {
    admitted: HashMap<String, CompactTask>,
    pending: VecDeque<String>,
}

/// A disk hosting partitions
#[derive(Debug)]
pub struct Disk {
    path: PathBuf,
    capacity: u64,
    max_compact_tasks: usize,
    counters: DashMap<(PartitionId, IoDirection), Arc<IoCounters>>,
    stats: DiskStats,
    compact: Mutex<CompactQueue>,
}

impl Disk {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, capacity: u64, max_compact_tasks: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
            max_compact_tasks,
            counters: DashMap::new(),
            stats: DiskStats::default(),
            compact: Mutex::new(CompactQueue::default()),
        }
    }

    #[must_use]
    pub fn from_config(config: &DiskConfig) -> Self {
        Self::new(&config.path, config.capacity, config.max_compact_tasks)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Record the outcome of one operation for a partition.
    ///
    /// Every outcome counts as an operation; only disk-class failures count
    /// as errors.
    pub fn record_io(&self, partition_id: PartitionId, direction: IoDirection, err: Option<&Error>) {
        let counters = self
            .counters
            .entry((partition_id, direction))
            .or_default()
            .clone();
        counters.ops.fetch_add(1, Ordering::Relaxed);
        let (ops, errors) = match direction {
            IoDirection::Read => (&self.stats.reads, &self.stats.read_errors),
            IoDirection::Write => (&self.stats.writes, &self.stats.write_errors),
        };
        ops.fetch_add(1, Ordering::Relaxed);

        if let Some(err) = err.filter(|e| e.is_disk_error()) {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                disk = %self.path.display(),
                partition_id,
                ?direction,
                error = %err,
                "disk I/O error"
            );
        }
    }

    #[must_use]
    pub fn error_count(&self, partition_id: PartitionId, direction: IoDirection) -> u64 {
        self.counters
            .get(&(partition_id, direction))
            .map_or(0, |c| c.errors.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn op_count(&self, partition_id: PartitionId, direction: IoDirection) -> u64 {
        self.counters
            .get(&(partition_id, direction))
            .map_or(0, |c| c.ops.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn stats(&self) -> DiskStatsSnapshot {
        DiskStatsSnapshot {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            read_errors: self.stats.read_errors.load(Ordering::Relaxed),
            write_errors: self.stats.write_errors.load(Ordering::Relaxed),
            compact_tasks: self.compact.lock().admitted.len() as u64,
        }
    }

    /// Admit a compaction task unless one with the same identity is in
    /// flight. Check and insert happen under one lock.
    pub fn admit_compact_task(&self, task: CompactTask) -> Result<CompactAdmission> {
        let key = task.key();
        let mut queue = self.compact.lock();
        if queue.admitted.contains_key(&key) {
            return Ok(CompactAdmission::AlreadyAdmitted);
        }
        if queue.admitted.len() >= self.max_compact_tasks {
            return Err(Error::QueueFull(format!(
                "disk {} has {} compaction tasks admitted",
                self.path.display(),
                queue.admitted.len()
            )));
        }
        queue.pending.push_back(key.clone());
        queue.admitted.insert(key, task);
        Ok(CompactAdmission::Admitted)
    }

    #[must_use]
    pub fn has_compact_task(&self, key: &str) -> bool {
        self.compact.lock().admitted.contains_key(key)
    }

    #[must_use]
    pub fn compact_task_count(&self) -> usize {
        self.compact.lock().admitted.len()
    }

    /// Next admitted task not yet picked up by the worker. The task stays
    /// admitted until `finish_compact_task`.
    pub fn next_compact_task(&self) -> Option<CompactTask> {
        let mut queue = self.compact.lock();
        while let Some(key) = queue.pending.pop_front() {
            if let Some(task) = queue.admitted.get(&key) {
                return Some(task.clone());
            }
        }
        None
    }

    /// Release a task so a later notify can admit it again
    pub fn finish_compact_task(&self, task: &CompactTask) {
        self.compact.lock().admitted.remove(&task.key());
    }
}
