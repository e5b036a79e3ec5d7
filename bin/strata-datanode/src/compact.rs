//! Blob-file compaction: notify admission and the background worker

use std::sync::Arc;
use std::time::Duration;
use strata_common::Result;
use strata_proto::Packet;
use strata_storage::{CompactAdmission, CompactTask, Disk, PartitionSpace, PartitionStore};
use tracing::{debug, error, info, warn};

use crate::dispatch::reply;
use crate::gate::blob_file_id;
use crate::node::DataNode;

impl DataNode {
    pub(crate) async fn handle_notify_compact(&self, pkt: &mut Packet) {
        let result = self.admit_compact(pkt);
        reply(pkt, "NotifyCompactBlobFile", result);
    }

    fn admit_compact(&self, pkt: &Packet) -> Result<()> {
        let dp = self.partition(pkt.partition_id)?;
        let disk = self.space().get_disk(dp.disk().path())?;
        let task = CompactTask::new(dp.id(), blob_file_id(pkt.file_id)?, false);
        match disk.admit_compact_task(task)? {
            CompactAdmission::Admitted => {
                info!(
                    partition_id = dp.id(),
                    blob_file_id = pkt.file_id,
                    disk = %disk.path().display(),
                    "compaction task admitted"
                );
            }
            CompactAdmission::AlreadyAdmitted => {
                debug!(
                    partition_id = dp.id(),
                    blob_file_id = pkt.file_id,
                    "compaction task already admitted"
                );
            }
        }
        Ok(())
    }
}

/// Periodic worker draining each disk's admitted compaction tasks
pub struct Compactor {
    space: Arc<PartitionSpace>,
}

impl Compactor {
    pub fn new(space: Arc<PartitionSpace>) -> Self {
        Self { space }
    }

    /// Run every admitted task once; returns the bytes reclaimed
    pub fn run_once(&self) -> u64 {
        let mut reclaimed = 0;
        for disk in self.space.disks() {
            while let Some(task) = disk.next_compact_task() {
                reclaimed += self.compact(&disk, &task);
                disk.finish_compact_task(&task);
            }
        }
        reclaimed
    }

    fn compact(&self, disk: &Disk, task: &CompactTask) -> u64 {
        let Some(dp) = self.space.get_partition(task.partition_id) else {
            warn!(task = %task, "partition gone before compaction");
            return 0;
        };
        let PartitionStore::Blob(store) = dp.store() else {
            warn!(task = %task, mode = %dp.mode(), "compaction requested for non-blob partition");
            return 0;
        };
        match store.compact(task.blob_file_id) {
            Ok(bytes) => {
                info!(
                    task = %task,
                    disk = %disk.path().display(),
                    reclaimed = bytes,
                    "blob file compacted"
                );
                bytes
            }
            Err(err) => {
                error!(task = %task, "compaction failed: {err}");
                0
            }
        }
    }

    /// Drain tasks every `interval` until the task is aborted
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reclaimed = self.run_once();
            if reclaimed > 0 {
                debug!(reclaimed, "compaction pass finished");
            }
        }
    }
}
