//! DataNode: shared state of the request-processing core

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_client::MasterClient;
use strata_common::{BufferPool, DataNodeConfig, Error, PartitionId, Result, StoreMode};
use strata_proto::Packet;
use strata_storage::{BlobStore, ExtentStore, Partition, PartitionSpace, PartitionStore};
use tokio::task::JoinSet;
use tracing::warn;

use crate::dispatch::HandlerTable;
use crate::metrics::OpMetrics;
use crate::repair::RepairWorker;

pub struct DataNode {
    cluster_id: String,
    rack: String,
    space: Arc<PartitionSpace>,
    pool: Arc<BufferPool>,
    master: Arc<dyn MasterClient>,
    metrics: Arc<OpMetrics>,
    repair: RepairWorker,
    /// Master reports still being posted
    reports: Mutex<JoinSet<()>>,
    pub(crate) handlers: HandlerTable,
}

impl DataNode {
    /// Build a node over `space`. Starts the repair worker, so this must run
    /// inside a tokio runtime.
    pub fn new(
        config: &DataNodeConfig,
        space: Arc<PartitionSpace>,
        master: Arc<dyn MasterClient>,
    ) -> Self {
        let storage = &config.storage;
        Self {
            cluster_id: config.node.cluster_id.clone(),
            rack: config.node.rack.clone(),
            space,
            pool: Arc::new(BufferPool::new(storage.block_size, storage.pool_capacity)),
            master,
            metrics: Arc::new(OpMetrics::new(config.node.cluster_id.clone())),
            repair: RepairWorker::spawn(storage.repair_queue_depth),
            reports: Mutex::new(JoinSet::new()),
            handlers: HandlerTable::new(),
        }
    }

    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    #[must_use]
    pub fn rack(&self) -> &str {
        &self.rack
    }

    #[must_use]
    pub fn space(&self) -> &Arc<PartitionSpace> {
        &self.space
    }

    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[must_use]
    pub fn master(&self) -> &Arc<dyn MasterClient> {
        &self.master
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<OpMetrics> {
        &self.metrics
    }

    #[must_use]
    pub const fn repair(&self) -> &RepairWorker {
        &self.repair
    }

    /// Run a master report in the background, tracked until shutdown
    pub(crate) fn spawn_report<F>(&self, report: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut reports = self.reports.lock();
        while reports.try_join_next().is_some() {}
        reports.spawn(report);
    }

    /// Wait up to `timeout` for in-flight master reports; the rest are
    /// aborted. Returns how many were aborted.
    pub async fn drain_reports(&self, timeout: Duration) -> usize {
        let mut reports = std::mem::take(&mut *self.reports.lock());
        let finished = tokio::time::timeout(timeout, async {
            while reports.join_next().await.is_some() {}
        })
        .await;
        if finished.is_ok() {
            return 0;
        }
        let pending = reports.len();
        warn!(pending, "master reports still in flight at shutdown, aborting");
        reports.abort_all();
        pending
    }

    pub(crate) fn partition(&self, partition_id: PartitionId) -> Result<Arc<Partition>> {
        self.space
            .get_partition(partition_id)
            .ok_or(Error::PartitionNotFound(partition_id))
    }

    /// Partition named by the packet, whose mode must match the packet's
    pub(crate) fn packet_partition(&self, pkt: &Packet) -> Result<Arc<Partition>> {
        let dp = self.partition(pkt.partition_id)?;
        let mode = pkt.store_mode()?;
        if mode != dp.mode() {
            return Err(Error::StoreTypeMismatch(format!(
                "request for {mode} store but partition {} is {}",
                dp.id(),
                dp.mode()
            )));
        }
        Ok(dp)
    }

    /// Extent partition named by the packet, with its engine
    pub(crate) fn extent_partition(
        &self,
        pkt: &Packet,
    ) -> Result<(Arc<Partition>, Arc<dyn ExtentStore>)> {
        let dp = self.partition(pkt.partition_id)?;
        match dp.store() {
            PartitionStore::Extent(store) => {
                let store = Arc::clone(store);
                Ok((dp, store))
            }
            PartitionStore::Blob(_) => Err(mode_mismatch(pkt, &dp, StoreMode::Extent)),
        }
    }

    /// Blob partition named by the packet, with its engine
    pub(crate) fn blob_partition(&self, pkt: &Packet) -> Result<(Arc<Partition>, Arc<dyn BlobStore>)> {
        let dp = self.partition(pkt.partition_id)?;
        match dp.store() {
            PartitionStore::Blob(store) => {
                let store = Arc::clone(store);
                Ok((dp, store))
            }
            PartitionStore::Extent(_) => Err(mode_mismatch(pkt, &dp, StoreMode::Blob)),
        }
    }
}

fn mode_mismatch(pkt: &Packet, dp: &Partition, wanted: StoreMode) -> Error {
    Error::StoreTypeMismatch(format!(
        "{} only supports {wanted} partitions, partition {} is {}",
        pkt.op_name(),
        dp.id(),
        dp.mode()
    ))
}
