//! Shared fixtures for handler tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strata_client::MasterClient;
use strata_common::config::DiskConfig;
use strata_common::{
    DataNodeConfig, Error, FileInfo, MemberFileMetas, PartitionId, Result, StoreMode,
};
use strata_proto::{Opcode, Packet};
use strata_storage::{
    Disk, EngineFactory, ExtentStore, FileStore, MemExtentStore, MemoryEngineFactory, Partition,
    PartitionSpace, PartitionStore,
};
use tokio::sync::mpsc;

use crate::conn::PacketConn;
use crate::node::DataNode;

pub(crate) fn request(opcode: Opcode, mode: StoreMode, partition_id: u32, file_id: u64) -> Packet {
    Packet::new_request(opcode, mode, partition_id, file_id)
}

/// Connection that records every frame sent on it
pub(crate) struct RecordingConn {
    frames: Vec<Packet>,
    fail_after: Option<usize>,
    closed: bool,
}

impl RecordingConn {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            fail_after: None,
            closed: false,
        }
    }

    /// Accept `n` frames, then fail every send
    pub(crate) fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    pub(crate) fn frames(&self) -> &[Packet] {
        &self.frames
    }
}

#[async_trait]
impl PacketConn for RecordingConn {
    fn peer_addr(&self) -> &str {
        "test-peer"
    }

    async fn send(&mut self, pkt: &Packet) -> Result<()> {
        if self.closed || self.fail_after.is_some_and(|n| self.frames.len() >= n) {
            return Err(Error::Transport("peer hung up".into()));
        }
        self.frames.push(pkt.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Master that hands posted bodies to the test
pub(crate) struct RecordingMaster {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    nodes: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingMaster {
    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MasterClient for RecordingMaster {
    async fn post_task_response(&self, body: Vec<u8>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("master unreachable".into()));
        }
        self.tx
            .send(body)
            .map_err(|_| Error::Transport("receiver dropped".into()))
    }

    fn add_node(&self, addr: &str) {
        let mut nodes = self.nodes.lock();
        if !nodes.iter().any(|n| n == addr) {
            nodes.push(addr.to_string());
        }
    }

    fn nodes(&self) -> Vec<String> {
        self.nodes.lock().clone()
    }
}

/// Extent engine whose reads fail past a configurable offset
pub(crate) struct FaultyExtentStore {
    inner: MemExtentStore,
    fail_from: AtomicU64,
}

impl FaultyExtentStore {
    fn new() -> Self {
        Self {
            inner: MemExtentStore::default(),
            fail_from: AtomicU64::new(u64::MAX),
        }
    }

    /// Reads reaching past `offset` fail with an I/O error
    pub(crate) fn fail_reads_from(&self, offset: u64) {
        self.fail_from.store(offset, Ordering::SeqCst);
    }
}

impl FileStore for FaultyExtentStore {
    fn write(&self, file_id: u64, offset: u64, size: u32, data: &[u8], crc: u32) -> Result<()> {
        self.inner.write(file_id, offset, size, data, crc)
    }

    fn read(&self, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<u32> {
        self.inner.watermark(file_id)?;
        if offset + buf.len() as u64 > self.fail_from.load(Ordering::SeqCst) {
            return Err(Error::DiskIo(std::io::Error::other("injected read fault")));
        }
        self.inner.read(file_id, offset, buf)
    }

    fn watermark(&self, file_id: u64) -> Result<FileInfo> {
        self.inner.watermark(file_id)
    }

    fn used_bytes(&self) -> u64 {
        self.inner.used_bytes()
    }
}

impl ExtentStore for FaultyExtentStore {
    fn create(&self, extent_id: u64, inode: u64, overwrite: bool) -> Result<()> {
        self.inner.create(extent_id, inode, overwrite)
    }

    fn delete_extent(&self, extent_id: u64) -> Result<()> {
        self.inner.delete_extent(extent_id)
    }

    fn all_watermarks(&self, stable_only: bool) -> Result<Vec<FileInfo>> {
        self.inner.all_watermarks(stable_only)
    }

    fn merge_repair(&self, metas: &MemberFileMetas) -> Result<()> {
        self.inner.merge_repair(metas)
    }
}

/// Memory engines, except that registered partitions get the faulty store
struct FaultyFactory {
    memory: MemoryEngineFactory,
    faults: Arc<FaultyExtentStore>,
    faulty: Mutex<HashSet<PartitionId>>,
}

impl EngineFactory for FaultyFactory {
    fn open(&self, mode: StoreMode, disk: &Disk, partition_id: PartitionId) -> Result<PartitionStore> {
        if mode == StoreMode::Extent && self.faulty.lock().contains(&partition_id) {
            return Ok(PartitionStore::Extent(Arc::clone(&self.faults) as Arc<dyn ExtentStore>));
        }
        self.memory.open(mode, disk, partition_id)
    }
}

/// A node over one 1 GiB in-memory disk at `/d1`, cluster id `test`
pub(crate) struct TestNode {
    pub(crate) node: DataNode,
    pub(crate) master: Arc<RecordingMaster>,
    pub(crate) master_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) faults: Arc<FaultyExtentStore>,
    factory: Arc<FaultyFactory>,
}

impl TestNode {
    pub(crate) fn new(block_size: usize) -> Self {
        let mut config = DataNodeConfig::default();
        config.node.cluster_id = "test".into();
        config.storage.block_size = block_size;
        config.storage.pool_capacity = 8;
        config.storage.repair_queue_depth = 4;
        config.storage.disks = vec![DiskConfig {
            path: "/d1".into(),
            capacity: 1 << 30,
            max_compact_tasks: 4,
        }];

        let faults = Arc::new(FaultyExtentStore::new());
        let factory = Arc::new(FaultyFactory {
            memory: MemoryEngineFactory::default(),
            faults: Arc::clone(&faults),
            faulty: Mutex::new(HashSet::new()),
        });
        let disks = config
            .storage
            .disks
            .iter()
            .map(|d| Arc::new(Disk::from_config(d)))
            .collect();
        let space = Arc::new(PartitionSpace::new(
            disks,
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
        ));

        let (tx, master_rx) = mpsc::unbounded_channel();
        let master = Arc::new(RecordingMaster {
            tx,
            nodes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let node = DataNode::new(
            &config,
            space,
            Arc::clone(&master) as Arc<dyn MasterClient>,
        );
        Self {
            node,
            master,
            master_rx,
            faults,
            factory,
        }
    }

    pub(crate) fn extent_partition(&self, partition_id: PartitionId, size: u64) -> Arc<Partition> {
        self.create(partition_id, size, "extent")
    }

    pub(crate) fn blob_partition(&self, partition_id: PartitionId, size: u64) -> Arc<Partition> {
        self.create(partition_id, size, "blob")
    }

    /// Extent partition backed by `self.faults`
    pub(crate) fn faulty_extent_partition(&self, partition_id: PartitionId, size: u64) -> Arc<Partition> {
        self.factory.faulty.lock().insert(partition_id);
        self.extent_partition(partition_id, size)
    }

    fn create(&self, partition_id: PartitionId, size: u64, partition_type: &str) -> Arc<Partition> {
        self.node
            .space()
            .create_partition("vol", partition_id, size, partition_type)
            .unwrap()
    }
}
