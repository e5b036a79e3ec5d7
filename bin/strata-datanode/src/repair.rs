//! Replica repair
//!
//! Two halves:
//! - repair notifications carry a peer's file-level state; the merge is
//!   queued on a background worker and the notifier is answered at once.
//! - the blob-file repair read streams a range of objects to a lagging peer,
//!   but only when this replica holds the whole requested range.

use bytes::{Buf, BufMut, BytesMut};
use strata_common::{
    BlobFileId, Error, MemberFileMetas, PartitionId, RepairBlobFileTask, Result, StoreMode,
};
use strata_proto::{Opcode, Packet};
use strata_storage::{BlobObject, PartitionStore};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::conn::PacketConn;
use crate::dispatch::{fail, reply};
use crate::node::DataNode;

/// Encoded size of a record header: oid, size, crc, flags
const RECORD_HEADER_SIZE: usize = 8 + 4 + 4 + 1;

const FLAG_DELETED: u8 = 0x01;

/// Capacity of the outcome broadcast channel
const OUTCOME_BUFFER: usize = 64;

/// A queued reconciliation against one partition's engine
pub struct RepairJob {
    pub partition_id: PartitionId,
    pub store: PartitionStore,
    pub metas: MemberFileMetas,
}

impl RepairJob {
    fn merge(&self) -> Result<()> {
        match &self.store {
            PartitionStore::Extent(store) => store.merge_repair(&self.metas),
            PartitionStore::Blob(store) => store.merge_repair(&self.metas),
        }
    }
}

/// Completion of a repair merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub partition_id: PartitionId,
    pub mode: StoreMode,
    /// Error text of a failed merge
    pub error: Option<String>,
}

/// Background worker applying repair merges one at a time
pub struct RepairWorker {
    jobs: mpsc::Sender<RepairJob>,
    outcomes: broadcast::Sender<RepairOutcome>,
}

impl RepairWorker {
    /// Start the worker with room for `depth` pending jobs
    pub fn spawn(depth: usize) -> Self {
        let (jobs, rx) = mpsc::channel(depth.max(1));
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);
        tokio::spawn(Self::run(rx, outcomes.clone()));
        Self { jobs, outcomes }
    }

    async fn run(mut rx: mpsc::Receiver<RepairJob>, outcomes: broadcast::Sender<RepairOutcome>) {
        while let Some(job) = rx.recv().await {
            let partition_id = job.partition_id;
            let mode = job.store.mode();
            let result = match tokio::task::spawn_blocking(move || job.merge()).await {
                Ok(result) => result,
                Err(e) => Err(Error::internal(format!("repair merge task failed: {e}"))),
            };
            let error = match result {
                Ok(()) => {
                    info!(partition_id, %mode, "repair merge applied");
                    None
                }
                Err(err) => {
                    error!(partition_id, %mode, "repair merge failed: {err}");
                    Some(err.to_string())
                }
            };
            // no subscribers is fine
            let _ = outcomes.send(RepairOutcome {
                partition_id,
                mode,
                error,
            });
        }
        debug!("repair worker stopped");
    }

    /// Queue a job without waiting; a full queue is refused
    pub fn submit(&self, job: RepairJob) -> Result<()> {
        match self.jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => Err(Error::QueueFull(format!(
                "repair queue full, dropping merge for partition {}",
                job.partition_id
            ))),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::internal("repair worker stopped"))
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepairOutcome> {
        self.outcomes.subscribe()
    }
}

/// One object carried in a repair frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRecord {
    pub oid: u64,
    pub size: u32,
    pub crc: u32,
    pub deleted: bool,
    pub data: Vec<u8>,
}

fn put_record(buf: &mut BytesMut, object: &BlobObject) {
    buf.put_u64(object.oid);
    buf.put_u32(object.data.len() as u32);
    buf.put_u32(object.crc);
    buf.put_u8(if object.deleted { FLAG_DELETED } else { 0 });
    buf.put_slice(&object.data);
}

/// Pack objects into frame payloads of at most `max_frame` bytes. A record
/// larger than `max_frame` travels alone. Each payload is paired with the
/// oid of its first record.
fn encode_repair_frames(objects: &[BlobObject], max_frame: usize) -> Vec<(u64, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut current = BytesMut::new();
    let mut first_oid = 0;
    for object in objects {
        let len = RECORD_HEADER_SIZE + object.data.len();
        if !current.is_empty() && current.len() + len > max_frame {
            frames.push((first_oid, current.split().to_vec()));
        }
        if current.is_empty() {
            first_oid = object.oid;
        }
        put_record(&mut current, object);
    }
    if !current.is_empty() {
        frames.push((first_oid, current.to_vec()));
    }
    frames
}

/// Parse the records of one repair frame payload
pub fn decode_repair_frame(mut payload: &[u8]) -> Result<Vec<RepairRecord>> {
    let mut records = Vec::new();
    while payload.has_remaining() {
        if payload.remaining() < RECORD_HEADER_SIZE {
            return Err(Error::Decode(format!(
                "truncated repair record header: {} bytes",
                payload.remaining()
            )));
        }
        let oid = payload.get_u64();
        let size = payload.get_u32();
        let crc = payload.get_u32();
        let flags = payload.get_u8();
        if payload.remaining() < size as usize {
            return Err(Error::Decode(format!(
                "repair record {oid} claims {size} bytes, {} left",
                payload.remaining()
            )));
        }
        let data = payload[..size as usize].to_vec();
        payload.advance(size as usize);
        records.push(RepairRecord {
            oid,
            size,
            crc,
            deleted: flags & FLAG_DELETED != 0,
            data,
        });
    }
    Ok(records)
}

impl DataNode {
    pub(crate) async fn handle_notify_extent_repair(&self, pkt: &mut Packet) {
        let result = self.submit_repair(pkt, StoreMode::Extent);
        reply(pkt, "NotifyExtentRepair", result);
    }

    pub(crate) async fn handle_notify_blob_repair(&self, pkt: &mut Packet) {
        let result = self.submit_repair(pkt, StoreMode::Blob);
        reply(pkt, "NotifyBlobRepair", result);
    }

    fn submit_repair(&self, pkt: &Packet, mode: StoreMode) -> Result<()> {
        let metas: MemberFileMetas = serde_json::from_slice(pkt.payload())?;
        let (partition_id, store) = match mode {
            StoreMode::Extent => {
                let (dp, store) = self.extent_partition(pkt)?;
                (dp.id(), PartitionStore::Extent(store))
            }
            StoreMode::Blob => {
                let (dp, store) = self.blob_partition(pkt)?;
                (dp.id(), PartitionStore::Blob(store))
            }
        };
        debug!(
            partition_id,
            %mode,
            add = metas.need_add.len(),
            fix = metas.need_fix_size.len(),
            delete = metas.need_delete.len(),
            "repair merge queued"
        );
        self.repair().submit(RepairJob {
            partition_id,
            store,
            metas,
        })
    }

    pub(crate) async fn handle_blob_file_repair_read(
        &self,
        pkt: &mut Packet,
        conn: &mut dyn PacketConn,
    ) {
        match self.serve_repair_read(pkt, conn).await {
            Ok(()) => pkt.pack_ok_reply(),
            Err(err) => fail(pkt, "BlobFileRepairRead", &err),
        }
    }

    async fn serve_repair_read(&self, pkt: &Packet, conn: &mut dyn PacketConn) -> Result<()> {
        let task: RepairBlobFileTask = serde_json::from_slice(pkt.payload())?;
        let (dp, store) = self.blob_partition(pkt)?;
        let local_oid = store.last_oid(task.blob_file_id)?;
        warn!(
            partition_id = dp.id(),
            %task,
            local_oid,
            peer = conn.peer_addr(),
            "blob file repair read"
        );
        if local_oid < task.end_obj {
            return Err(insufficient(&task, local_oid));
        }

        let objects = store.read_objects(task.blob_file_id, task.start_obj, local_oid)?;
        let frames = encode_repair_frames(&objects, self.pool().block_size());
        for (first_oid, payload) in frames {
            let frame = repair_frame(pkt, task.blob_file_id, first_oid, payload);
            if let Err(err) = conn.send(&frame).await {
                error!(
                    req = %frame.unique_log_id(),
                    peer = conn.peer_addr(),
                    "repair frame to peer failed: {err}"
                );
                conn.close().await;
                return Err(err);
            }
        }
        Ok(())
    }
}

fn insufficient(task: &RepairBlobFileTask, local_oid: u64) -> Error {
    Error::InsufficientReplicaData {
        blob_file_id: task.blob_file_id,
        start_obj: task.start_obj,
        end_obj: task.end_obj,
        local_oid,
    }
}

fn repair_frame(req: &Packet, blob_file_id: BlobFileId, first_oid: u64, payload: Vec<u8>) -> Packet {
    let mut frame = Packet::new_request(
        Opcode::BlobFileRepairRead,
        StoreMode::Blob,
        req.partition_id,
        u64::from(blob_file_id),
    )
    .with_req_id(req.req_id)
    .with_offset(first_oid)
    .with_crc(crc32c::crc32c(&payload));
    frame.pack_ok_with_body(payload);
    frame
}
