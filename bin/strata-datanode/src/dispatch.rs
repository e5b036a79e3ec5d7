//! Request dispatch
//!
//! Opcodes map to handlers through a table built once per node. Every
//! dispatch runs under an `OpTimer` that logs the outcome and feeds the
//! per-operation metrics.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Instant;
use strata_common::{Error, Result};
use strata_proto::{Opcode, Packet};
use tracing::{debug, error, warn};

use crate::conn::PacketConn;
use crate::node::DataNode;

/// A request handler. It leaves the reply in the packet; streaming handlers
/// also write frames to the connection.
pub type HandlerFn =
    for<'a> fn(&'a DataNode, &'a mut Packet, &'a mut dyn PacketConn) -> BoxFuture<'a, ()>;

macro_rules! packet_handler {
    ($name:ident, $method:ident) => {
        fn $name<'a>(
            node: &'a DataNode,
            pkt: &'a mut Packet,
            _conn: &'a mut dyn PacketConn,
        ) -> BoxFuture<'a, ()> {
            Box::pin(node.$method(pkt))
        }
    };
    ($name:ident, $method:ident, conn) => {
        fn $name<'a>(
            node: &'a DataNode,
            pkt: &'a mut Packet,
            conn: &'a mut dyn PacketConn,
        ) -> BoxFuture<'a, ()> {
            Box::pin(node.$method(pkt, conn))
        }
    };
}

packet_handler!(create_file, handle_create_file);
packet_handler!(write, handle_write);
packet_handler!(read, handle_read);
packet_handler!(stream_read, handle_stream_read, conn);
packet_handler!(blob_file_repair_read, handle_blob_file_repair_read, conn);
packet_handler!(mark_delete, handle_mark_delete);
packet_handler!(notify_compact, handle_notify_compact);
packet_handler!(notify_extent_repair, handle_notify_extent_repair);
packet_handler!(notify_blob_repair, handle_notify_blob_repair);
packet_handler!(get_watermark, handle_get_watermark);
packet_handler!(extent_get_all_watermarks, handle_extent_get_all_watermarks);
packet_handler!(blob_get_all_watermarks, handle_blob_get_all_watermarks);
packet_handler!(get_partition_metrics, handle_get_partition_metrics);
packet_handler!(create_partition, handle_create_partition);
packet_handler!(delete_partition, handle_delete_partition);
packet_handler!(load_partition, handle_load_partition);
packet_handler!(heartbeat, handle_heartbeat);

/// Opcode to handler table
pub struct HandlerTable {
    handlers: HashMap<Opcode, HandlerFn>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        let entries = [
            (Opcode::CreateFile, create_file as HandlerFn),
            (Opcode::Write, write as HandlerFn),
            (Opcode::Read, read as HandlerFn),
            (Opcode::StreamRead, stream_read as HandlerFn),
            (Opcode::BlobFileRepairRead, blob_file_repair_read as HandlerFn),
            (Opcode::MarkDelete, mark_delete as HandlerFn),
            (Opcode::NotifyCompactBlobFile, notify_compact as HandlerFn),
            (Opcode::NotifyExtentRepair, notify_extent_repair as HandlerFn),
            (Opcode::NotifyBlobRepair, notify_blob_repair as HandlerFn),
            (Opcode::GetWatermark, get_watermark as HandlerFn),
            (Opcode::ExtentStoreGetAllWaterMark, extent_get_all_watermarks as HandlerFn),
            (Opcode::BlobStoreGetAllWaterMark, blob_get_all_watermarks as HandlerFn),
            (Opcode::GetDataPartitionMetrics, get_partition_metrics as HandlerFn),
            (Opcode::CreateDataPartition, create_partition as HandlerFn),
            (Opcode::DeleteDataPartition, delete_partition as HandlerFn),
            (Opcode::LoadDataPartition, load_partition as HandlerFn),
            (Opcode::DataNodeHeartbeat, heartbeat as HandlerFn),
        ];
        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn get(&self, op: Opcode) -> Option<HandlerFn> {
        self.handlers.get(&op).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack an error reply annotated with the request identity
pub(crate) fn fail(pkt: &mut Packet, action: &str, err: &Error) {
    let action = format!("request({}) {action}", pkt.unique_log_id());
    pkt.pack_error(&action, err);
}

/// Pack an empty Ok reply or an annotated error reply
pub(crate) fn reply(pkt: &mut Packet, action: &str, result: Result<()>) {
    match result {
        Ok(()) => pkt.pack_ok_reply(),
        Err(err) => fail(pkt, action, &err),
    }
}

#[derive(Clone, Copy)]
enum OpClass {
    Read,
    Write,
    Other,
}

impl OpClass {
    fn of(opcode: u8) -> Self {
        match Opcode::try_from(opcode) {
            Ok(Opcode::Read | Opcode::StreamRead) => Self::Read,
            Ok(Opcode::Write) => Self::Write,
            _ => Self::Other,
        }
    }
}

/// Scoped measurement of one dispatch.
///
/// `finish` logs the outcome and records metrics. A timer dropped without
/// finishing records a failure.
pub(crate) struct OpTimer<'a> {
    node: &'a DataNode,
    key: String,
    op_name: String,
    class: OpClass,
    peer: String,
    start: Instant,
    orig_size: u32,
    finished: bool,
}

impl<'a> OpTimer<'a> {
    pub(crate) fn start(node: &'a DataNode, pkt: &Packet, peer: &str) -> Self {
        let op_name = pkt.op_name();
        Self {
            node,
            key: node.metrics().key(&op_name),
            op_name,
            class: OpClass::of(pkt.opcode),
            peer: peer.to_string(),
            start: Instant::now(),
            orig_size: pkt.size,
            finished: false,
        }
    }

    /// Log and record the outcome. On return `pkt.size` is the size of the
    /// reply the handler produced.
    pub(crate) fn finish(mut self, pkt: &mut Packet) {
        let elapsed = self.start.elapsed();
        let result_size = pkt.size;
        let failed = pkt.is_error();
        let error_text = failed.then(|| {
            let len = (result_size as usize).min(pkt.data.len());
            String::from_utf8_lossy(&pkt.data[..len]).into_owned()
        });

        pkt.size = self.orig_size;
        let req = pkt.unique_log_id();
        let latency_us = elapsed.as_micros() as u64;
        if let Some(text) = error_text {
            error!(
                target: "strata::op",
                req = %req,
                peer = %self.peer,
                latency_us,
                "op({}) error({})",
                self.op_name,
                text
            );
        } else {
            match self.class {
                OpClass::Read => debug!(target: "strata::read", req = %req, peer = %self.peer, latency_us, "read done"),
                OpClass::Write => debug!(target: "strata::write", req = %req, peer = %self.peer, latency_us, "write done"),
                OpClass::Other => debug!(target: "strata::op", req = %req, peer = %self.peer, latency_us, "op done"),
            }
        }
        pkt.size = result_size;

        self.node.metrics().record(&self.key, elapsed, !failed);
        self.finished = true;
    }
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.node
                .metrics()
                .record(&self.key, self.start.elapsed(), false);
            warn!(target: "strata::op", peer = %self.peer, "op({}) abandoned", self.op_name);
        }
    }
}

impl DataNode {
    /// Run the handler for one request. The reply is left in `pkt`.
    pub async fn handle_packet(&self, pkt: &mut Packet, conn: &mut dyn PacketConn) {
        let timer = OpTimer::start(self, pkt, conn.peer_addr());
        let handler = Opcode::try_from(pkt.opcode)
            .ok()
            .and_then(|op| self.handlers.get(op));
        match handler {
            Some(handler) => handler(self, pkt, conn).await,
            None => fail(pkt, "dispatch", &Error::UnknownOpcode(pkt.opcode)),
        }
        timer.finish(pkt);
    }
}
