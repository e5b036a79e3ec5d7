//! Streaming read: serves an extent range as a sequence of bounded frames
//!
//! Each frame carries at most one block. A store read failure ends the
//! stream with an error frame; a failed send closes the connection.

use std::time::Instant;
use strata_proto::{Packet, ResultCode};
use strata_storage::IoDirection;
use tracing::error;

use crate::conn::PacketConn;
use crate::dispatch::fail;
use crate::node::DataNode;

impl DataNode {
    pub(crate) async fn handle_stream_read(&self, pkt: &mut Packet, conn: &mut dyn PacketConn) {
        let (dp, store) = match self.extent_partition(pkt) {
            Ok(found) => found,
            Err(err) => {
                fail(pkt, "StreamRead", &err);
                send_terminal(pkt, conn).await;
                return;
            }
        };

        let max_chunk = self.pool().block_size();
        let read_key = self.metrics().key("Read");
        let request_offset = pkt.offset;
        let mut remaining = u64::from(pkt.size);
        let mut offset = pkt.offset;

        while remaining > 0 {
            let chunk = remaining.min(max_chunk as u64) as usize;
            let pooled = chunk == max_chunk;
            let mut buf = if pooled {
                self.pool().get()
            } else {
                vec![0u8; chunk]
            };

            let start = Instant::now();
            let result = store.read(pkt.file_id, offset, &mut buf[..chunk]);
            let elapsed = start.elapsed();
            self.metrics().record(&read_key, elapsed, result.is_ok());
            dp.disk()
                .record_io(dp.id(), IoDirection::Read, result.as_ref().err());
            dp.metrics()
                .record_read(chunk as u64, elapsed, result.is_ok());

            let crc = match result {
                Ok(crc) => crc,
                Err(err) => {
                    if pooled {
                        self.pool().put(buf);
                    }
                    pkt.offset = offset;
                    fail(pkt, "StreamRead", &err);
                    send_terminal(pkt, conn).await;
                    return;
                }
            };

            pkt.data = buf;
            pkt.size = chunk as u32;
            pkt.offset = offset;
            pkt.crc = crc;
            pkt.result_code = ResultCode::Ok as u8;
            let sent = conn.send(pkt).await;
            if pooled {
                self.pool().put(std::mem::take(&mut pkt.data));
                pkt.size = 0;
            }
            if let Err(err) = sent {
                error!(
                    req = %pkt.unique_log_id(),
                    peer = conn.peer_addr(),
                    "stream frame to client failed: {err}"
                );
                conn.close().await;
                pkt.offset = request_offset;
                fail(pkt, "StreamRead", &err);
                return;
            }

            offset += chunk as u64;
            remaining -= chunk as u64;
        }
        pkt.offset = request_offset;
    }
}

/// Send an error frame that ends the stream
async fn send_terminal(pkt: &Packet, conn: &mut dyn PacketConn) {
    if let Err(err) = conn.send(pkt).await {
        error!(
            req = %pkt.unique_log_id(),
            peer = conn.peer_addr(),
            "stream error frame to client failed: {err}"
        );
        conn.close().await;
    }
}
