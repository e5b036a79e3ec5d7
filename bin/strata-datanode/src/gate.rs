//! Partition gate: admission checks and store-mode routing for data requests
//!
//! Create and Write are refused on read-only or full partitions. Reads,
//! deletes and queries bypass admission.

use std::time::Instant;
use strata_common::{BlobFileId, Error, PartitionStatus, Result, StoreMode};
use strata_proto::{MAX_PACKET_DATA, Packet};
use strata_storage::{IoDirection, Partition, PartitionStore};

use crate::dispatch::{fail, reply};
use crate::node::DataNode;

/// Admission for mutating requests
pub(crate) fn admit_mutation(dp: &Partition) -> Result<()> {
    if dp.status() == PartitionStatus::ReadOnly {
        return Err(Error::PartitionReadOnly(dp.id()));
    }
    if dp.available() <= 0 {
        return Err(Error::NoSpace(dp.id()));
    }
    Ok(())
}

/// Extent writes must end within the partition's configured size
fn check_extent_range(dp: &Partition, pkt: &Packet) -> Result<()> {
    let end = pkt.offset.checked_add(u64::from(pkt.size));
    match end {
        Some(end) if end <= dp.size() => Ok(()),
        _ => Err(Error::invalid_argument(format!(
            "write of {} bytes at offset {} exceeds partition {} size {}",
            pkt.size,
            pkt.offset,
            dp.id(),
            dp.size()
        ))),
    }
}

pub(crate) fn blob_file_id(file_id: u64) -> Result<BlobFileId> {
    BlobFileId::try_from(file_id)
        .map_err(|_| Error::invalid_argument(format!("blob file id {file_id} out of range")))
}

/// Extent inode hint: the first 8 payload bytes, big-endian, if present
fn inode_hint(pkt: &Packet) -> u64 {
    pkt.payload()
        .first_chunk::<8>()
        .map_or(0, |bytes| u64::from_be_bytes(*bytes))
}

impl DataNode {
    pub(crate) async fn handle_create_file(&self, pkt: &mut Packet) {
        let result = self.create_file(pkt);
        reply(pkt, "CreateFile", result);
    }

    fn create_file(&self, pkt: &Packet) -> Result<()> {
        let dp = self.partition(pkt.partition_id)?;
        admit_mutation(&dp)?;
        match (pkt.store_mode()?, dp.store()) {
            (StoreMode::Extent, PartitionStore::Extent(store)) => {
                store.create(pkt.file_id, inode_hint(pkt), false)
            }
            _ => Err(Error::StoreTypeMismatch(
                "CreateFile only supports extent partitions".into(),
            )),
        }
    }

    pub(crate) async fn handle_write(&self, pkt: &mut Packet) {
        let block_size = self.pool().block_size();
        let pooled = pkt.size as usize == block_size && pkt.data.len() == block_size;

        let result = self.write(pkt);
        if pooled {
            self.pool().put(std::mem::take(&mut pkt.data));
        }
        reply(pkt, "Write", result);
    }

    fn write(&self, pkt: &Packet) -> Result<()> {
        let dp = self.packet_partition(pkt)?;
        admit_mutation(&dp)?;
        if dp.mode() == StoreMode::Extent {
            check_extent_range(&dp, pkt)?;
        }

        let start = Instant::now();
        let result = dp
            .store()
            .files()
            .write(pkt.file_id, pkt.offset, pkt.size, &pkt.data, pkt.crc);
        dp.disk()
            .record_io(dp.id(), IoDirection::Write, result.as_ref().err());
        dp.metrics()
            .record_write(u64::from(pkt.size), start.elapsed(), result.is_ok());
        result
    }

    pub(crate) async fn handle_read(&self, pkt: &mut Packet) {
        match self.read(pkt) {
            Ok((data, crc)) => {
                pkt.data = data;
                pkt.crc = crc;
                pkt.pack_ok_read_reply();
            }
            Err(err) => fail(pkt, "Read", &err),
        }
    }

    fn read(&self, pkt: &Packet) -> Result<(Vec<u8>, u32)> {
        let dp = self.packet_partition(pkt)?;
        let size = pkt.size as usize;
        if size > MAX_PACKET_DATA {
            return Err(Error::invalid_argument(format!(
                "read of {size} bytes exceeds frame limit {MAX_PACKET_DATA}"
            )));
        }

        let mut data = vec![0u8; size];
        let start = Instant::now();
        let result = dp.store().files().read(pkt.file_id, pkt.offset, &mut data);
        dp.disk()
            .record_io(dp.id(), IoDirection::Read, result.as_ref().err());
        dp.metrics()
            .record_read(size as u64, start.elapsed(), result.is_ok());
        result.map(|crc| (data, crc))
    }

    pub(crate) async fn handle_mark_delete(&self, pkt: &mut Packet) {
        let result = self.mark_delete(pkt);
        reply(pkt, "MarkDelete", result);
    }

    fn mark_delete(&self, pkt: &Packet) -> Result<()> {
        let dp = self.packet_partition(pkt)?;
        match dp.store() {
            PartitionStore::Blob(store) => store.delete_range(
                blob_file_id(pkt.file_id)?,
                pkt.offset,
                u64::from(pkt.size),
            ),
            PartitionStore::Extent(store) => store.delete_extent(pkt.file_id),
        }
    }

    pub(crate) async fn handle_get_watermark(&self, pkt: &mut Packet) {
        let result = self
            .packet_partition(pkt)
            .and_then(|dp| dp.store().files().watermark(pkt.file_id))
            .and_then(|info| Ok(serde_json::to_vec(&info)?));
        reply_with_body(pkt, "GetWatermark", result);
    }

    pub(crate) async fn handle_extent_get_all_watermarks(&self, pkt: &mut Packet) {
        let result = self
            .extent_partition(pkt)
            .and_then(|(_, store)| store.all_watermarks(true))
            .and_then(|infos| Ok(serde_json::to_vec(&infos)?));
        reply_with_body(pkt, "ExtentStoreGetAllWatermark", result);
    }

    pub(crate) async fn handle_blob_get_all_watermarks(&self, pkt: &mut Packet) {
        let result = self
            .blob_partition(pkt)
            .and_then(|(_, store)| store.all_watermarks())
            .and_then(|infos| Ok(serde_json::to_vec(&infos)?));
        reply_with_body(pkt, "BlobStoreGetAllWatermark", result);
    }

    pub(crate) async fn handle_get_partition_metrics(&self, pkt: &mut Packet) {
        let result = self
            .partition(pkt.partition_id)
            .and_then(|dp| Ok(serde_json::to_vec(&dp.metrics().snapshot(dp.id()))?));
        reply_with_body(pkt, "GetDataPartitionMetrics", result);
    }
}

fn reply_with_body(pkt: &mut Packet, action: &str, result: Result<Vec<u8>>) {
    match result {
        Ok(body) => pkt.pack_ok_with_body(body),
        Err(err) => fail(pkt, action, &err),
    }
}
