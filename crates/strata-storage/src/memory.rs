//! In-memory store engines
//!
//! Reference implementations of the engine contracts, used by tests and by
//! nodes started without persistent engines. Repair merges reconcile
//! metadata only; object bytes move through the repair transfer.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use strata_common::{BlobFileId, Error, FileInfo, MemberFileMetas, Result, unix_now};

use crate::store::{BlobObject, BlobStore, ExtentStore, FileStore};

/// Largest extent the engine holds
pub const MAX_EXTENT_SIZE: u64 = 128 << 20;

/// Byte range `[offset, offset + len)` as slice bounds, within the extent limit
fn extent_span(file_id: u64, offset: u64, len: usize) -> Result<(usize, usize)> {
    let end = offset
        .checked_add(len as u64)
        .filter(|&end| end <= MAX_EXTENT_SIZE)
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "range of {len} bytes at offset {offset} exceeds extent {file_id} limit {MAX_EXTENT_SIZE}"
            ))
        })?;
    Ok((offset as usize, end as usize))
}

struct Extent {
    inode: u64,
    data: Vec<u8>,
    /// Client checksums keyed by (offset, size) of the write that produced them
    crcs: HashMap<(u64, u32), u32>,
    modified: u64,
    last_write: Instant,
    deleted: bool,
}

impl Extent {
    fn new(inode: u64) -> Self {
        Self {
            inode,
            data: Vec::new(),
            crcs: HashMap::new(),
            modified: unix_now(),
            last_write: Instant::now(),
            deleted: false,
        }
    }

    fn info(&self, extent_id: u64) -> FileInfo {
        FileInfo {
            file_id: extent_id,
            inode: self.inode,
            size: self.data.len() as u64,
            crc: crc32c::crc32c(&self.data),
            modified: self.modified,
            deleted: self.deleted,
        }
    }
}

/// Extent engine holding extent bytes in memory
pub struct MemExtentStore {
    extents: RwLock<HashMap<u64, Extent>>,
    /// Extents written within this window count as open for writes
    active_window: Duration,
}

impl MemExtentStore {
    #[must_use]
    pub fn new(active_window: Duration) -> Self {
        Self {
            extents: RwLock::new(HashMap::new()),
            active_window,
        }
    }
}

impl Default for MemExtentStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl FileStore for MemExtentStore {
    fn write(&self, file_id: u64, offset: u64, size: u32, data: &[u8], crc: u32) -> Result<()> {
        let len = size as usize;
        if data.len() < len {
            return Err(Error::invalid_argument(format!(
                "write of {size} bytes with {} byte payload",
                data.len()
            )));
        }
        let (start, end) = extent_span(file_id, offset, len)?;
        let mut extents = self.extents.write();
        let extent = extents
            .entry(file_id)
            .or_insert_with(|| Extent::new(0));
        if extent.deleted {
            return Err(Error::FileNotFound(file_id));
        }

        if extent.data.len() < end {
            extent.data.resize(end, 0);
        }
        extent.data[start..end].copy_from_slice(&data[..len]);

        let (new_start, new_end) = (offset, end as u64);
        extent
            .crcs
            .retain(|&(o, s), _| o + u64::from(s) <= new_start || o >= new_end);
        extent.crcs.insert((offset, size), crc);
        extent.modified = unix_now();
        extent.last_write = Instant::now();
        Ok(())
    }

    fn read(&self, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<u32> {
        let extents = self.extents.read();
        let extent = extents
            .get(&file_id)
            .filter(|e| !e.deleted)
            .ok_or(Error::FileNotFound(file_id))?;

        let (start, end) = extent_span(file_id, offset, buf.len())?;
        if end > extent.data.len() {
            return Err(Error::invalid_argument(format!(
                "read [{start}, {end}) beyond extent {file_id} of {} bytes",
                extent.data.len()
            )));
        }
        buf.copy_from_slice(&extent.data[start..end]);
        let crc = extent
            .crcs
            .get(&(offset, buf.len() as u32))
            .copied()
            .unwrap_or_else(|| crc32c::crc32c(buf));
        Ok(crc)
    }

    fn watermark(&self, file_id: u64) -> Result<FileInfo> {
        self.extents
            .read()
            .get(&file_id)
            .map(|e| e.info(file_id))
            .ok_or(Error::FileNotFound(file_id))
    }

    fn used_bytes(&self) -> u64 {
        self.extents
            .read()
            .values()
            .map(|e| e.data.len() as u64)
            .sum()
    }
}

impl ExtentStore for MemExtentStore {
    fn create(&self, extent_id: u64, inode: u64, overwrite: bool) -> Result<()> {
        let mut extents = self.extents.write();
        if let Some(existing) = extents.get(&extent_id) {
            if !existing.deleted && !overwrite {
                return Err(Error::invalid_argument(format!(
                    "extent {extent_id} already exists"
                )));
            }
        }
        extents.insert(extent_id, Extent::new(inode));
        Ok(())
    }

    fn delete_extent(&self, extent_id: u64) -> Result<()> {
        let mut extents = self.extents.write();
        let extent = extents
            .get_mut(&extent_id)
            .ok_or(Error::FileNotFound(extent_id))?;
        extent.deleted = true;
        extent.data = Vec::new();
        extent.crcs.clear();
        extent.modified = unix_now();
        Ok(())
    }

    fn all_watermarks(&self, stable_only: bool) -> Result<Vec<FileInfo>> {
        let extents = self.extents.read();
        let mut infos: Vec<FileInfo> = extents
            .iter()
            .filter(|(_, e)| !stable_only || e.last_write.elapsed() >= self.active_window)
            .map(|(id, e)| e.info(*id))
            .collect();
        infos.sort_by_key(|i| i.file_id);
        Ok(infos)
    }

    fn merge_repair(&self, metas: &MemberFileMetas) -> Result<()> {
        let mut extents = self.extents.write();
        for info in &metas.need_add {
            extents
                .entry(info.file_id)
                .or_insert_with(|| Extent::new(info.inode));
        }
        for info in &metas.need_fix_size {
            if let Some(extent) = extents.get_mut(&info.file_id) {
                let target = info.size.min(MAX_EXTENT_SIZE) as usize;
                if extent.data.len() < target {
                    extent.data.resize(target, 0);
                    extent.modified = unix_now();
                }
            }
        }
        for info in &metas.need_delete {
            if let Some(extent) = extents.get_mut(&info.file_id) {
                extent.deleted = true;
                extent.data = Vec::new();
                extent.crcs.clear();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct BlobFile {
    objects: BTreeMap<u64, BlobObject>,
    modified: u64,
}

/// Blob engine holding objects in memory
#[derive(Default)]
pub struct MemBlobStore {
    files: RwLock<HashMap<BlobFileId, BlobFile>>,
}

impl MemBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn blob_file_id(file_id: u64) -> Result<BlobFileId> {
    BlobFileId::try_from(file_id)
        .map_err(|_| Error::invalid_argument(format!("blob file id {file_id} out of range")))
}

impl FileStore for MemBlobStore {
    fn write(&self, file_id: u64, offset: u64, size: u32, data: &[u8], crc: u32) -> Result<()> {
        let id = blob_file_id(file_id)?;
        let len = size as usize;
        if data.len() < len {
            return Err(Error::invalid_argument(format!(
                "write of {size} bytes with {} byte payload",
                data.len()
            )));
        }
        let mut files = self.files.write();
        let file = files.entry(id).or_default();
        file.objects.insert(
            offset,
            BlobObject {
                oid: offset,
                size,
                crc,
                deleted: false,
                data: data[..len].to_vec(),
            },
        );
        file.modified = unix_now();
        Ok(())
    }

    fn read(&self, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<u32> {
        let id = blob_file_id(file_id)?;
        let files = self.files.read();
        let object = files
            .get(&id)
            .and_then(|f| f.objects.get(&offset))
            .filter(|o| !o.deleted)
            .ok_or(Error::FileNotFound(file_id))?;
        if buf.len() > object.data.len() {
            return Err(Error::invalid_argument(format!(
                "read of {} bytes from object {offset} of {} bytes",
                buf.len(),
                object.data.len()
            )));
        }
        buf.copy_from_slice(&object.data[..buf.len()]);
        if buf.len() == object.size as usize {
            Ok(object.crc)
        } else {
            Ok(crc32c::crc32c(buf))
        }
    }

    /// For blob files `size` reports the last object id
    fn watermark(&self, file_id: u64) -> Result<FileInfo> {
        let id = blob_file_id(file_id)?;
        let files = self.files.read();
        let file = files.get(&id).ok_or(Error::FileNotFound(file_id))?;
        Ok(FileInfo {
            file_id,
            inode: 0,
            size: file.objects.keys().next_back().copied().unwrap_or(0),
            crc: 0,
            modified: file.modified,
            deleted: false,
        })
    }

    fn used_bytes(&self) -> u64 {
        self.files
            .read()
            .values()
            .flat_map(|f| f.objects.values())
            .map(|o| o.data.len() as u64)
            .sum()
    }
}

impl BlobStore for MemBlobStore {
    fn delete_range(&self, blob_file_id: BlobFileId, offset: u64, size: u64) -> Result<()> {
        let mut files = self.files.write();
        let file = files
            .get_mut(&blob_file_id)
            .ok_or(Error::FileNotFound(u64::from(blob_file_id)))?;
        let object = file
            .objects
            .get_mut(&offset)
            .ok_or(Error::FileNotFound(u64::from(blob_file_id)))?;
        if u64::from(object.size) != size {
            return Err(Error::invalid_argument(format!(
                "delete of {size} bytes at object {offset} of blob file {blob_file_id}, object holds {} bytes",
                object.size
            )));
        }
        object.deleted = true;
        file.modified = unix_now();
        Ok(())
    }

    fn all_watermarks(&self) -> Result<Vec<FileInfo>> {
        let ids: Vec<BlobFileId> = {
            let mut ids: Vec<_> = self.files.read().keys().copied().collect();
            ids.sort_unstable();
            ids
        };
        ids.into_iter()
            .map(|id| self.watermark(u64::from(id)))
            .collect()
    }

    fn last_oid(&self, blob_file_id: BlobFileId) -> Result<u64> {
        let files = self.files.read();
        let file = files
            .get(&blob_file_id)
            .ok_or(Error::FileNotFound(u64::from(blob_file_id)))?;
        Ok(file.objects.keys().next_back().copied().unwrap_or(0))
    }

    fn merge_repair(&self, metas: &MemberFileMetas) -> Result<()> {
        let mut files = self.files.write();
        for info in &metas.need_add {
            let id = blob_file_id(info.file_id)?;
            files.entry(id).or_default();
        }
        for info in &metas.need_delete {
            let id = blob_file_id(info.file_id)?;
            files.remove(&id);
        }
        Ok(())
    }

    fn read_objects(
        &self,
        blob_file_id: BlobFileId,
        start: u64,
        end: u64,
    ) -> Result<Vec<BlobObject>> {
        let files = self.files.read();
        let file = files
            .get(&blob_file_id)
            .ok_or(Error::FileNotFound(u64::from(blob_file_id)))?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(file.objects.range(start..=end).map(|(_, o)| o.clone()).collect())
    }

    fn compact(&self, blob_file_id: BlobFileId) -> Result<u64> {
        let mut files = self.files.write();
        let file = files
            .get_mut(&blob_file_id)
            .ok_or(Error::FileNotFound(u64::from(blob_file_id)))?;
        let mut reclaimed = 0u64;
        for object in file.objects.values_mut().filter(|o| o.deleted) {
            reclaimed += object.data.len() as u64;
            object.data = Vec::new();
        }
        if reclaimed > 0 {
            file.modified = unix_now();
        }
        Ok(reclaimed)
    }
}
