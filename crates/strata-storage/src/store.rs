//! Store-engine contracts
//!
//! A partition is backed by exactly one engine, chosen by its store mode.
//! Engines must be safe to call concurrently from many connections; the
//! request layer above them takes no locks of its own.

use strata_common::{BlobFileId, FileInfo, MemberFileMetas, Result};

/// Operations shared by both engines
pub trait FileStore: Send + Sync {
    /// Write `data[..size]` at `offset`. For blob files `offset` is the object id.
    fn write(&self, file_id: u64, offset: u64, size: u32, data: &[u8], crc: u32) -> Result<()>;

    /// Fill `buf` from `offset` and return the checksum of the bytes read
    fn read(&self, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<u32>;

    /// Metadata snapshot of one file
    fn watermark(&self, file_id: u64) -> Result<FileInfo>;

    /// Bytes held by the engine
    fn used_bytes(&self) -> u64;
}

/// Engine for extent-mode partitions
pub trait ExtentStore: FileStore {
    fn create(&self, extent_id: u64, inode: u64, overwrite: bool) -> Result<()>;

    /// Delete a whole extent
    fn delete_extent(&self, extent_id: u64) -> Result<()>;

    /// Watermarks of every extent; with `stable_only`, extents still open
    /// for active writes are left out
    fn all_watermarks(&self, stable_only: bool) -> Result<Vec<FileInfo>>;

    /// Reconcile local extents against a peer's file-level state
    fn merge_repair(&self, metas: &MemberFileMetas) -> Result<()>;
}

/// One stored object of a blob file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub oid: u64,
    pub size: u32,
    pub crc: u32,
    pub deleted: bool,
    pub data: Vec<u8>,
}

/// Engine for blob-mode partitions
pub trait BlobStore: FileStore {
    /// Delete the byte range `(offset, size)` of a blob file. `offset` is the
    /// object id and the range must cover exactly that object's `size` bytes;
    /// any other range is rejected without deleting anything.
    fn delete_range(&self, blob_file_id: BlobFileId, offset: u64, size: u64) -> Result<()>;

    fn all_watermarks(&self) -> Result<Vec<FileInfo>>;

    /// Highest object id durably stored for the blob file
    fn last_oid(&self, blob_file_id: BlobFileId) -> Result<u64>;

    fn merge_repair(&self, metas: &MemberFileMetas) -> Result<()>;

    /// Objects with ids in `[start, end]`, tombstones included
    fn read_objects(&self, blob_file_id: BlobFileId, start: u64, end: u64)
    -> Result<Vec<BlobObject>>;

    /// Rewrite a blob file without its deleted objects; returns reclaimed bytes
    fn compact(&self, blob_file_id: BlobFileId) -> Result<u64>;
}
