//! Core type definitions for Strata
//!
//! Identifiers, store modes, partition status and the file metadata shapes
//! exchanged between replicas.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Standard full block size (128 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Partition identifier
pub type PartitionId = u32;

/// Blob file identifier within a blob-mode partition
pub type BlobFileId = u32;

/// Per-partition storage engine selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[display("extent")]
    Extent,
    #[display("blob")]
    Blob,
}

impl StoreMode {
    /// Wire encoding of the mode
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Extent => 1,
            Self::Blob => 2,
        }
    }

    /// Parse a partition type string as sent by the master
    pub fn from_partition_type(partition_type: &str) -> Result<Self, Error> {
        match partition_type.to_ascii_lowercase().as_str() {
            "extent" => Ok(Self::Extent),
            "blob" => Ok(Self::Blob),
            other => Err(Error::invalid_argument(format!(
                "unknown partition type {other:?}"
            ))),
        }
    }
}

impl TryFrom<u8> for StoreMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Extent),
            2 => Ok(Self::Blob),
            other => Err(Error::Decode(format!("unknown store mode {other}"))),
        }
    }
}

/// Partition health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum PartitionStatus {
    #[default]
    #[display("ReadWrite")]
    ReadWrite,
    #[display("ReadOnly")]
    ReadOnly,
}

/// Metadata snapshot of one file (extent or blob file): its watermark
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: u64,
    pub inode: u64,
    pub size: u64,
    pub crc: u32,
    /// Unix seconds of the last modification
    pub modified: u64,
    #[serde(default)]
    pub deleted: bool,
}

/// A peer's file-level state, handed to an engine for reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFileMetas {
    #[serde(default)]
    pub partition_id: PartitionId,
    /// Files the peer holds that this replica lacks
    #[serde(default)]
    pub need_add: Vec<FileInfo>,
    /// Files whose size lags the peer's
    #[serde(default)]
    pub need_fix_size: Vec<FileInfo>,
    /// Files deleted on the peer
    #[serde(default)]
    pub need_delete: Vec<FileInfo>,
}

impl MemberFileMetas {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.need_add.is_empty() && self.need_fix_size.is_empty() && self.need_delete.is_empty()
    }
}

/// Incremental blob-file repair request: copy objects `[start_obj, end_obj]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairBlobFileTask {
    pub blob_file_id: BlobFileId,
    pub start_obj: u64,
    pub end_obj: u64,
}

impl std::fmt::Display for RepairBlobFileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "blobfile({}) objects[{}..={}]",
            self.blob_file_id, self.start_obj, self.end_obj
        )
    }
}

/// Current Unix timestamp in seconds
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_mode_wire_values() {
        for mode in [StoreMode::Extent, StoreMode::Blob] {
            assert_eq!(StoreMode::try_from(mode.as_u8()).unwrap(), mode);
        }
        assert!(StoreMode::try_from(9).is_err());
    }

    #[test]
    fn test_partition_type_parsing() {
        assert_eq!(StoreMode::from_partition_type("extent").unwrap(), StoreMode::Extent);
        assert_eq!(StoreMode::from_partition_type("Blob").unwrap(), StoreMode::Blob);
        assert!(StoreMode::from_partition_type("tiny").is_err());
    }

    #[test]
    fn test_member_file_metas_defaults() {
        let metas: MemberFileMetas = serde_json::from_str("{}").unwrap();
        assert!(metas.is_empty());
    }
}
