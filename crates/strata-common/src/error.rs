//! Error types for Strata
//!
//! This module defines the common error types used throughout the data node.

use thiserror::Error;

/// Common result type for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Strata
#[derive(Debug, Error)]
pub enum Error {
    // Admission errors
    #[error("partition {0} is read-only")]
    PartitionReadOnly(u32),

    #[error("no space left on partition {0}")]
    NoSpace(u32),

    #[error("store type mismatch: {0}")]
    StoreTypeMismatch(String),

    // Lookup errors
    #[error("partition not found: {0}")]
    PartitionNotFound(u32),

    #[error("disk not found: {0}")]
    DiskNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(u64),

    // Repair errors
    #[error(
        "insufficient replica data for blob file {blob_file_id}: requested objects \
         [{start_obj}, {end_obj}] but local last oid is {local_oid}"
    )]
    InsufficientReplicaData {
        blob_file_id: u32,
        start_obj: u64,
        end_obj: u64,
        local_oid: u64,
    },

    // Protocol errors
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport failure: {0}")]
    Transport(String),

    // Storage engine errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    // Request/config errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PartitionNotFound(_) | Self::DiskNotFound(_) | Self::FileNotFound(_)
        )
    }

    /// Check if this error indicates a failing disk rather than a bad request.
    ///
    /// Only these count against a disk's read/write error counters.
    #[must_use]
    pub const fn is_disk_error(&self) -> bool {
        matches!(
            self,
            Self::DiskIo(_) | Self::ChecksumMismatch { .. } | Self::Storage(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::PartitionNotFound(3).is_not_found());
        assert!(Error::DiskNotFound("/d1".into()).is_not_found());
        assert!(!Error::NoSpace(3).is_not_found());
    }

    #[test]
    fn test_disk_error_classification() {
        let io = std::io::Error::other("EIO");
        assert!(Error::DiskIo(io).is_disk_error());
        assert!(Error::ChecksumMismatch { expected: 1, actual: 2 }.is_disk_error());
        assert!(!Error::FileNotFound(7).is_disk_error());
        assert!(!Error::PartitionReadOnly(1).is_disk_error());
    }

    #[test]
    fn test_insufficient_replica_message_carries_range_and_local_oid() {
        let err = Error::InsufficientReplicaData {
            blob_file_id: 4,
            start_obj: 10,
            end_obj: 20,
            local_oid: 15,
        };
        let msg = err.to_string();
        assert!(msg.contains("[10, 20]"));
        assert!(msg.contains("local last oid is 15"));
    }

    #[test]
    fn test_unknown_opcode_embeds_value() {
        assert_eq!(Error::UnknownOpcode(0x7f).to_string(), "unknown opcode 127");
    }
}
