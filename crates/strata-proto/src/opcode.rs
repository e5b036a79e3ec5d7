//! Opcode and result-code tables

use strata_common::Error;

/// Request opcodes (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    CreateFile = 0x01,
    MarkDelete = 0x02,
    Write = 0x03,
    Read = 0x04,
    StreamRead = 0x05,
    GetWatermark = 0x06,
    ExtentStoreGetAllWaterMark = 0x07,
    BlobStoreGetAllWaterMark = 0x08,
    NotifyExtentRepair = 0x09,
    NotifyBlobRepair = 0x0A,
    BlobFileRepairRead = 0x0B,
    NotifyCompactBlobFile = 0x0C,
    GetDataPartitionMetrics = 0x0D,

    // Master commands
    CreateDataPartition = 0x60,
    DeleteDataPartition = 0x61,
    LoadDataPartition = 0x62,
    DataNodeHeartbeat = 0x63,
}

impl Opcode {
    pub const ALL: [Self; 17] = [
        Self::CreateFile,
        Self::MarkDelete,
        Self::Write,
        Self::Read,
        Self::StreamRead,
        Self::GetWatermark,
        Self::ExtentStoreGetAllWaterMark,
        Self::BlobStoreGetAllWaterMark,
        Self::NotifyExtentRepair,
        Self::NotifyBlobRepair,
        Self::BlobFileRepairRead,
        Self::NotifyCompactBlobFile,
        Self::GetDataPartitionMetrics,
        Self::CreateDataPartition,
        Self::DeleteDataPartition,
        Self::LoadDataPartition,
        Self::DataNodeHeartbeat,
    ];

    /// Operation name used in logs and metrics keys
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateFile => "OpCreateFile",
            Self::MarkDelete => "OpMarkDelete",
            Self::Write => "OpWrite",
            Self::Read => "OpRead",
            Self::StreamRead => "OpStreamRead",
            Self::GetWatermark => "OpGetWatermark",
            Self::ExtentStoreGetAllWaterMark => "OpExtentStoreGetAllWaterMark",
            Self::BlobStoreGetAllWaterMark => "OpBlobStoreGetAllWaterMark",
            Self::NotifyExtentRepair => "OpNotifyExtentRepair",
            Self::NotifyBlobRepair => "OpNotifyBlobRepair",
            Self::BlobFileRepairRead => "OpBlobFileRepairRead",
            Self::NotifyCompactBlobFile => "OpNotifyCompactBlobFile",
            Self::GetDataPartitionMetrics => "OpGetDataPartitionMetrics",
            Self::CreateDataPartition => "OpCreateDataPartition",
            Self::DeleteDataPartition => "OpDeleteDataPartition",
            Self::LoadDataPartition => "OpLoadDataPartition",
            Self::DataNodeHeartbeat => "OpDataNodeHeartbeat",
        }
    }

    /// Whether the request's `size` bytes follow the header on the wire.
    ///
    /// Reads and deletes use `size` as a length argument instead.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        !matches!(self, Self::Read | Self::StreamRead | Self::MarkDelete)
    }

    /// Whether the handler writes its own reply frames
    #[must_use]
    pub const fn streams_reply(self) -> bool {
        matches!(self, Self::StreamRead)
    }

    /// Whether the request originates from the master
    #[must_use]
    pub const fn is_master_command(self) -> bool {
        matches!(
            self,
            Self::CreateDataPartition
                | Self::DeleteDataPartition
                | Self::LoadDataPartition
                | Self::DataNodeHeartbeat
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or(Error::UnknownOpcode(value))
    }
}

/// Name for a raw opcode byte, including unknown ones
#[must_use]
pub fn opcode_name(raw: u8) -> String {
    Opcode::try_from(raw).map_or_else(|_| format!("OpUnknown({raw:#04x})"), |op| op.name().to_string())
}

/// Reply result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Unset on requests
    Init = 0x00,
    Ok = 0xF0,
    Err = 0xF1,
    ArgMismatch = 0xF2,
    NotExist = 0xF3,
    NoSpace = 0xF4,
    DiskErr = 0xF5,
    ReadOnly = 0xF6,
    Again = 0xF7,
    UnknownOp = 0xF8,
}

impl ResultCode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0xF0 => Self::Ok,
            0xF2 => Self::ArgMismatch,
            0xF3 => Self::NotExist,
            0xF4 => Self::NoSpace,
            0xF5 => Self::DiskErr,
            0xF6 => Self::ReadOnly,
            0xF7 => Self::Again,
            0xF8 => Self::UnknownOp,
            0x00 => Self::Init,
            _ => Self::Err,
        }
    }
}

impl From<&Error> for ResultCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::PartitionReadOnly(_) => Self::ReadOnly,
            Error::NoSpace(_) => Self::NoSpace,
            Error::StoreTypeMismatch(_) | Error::Decode(_) | Error::InvalidArgument(_) => {
                Self::ArgMismatch
            }
            Error::PartitionNotFound(_) | Error::DiskNotFound(_) | Error::FileNotFound(_) => {
                Self::NotExist
            }
            Error::InsufficientReplicaData { .. } | Error::QueueFull(_) => Self::Again,
            Error::UnknownOpcode(_) => Self::UnknownOp,
            Error::DiskIo(_) | Error::ChecksumMismatch { .. } | Error::Storage(_) => Self::DiskErr,
            Error::Transport(_) | Error::Configuration(_) | Error::Internal(_) => Self::Err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_table_is_closed() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u8).unwrap(), op);
        }
        assert!(matches!(
            Opcode::try_from(0xEE),
            Err(Error::UnknownOpcode(0xEE))
        ));
    }

    #[test]
    fn test_payload_rules() {
        assert!(!Opcode::Read.carries_payload());
        assert!(!Opcode::StreamRead.carries_payload());
        assert!(Opcode::Write.carries_payload());
        assert!(Opcode::BlobFileRepairRead.carries_payload());
        assert!(Opcode::StreamRead.streams_reply());
        assert!(!Opcode::BlobFileRepairRead.streams_reply());
    }

    #[test]
    fn test_error_result_codes() {
        assert_eq!(ResultCode::from(&Error::NoSpace(1)), ResultCode::NoSpace);
        assert_eq!(
            ResultCode::from(&Error::PartitionReadOnly(1)),
            ResultCode::ReadOnly
        );
        assert_eq!(
            ResultCode::from(&Error::PartitionNotFound(1)),
            ResultCode::NotExist
        );
        assert_eq!(ResultCode::from_u8(0xF0), ResultCode::Ok);
        assert_eq!(ResultCode::from_u8(0xAB), ResultCode::Err);
    }

    #[test]
    fn test_unknown_opcode_name() {
        assert_eq!(opcode_name(0x03), "OpWrite");
        assert_eq!(opcode_name(0xEE), "OpUnknown(0xee)");
    }
}
