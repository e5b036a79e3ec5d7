//! Admin-task envelopes exchanged with the master
//!
//! The master sends an `AdminTask` as the JSON payload of a control-plane
//! packet. The node fills in `response` and posts the whole envelope back.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use strata_common::{Error, FileInfo, PartitionId, Result, StoreMode, unix_now};

/// Outcome of an admin task as reported to the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Start,
    Success,
    Fail,
}

/// Generic control-plane envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminTask {
    #[serde(default)]
    pub id: String,
    pub op_code: u8,
    #[serde(default)]
    pub partition_id: PartitionId,
    #[serde(default)]
    pub operator_addr: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub send_time: u64,
    #[serde(default)]
    pub create_time: u64,
    #[serde(default)]
    pub request: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl AdminTask {
    /// Build a task for `op_code` around a typed request
    pub fn new<T: Serialize>(op_code: u8, partition_id: PartitionId, request: &T) -> Result<Self> {
        let now = unix_now();
        Ok(Self {
            id: format!("{op_code:#04x}_{partition_id}_{now}"),
            op_code,
            partition_id,
            operator_addr: String::new(),
            status: TaskStatus::Start,
            send_time: now,
            create_time: now,
            request: serde_json::to_value(request)?,
            response: None,
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the embedded request into its operation-specific shape
    pub fn request_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.request.clone())?)
    }

    /// Attach a typed response, copying its status onto the envelope
    pub fn set_response<T: Serialize + TaskResponse>(&mut self, response: &T) -> Result<()> {
        self.status = response.status();
        self.response = Some(serde_json::to_value(response)?);
        Ok(())
    }

    /// Decode the attached response
    pub fn response_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .response
            .clone()
            .ok_or_else(|| Error::Decode(format!("task {} has no response", self.id)))?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Display for AdminTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task({}) op({:#04x}) dp({}) status({:?})",
            self.id, self.op_code, self.partition_id, self.status
        )
    }
}

/// Responses that carry a task status
pub trait TaskResponse {
    fn status(&self) -> TaskStatus;
}

macro_rules! impl_task_response {
    ($($ty:ty),* $(,)?) => {
        $(impl TaskResponse for $ty {
            fn status(&self) -> TaskStatus {
                self.status
            }
        })*
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDataPartitionRequest {
    #[serde(default)]
    pub volume_id: String,
    pub partition_id: PartitionId,
    #[serde(default)]
    pub partition_size: u64,
    #[serde(default)]
    pub partition_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDataPartitionResponse {
    pub partition_id: PartitionId,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDataPartitionRequest {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDataPartitionResponse {
    pub partition_id: PartitionId,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDataPartitionRequest {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDataPartitionResponse {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub partition_status: String,
    #[serde(default)]
    pub used: u64,
    /// Watermarks of every file in the partition
    #[serde(default)]
    pub snapshot: Vec<FileInfo>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeatRequest {
    #[serde(default)]
    pub master_addr: String,
}

/// Per-partition entry of a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub partition_id: PartitionId,
    pub volume_id: String,
    pub status: String,
    pub total: u64,
    pub used: u64,
    pub disk_path: String,
    pub store_mode: StoreMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNodeHeartbeatResponse {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub created_partition_count: u32,
    #[serde(default)]
    pub rack_name: String,
    #[serde(default)]
    pub partition_reports: Vec<PartitionReport>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: String,
}

impl_task_response!(
    CreateDataPartitionResponse,
    DeleteDataPartitionResponse,
    LoadDataPartitionResponse,
    DataNodeHeartbeatResponse,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn test_request_extraction() {
        let req = CreateDataPartitionRequest {
            volume_id: "vol1".into(),
            partition_id: 12,
            partition_size: 1 << 30,
            partition_type: "extent".into(),
        };
        let task = AdminTask::new(Opcode::CreateDataPartition as u8, 12, &req).unwrap();
        let decoded = AdminTask::decode(&task.encode().unwrap()).unwrap();
        assert_eq!(decoded.op_code, Opcode::CreateDataPartition as u8);
        assert_eq!(decoded.request_as::<CreateDataPartitionRequest>().unwrap(), req);
    }

    #[test]
    fn test_set_response_copies_status() {
        let mut task = AdminTask::new(
            Opcode::DeleteDataPartition as u8,
            3,
            &DeleteDataPartitionRequest { partition_id: 3 },
        )
        .unwrap();
        task.set_response(&DeleteDataPartitionResponse {
            partition_id: 3,
            status: TaskStatus::Fail,
            result: "boom".into(),
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::Fail);
        let resp: DeleteDataPartitionResponse = task.response_as().unwrap();
        assert_eq!(resp.result, "boom");
    }

    #[test]
    fn test_malformed_embedded_request_is_decode_error() {
        let task = AdminTask {
            op_code: Opcode::DeleteDataPartition as u8,
            request: serde_json::json!({ "partition_id": "not-a-number" }),
            ..AdminTask::default()
        };
        let err = task.request_as::<DeleteDataPartitionRequest>().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_garbage_envelope_rejected() {
        assert!(AdminTask::decode(b"not json").is_err());
    }
}
