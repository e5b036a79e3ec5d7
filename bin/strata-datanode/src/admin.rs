//! Master task bridge: partition lifecycle and heartbeat commands
//!
//! The sender is always acknowledged with Ok as soon as the envelope decodes.
//! The real outcome travels to the master in a separate report, posted once
//! in the background; a failed post is only logged. Reports in flight at
//! shutdown get a bounded grace period through `DataNode::drain_reports`.

use serde::Serialize;
use std::sync::Arc;
use strata_common::{PartitionId, Result};
use strata_proto::admin::{
    CreateDataPartitionRequest, CreateDataPartitionResponse, DataNodeHeartbeatResponse,
    DeleteDataPartitionRequest, DeleteDataPartitionResponse, HeartBeatRequest,
    LoadDataPartitionRequest, LoadDataPartitionResponse, PartitionReport, TaskResponse,
};
use strata_proto::{AdminTask, Opcode, Packet, TaskStatus};
use tracing::{debug, error, info};

use crate::node::DataNode;

fn illegal_opcode(task: &AdminTask, expected: Opcode) -> String {
    format!(
        "illegal opcode {:#04x} in {} task, expected {}",
        task.op_code,
        task.id,
        expected.name()
    )
}

fn outcome(result: Result<()>) -> (TaskStatus, String) {
    match result {
        Ok(()) => (TaskStatus::Success, String::new()),
        Err(err) => (TaskStatus::Fail, err.to_string()),
    }
}

impl DataNode {
    pub(crate) async fn handle_create_partition(&self, pkt: &mut Packet) {
        let Some(task) = accept_task(pkt) else {
            return;
        };
        let mut response = CreateDataPartitionResponse {
            partition_id: task.partition_id,
            ..Default::default()
        };
        if task.op_code == Opcode::CreateDataPartition as u8 {
            let result = task.request_as::<CreateDataPartitionRequest>().and_then(|req| {
                response.partition_id = req.partition_id;
                self.space()
                    .create_partition(
                        &req.volume_id,
                        req.partition_id,
                        req.partition_size,
                        &req.partition_type,
                    )
                    .map(|_| ())
            });
            (response.status, response.result) = outcome(result);
        } else {
            response.status = TaskStatus::Fail;
            response.result = illegal_opcode(&task, Opcode::CreateDataPartition);
        }
        self.report(task, &response);
    }

    pub(crate) async fn handle_delete_partition(&self, pkt: &mut Packet) {
        let Some(task) = accept_task(pkt) else {
            return;
        };
        let mut response = DeleteDataPartitionResponse {
            partition_id: task.partition_id,
            ..Default::default()
        };
        if task.op_code == Opcode::DeleteDataPartition as u8 {
            let result = task.request_as::<DeleteDataPartitionRequest>().map(|req| {
                response.partition_id = req.partition_id;
                // an unknown id is not an error
                self.space().delete_partition(req.partition_id);
            });
            (response.status, response.result) = outcome(result);
        } else {
            response.status = TaskStatus::Fail;
            response.result = illegal_opcode(&task, Opcode::DeleteDataPartition);
        }
        self.report(task, &response);
    }

    pub(crate) async fn handle_load_partition(&self, pkt: &mut Packet) {
        let Some(task) = accept_task(pkt) else {
            return;
        };
        let mut response = LoadDataPartitionResponse {
            partition_id: task.partition_id,
            ..Default::default()
        };
        if task.op_code == Opcode::LoadDataPartition as u8 {
            match task.request_as::<LoadDataPartitionRequest>() {
                Ok(req) => self.load_partition(req.partition_id, &mut response),
                Err(err) => {
                    response.status = TaskStatus::Fail;
                    response.result = err.to_string();
                }
            }
        } else {
            response.status = TaskStatus::Fail;
            response.result = illegal_opcode(&task, Opcode::LoadDataPartition);
        }
        self.report(task, &response);
    }

    fn load_partition(&self, partition_id: PartitionId, response: &mut LoadDataPartitionResponse) {
        response.partition_id = partition_id;
        let Some(dp) = self.space().get_partition(partition_id) else {
            response.status = TaskStatus::Fail;
            response.result = format!("dataPartition({partition_id}) not found");
            return;
        };
        match dp.load() {
            Ok(snapshot) => {
                response.partition_status = snapshot.status.to_string();
                response.used = snapshot.used;
                response.snapshot = snapshot.files;
                response.status = TaskStatus::Success;
            }
            Err(err) => {
                response.status = TaskStatus::Fail;
                response.result = err.to_string();
            }
        }
    }

    pub(crate) async fn handle_heartbeat(&self, pkt: &mut Packet) {
        let Some(task) = accept_task(pkt) else {
            return;
        };
        let mut response = self.heartbeat_snapshot();
        if task.op_code == Opcode::DataNodeHeartbeat as u8 {
            let result = task.request_as::<HeartBeatRequest>().map(|req| {
                if !req.master_addr.is_empty() {
                    self.master().add_node(&req.master_addr);
                }
            });
            (response.status, response.result) = outcome(result);
        } else {
            response.status = TaskStatus::Fail;
            response.result = illegal_opcode(&task, Opcode::DataNodeHeartbeat);
        }
        self.report(task, &response);
    }

    /// Space usage and per-partition state reported in heartbeats
    fn heartbeat_snapshot(&self) -> DataNodeHeartbeatResponse {
        let usage = self.space().usage();
        let partition_reports = self
            .space()
            .partitions()
            .iter()
            .map(|dp| PartitionReport {
                partition_id: dp.id(),
                volume_id: dp.volume_id().to_string(),
                status: dp.status().to_string(),
                total: dp.size(),
                used: dp.used(),
                disk_path: dp.disk().path().display().to_string(),
                store_mode: dp.mode(),
            })
            .collect();
        DataNodeHeartbeatResponse {
            total: usage.total,
            used: usage.used,
            available: usage.available,
            created_partition_count: usage.partition_count,
            rack_name: self.rack().to_string(),
            partition_reports,
            ..Default::default()
        }
    }

    /// Attach the response and post the task to the master in the background
    fn report<T: Serialize + TaskResponse>(&self, mut task: AdminTask, response: &T) {
        let body = match task.set_response(response).and_then(|()| task.encode()) {
            Ok(body) => body,
            Err(err) => {
                error!(task = %task, "encode task response failed: {err}");
                return;
            }
        };
        info!(task = %task, "admin task done");
        let master = Arc::clone(self.master());
        self.spawn_report(async move {
            match master.post_task_response(body).await {
                Ok(()) => debug!(task = %task, "task response posted to master"),
                Err(err) => error!(task = %task, "post task response to master failed: {err}"),
            }
        });
    }
}

/// Decode the envelope and acknowledge the sender
fn accept_task(pkt: &mut Packet) -> Option<AdminTask> {
    let decoded = AdminTask::decode(pkt.payload());
    pkt.pack_ok_reply();
    match decoded {
        Ok(task) => Some(task),
        Err(err) => {
            error!(
                req = %pkt.unique_log_id(),
                "undecodable admin task, nothing reported: {err}"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{RecordingConn, TestNode, request};
    use serde::de::DeserializeOwned;
    use strata_client::MasterClient;
    use strata_common::{PartitionStatus, StoreMode};
    use std::time::Duration;
    use strata_proto::ResultCode;

    async fn send_task(t: &TestNode, opcode: Opcode, task: &AdminTask) -> Packet {
        let mut conn = RecordingConn::new();
        let mut pkt = request(opcode, StoreMode::Extent, task.partition_id, 0)
            .with_payload(task.encode().unwrap());
        t.node.handle_packet(&mut pkt, &mut conn).await;
        pkt
    }

    async fn next_report<T: DeserializeOwned>(t: &mut TestNode) -> (AdminTask, T) {
        let body = t.master_rx.recv().await.unwrap();
        let task = AdminTask::decode(&body).unwrap();
        let response = task.response_as().unwrap();
        (task, response)
    }

    fn create_task(partition_id: u32, size: u64, partition_type: &str) -> AdminTask {
        let req = CreateDataPartitionRequest {
            volume_id: "vol1".into(),
            partition_id,
            partition_size: size,
            partition_type: partition_type.into(),
        };
        AdminTask::new(Opcode::CreateDataPartition as u8, partition_id, &req).unwrap()
    }

    #[tokio::test]
    async fn test_create_partition_reports_success() {
        let mut t = TestNode::new(16);
        let pkt = send_task(&t, Opcode::CreateDataPartition, &create_task(4, 1 << 20, "blob")).await;
        assert_eq!(pkt.result(), ResultCode::Ok);
        assert_eq!(pkt.size, 0);

        let (task, response): (_, CreateDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(response.status, TaskStatus::Success);
        assert_eq!(response.partition_id, 4);
        assert_eq!(t.node.space().get_partition(4).unwrap().mode(), StoreMode::Blob);
    }

    #[tokio::test]
    async fn test_create_failure_still_acks_ok() {
        let mut t = TestNode::new(16);
        let pkt = send_task(&t, Opcode::CreateDataPartition, &create_task(4, 1 << 40, "extent")).await;
        assert_eq!(pkt.result(), ResultCode::Ok);

        let (_, response): (_, CreateDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Fail);
        assert!(response.result.contains("no space"), "{}", response.result);
        assert!(t.node.space().get_partition(4).is_none());
    }

    #[tokio::test]
    async fn test_mismatched_envelope_opcode_fails_without_acting() {
        let mut t = TestNode::new(16);
        let task = create_task(4, 1 << 20, "extent");
        let pkt = send_task(&t, Opcode::DeleteDataPartition, &task).await;
        assert_eq!(pkt.result(), ResultCode::Ok);

        let (_, response): (_, DeleteDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Fail);
        assert!(response.result.contains("illegal opcode"));
        assert!(t.node.space().get_partition(4).is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_pending_reports() {
        let mut t = TestNode::new(16);
        send_task(&t, Opcode::CreateDataPartition, &create_task(4, 1 << 20, "extent")).await;
        send_task(&t, Opcode::CreateDataPartition, &create_task(5, 1 << 20, "blob")).await;

        assert_eq!(t.node.drain_reports(Duration::from_secs(5)).await, 0);
        assert!(t.master_rx.try_recv().is_ok());
        assert!(t.master_rx.try_recv().is_ok());
        assert_eq!(t.node.drain_reports(Duration::from_secs(5)).await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_envelope_acks_without_report() {
        let mut t = TestNode::new(16);
        let mut conn = RecordingConn::new();
        let mut pkt = request(Opcode::CreateDataPartition, StoreMode::Extent, 1, 0)
            .with_payload(b"garbage".to_vec());
        t.node.handle_packet(&mut pkt, &mut conn).await;
        assert_eq!(pkt.result(), ResultCode::Ok);

        tokio::task::yield_now().await;
        assert!(t.master_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_unknown_partition_succeeds() {
        let mut t = TestNode::new(16);
        let req = DeleteDataPartitionRequest { partition_id: 99 };
        let task = AdminTask::new(Opcode::DeleteDataPartition as u8, 99, &req).unwrap();
        send_task(&t, Opcode::DeleteDataPartition, &task).await;

        let (_, response): (_, DeleteDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_delete_malformed_request_fails() {
        let mut t = TestNode::new(16);
        t.extent_partition(3, 1 << 20);
        let task = AdminTask::new(Opcode::DeleteDataPartition as u8, 3, &"not a request").unwrap();
        send_task(&t, Opcode::DeleteDataPartition, &task).await;

        let (_, response): (_, DeleteDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Fail);
        assert!(response.result.contains("decode error"));
        assert!(t.node.space().get_partition(3).is_some());
    }

    #[tokio::test]
    async fn test_load_partition() {
        let mut t = TestNode::new(16);
        let dp = t.extent_partition(3, 1 << 20);
        dp.store().files().write(1, 0, 4, b"abcd", 0).unwrap();
        dp.set_status(PartitionStatus::ReadOnly);

        let task = AdminTask::new(
            Opcode::LoadDataPartition as u8,
            3,
            &LoadDataPartitionRequest { partition_id: 3 },
        )
        .unwrap();
        send_task(&t, Opcode::LoadDataPartition, &task).await;
        let (_, response): (_, LoadDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Success);
        assert_eq!(response.partition_status, "ReadOnly");
        assert_eq!(response.used, 4);
        assert_eq!(response.snapshot.len(), 1);

        let task = AdminTask::new(
            Opcode::LoadDataPartition as u8,
            5,
            &LoadDataPartitionRequest { partition_id: 5 },
        )
        .unwrap();
        send_task(&t, Opcode::LoadDataPartition, &task).await;
        let (_, response): (_, LoadDataPartitionResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Fail);
        assert_eq!(response.result, "dataPartition(5) not found");
    }

    #[tokio::test]
    async fn test_heartbeat_registers_master_and_reports_space() {
        let mut t = TestNode::new(16);
        t.extent_partition(1, 1000);
        t.blob_partition(2, 2000);

        let req = HeartBeatRequest { master_addr: "10.0.0.1:17010".into() };
        let task = AdminTask::new(Opcode::DataNodeHeartbeat as u8, 0, &req).unwrap();
        send_task(&t, Opcode::DataNodeHeartbeat, &task).await;

        let (_, response): (_, DataNodeHeartbeatResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Success);
        assert_eq!(response.created_partition_count, 2);
        assert_eq!(response.total, 1 << 30);
        assert_eq!(response.partition_reports.len(), 2);
        assert_eq!(response.partition_reports[1].store_mode, StoreMode::Blob);
        assert_eq!(response.partition_reports[0].disk_path, "/d1");
        assert_eq!(t.master.nodes(), vec!["10.0.0.1:17010".to_string()]);
    }

    #[tokio::test]
    async fn test_heartbeat_illegal_opcode_still_carries_snapshot() {
        let mut t = TestNode::new(16);
        t.extent_partition(1, 1000);
        let req = HeartBeatRequest { master_addr: "10.0.0.1:17010".into() };
        let task = AdminTask::new(Opcode::LoadDataPartition as u8, 0, &req).unwrap();
        send_task(&t, Opcode::DataNodeHeartbeat, &task).await;

        let (_, response): (_, DataNodeHeartbeatResponse) = next_report(&mut t).await;
        assert_eq!(response.status, TaskStatus::Fail);
        assert_eq!(response.created_partition_count, 1);
        assert!(t.master.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_master_failure_does_not_change_ack() {
        let t = TestNode::new(16);
        t.master.set_failing(true);
        let pkt = send_task(&t, Opcode::CreateDataPartition, &create_task(4, 1 << 20, "extent")).await;
        assert_eq!(pkt.result(), ResultCode::Ok);
        assert!(t.node.space().get_partition(4).is_some());
    }
}
