//! Strata DataNode - request processing core
//!
//! A data node terminates packet connections from clients, peer replicas
//! and the master, routes every request to the partition engine it names,
//! and drives the repair and compaction protocols between replicas.

pub mod admin;
pub mod compact;
pub mod conn;
pub mod dispatch;
pub mod gate;
pub mod metrics;
pub mod node;
pub mod repair;
pub mod server;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_util;

pub use compact::Compactor;
pub use conn::{FramedConn, PacketConn};
pub use metrics::OpMetrics;
pub use node::DataNode;
pub use repair::{RepairOutcome, RepairRecord, decode_repair_frame};
pub use server::serve;
