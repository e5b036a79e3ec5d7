//! Strata Client - Master communication
//!
//! This crate provides the client the data node uses to report admin-task
//! results to the cluster master.

pub mod master;

// Re-exports
pub use master::{DATA_NODE_RESPONSE_PATH, HttpMasterClient, MasterClient};
