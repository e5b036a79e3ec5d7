//! Strata Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, shared data
//! types and the full-block buffer pool used across all Strata components.

pub mod buffer;
pub mod config;
pub mod error;
pub mod types;

pub use buffer::BufferPool;
pub use config::DataNodeConfig;
pub use error::{Error, Result};
pub use types::*;
