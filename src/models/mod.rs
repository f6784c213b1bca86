//! Data models for the unit of work.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionConfigError, DatabaseType, IsolationLevel, TransactionHandle,
    TransactionState,
};
pub use query::{
    CommandType, DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam, Row, SqlCommand,
};
