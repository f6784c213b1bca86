//! Database access layer.
//!
//! This module provides:
//! - The `Connection` contract the unit of work is written against
//! - `DbConnection`, its sqlx implementation for MySQL, PostgreSQL and SQLite
//! - Parameter binding and row decoding
//! - A dispatch macro for per-backend code

pub mod connection;
pub mod executor;
pub(crate) mod macros;
pub(crate) mod params;
pub mod types;

pub use connection::Connection;
pub use executor::{DEFAULT_CONNECT_TIMEOUT_SECS, DbConnection};
pub use types::RowToJson;
