//! Database Unit of Work
//!
//! This library batches SQL writes on one database connection (SQLite,
//! PostgreSQL, MySQL) and commits them either one by one or atomically in a
//! single transaction. Generated ids can be read back into caller-owned
//! entities as part of the batch.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod uow;

pub use config::Config;
pub use db::{Connection, DbConnection};
pub use error::{DbError, DbResult};
pub use uow::{CommandEntry, GeneratedIdTarget, UnitOfWork};
