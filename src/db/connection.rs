//! The database-access contract the unit of work is written against.
//!
//! A `Connection` is one live session with a database. It opens and closes,
//! hands out at most one transaction at a time, and executes commands either
//! inside that transaction or outside any transaction. The unit of work never
//! talks to a driver directly; `DbConnection` is the sqlx-backed
//! implementation, and tests substitute their own.

use crate::error::DbResult;
use crate::models::{IsolationLevel, Row, SqlCommand, TransactionHandle};
use serde_json::Value as JsonValue;
use std::future::Future;

/// Returned futures are not `Send`; drive them from the owning task.
pub trait Connection: Send {
    /// Whether the session is currently open.
    fn is_open(&self) -> bool;

    /// Open the session. Opening an open session is a no-op.
    fn open(&mut self) -> impl Future<Output = DbResult<()>>;

    /// Start a transaction at the given isolation level.
    ///
    /// Implementations do not nest: beginning while a transaction is active
    /// is an error.
    fn begin(
        &mut self,
        isolation_level: IsolationLevel,
    ) -> impl Future<Output = DbResult<TransactionHandle>>;

    /// Execute a write and return the number of rows affected.
    fn execute(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> impl Future<Output = DbResult<u64>>;

    /// Execute and return the first column of the first row (`null` when no row).
    fn execute_scalar(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> impl Future<Output = DbResult<JsonValue>>;

    /// Execute and return every row.
    fn query(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> impl Future<Output = DbResult<Vec<Row>>>;

    fn commit(&mut self, transaction: &TransactionHandle)
    -> impl Future<Output = DbResult<()>>;

    fn rollback(
        &mut self,
        transaction: &TransactionHandle,
    ) -> impl Future<Output = DbResult<()>>;

    /// Close the session. Closing a closed session is a no-op.
    fn close(&mut self) -> impl Future<Output = DbResult<()>>;
}
