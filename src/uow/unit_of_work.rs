//! The unit of work.
//!
//! `UnitOfWork` owns one connection and batches writes against it. Commands
//! added while no transaction is open are queued and run on the next flush;
//! commands added inside a transaction run immediately.
//!
//! # Flushing
//!
//! A flush takes the whole queue before executing anything. If a command
//! fails, the commands after it are discarded with it. Outside a transaction
//! the ones already executed stay applied; inside the scoped transaction of
//! `save_changes` they are rolled back.

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{IsolationLevel, Row, SqlCommand, TransactionHandle, TransactionState};
use crate::uow::command::CommandEntry;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

/// The transaction slot of a unit of work.
#[derive(Debug, Default)]
enum TransactionSlot {
    #[default]
    Idle,
    Active(TransactionHandle),
    /// Committed or rolled back. Queues like `Idle`; the handle is kept until
    /// the next transaction replaces it.
    Completed {
        transaction: TransactionHandle,
        state: TransactionState,
    },
}

impl TransactionSlot {
    fn active(&self) -> Option<&TransactionHandle> {
        match self {
            Self::Active(tx) => Some(tx),
            _ => None,
        }
    }
}

/// Batches writes on one connection and commits them individually or as a group.
pub struct UnitOfWork<C: Connection> {
    /// `None` once disposed.
    connection: Option<C>,
    slot: TransactionSlot,
    queue: Vec<CommandEntry>,
    default_isolation: IsolationLevel,
}

impl<C: Connection> UnitOfWork<C> {
    /// Take ownership of `connection`, opening it if it is closed.
    pub async fn new(mut connection: C) -> DbResult<Self> {
        if !connection.is_open() {
            connection.open().await?;
        }
        Ok(Self {
            connection: Some(connection),
            slot: TransactionSlot::Idle,
            queue: Vec::new(),
            default_isolation: IsolationLevel::default(),
        })
    }

    /// Isolation level used by `begin_transaction` and by the scoped
    /// transaction of `save_changes`.
    pub fn with_default_isolation(mut self, isolation_level: IsolationLevel) -> Self {
        self.default_isolation = isolation_level;
        self
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    /// Number of queued commands.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn is_in_transaction(&self) -> bool {
        matches!(self.slot, TransactionSlot::Active(_))
    }

    /// The current transaction, or the last one if it has completed.
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        match &self.slot {
            TransactionSlot::Idle => None,
            TransactionSlot::Active(tx) => Some(tx),
            TransactionSlot::Completed { transaction, .. } => Some(transaction),
        }
    }

    pub fn transaction_state(&self) -> Option<TransactionState> {
        match &self.slot {
            TransactionSlot::Idle => None,
            TransactionSlot::Active(_) => Some(TransactionState::Active),
            TransactionSlot::Completed { state, .. } => Some(*state),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.connection.is_none()
    }

    /// Begin a transaction at the default isolation level.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        self.begin_transaction_with(self.default_isolation).await
    }

    /// Begin a transaction at `isolation_level`.
    ///
    /// A no-op while a transaction is active. Commands queued before the call
    /// are flushed first, each on its own, outside any transaction.
    pub async fn begin_transaction_with(&mut self, isolation_level: IsolationLevel) -> DbResult<()> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;

        if let TransactionSlot::Active(tx) = &self.slot {
            debug!(transaction_id = %tx.id(), "Transaction already active");
            return Ok(());
        }

        if !self.queue.is_empty() {
            let entries = std::mem::take(&mut self.queue);
            let count = entries.len();
            let affected = run_entries(connection, entries, None).await?;
            debug!(
                commands = count,
                affected, "Flushed queued commands before beginning a transaction"
            );
        }

        let transaction = connection.begin(isolation_level).await?;
        debug!(transaction_id = %transaction.id(), "Unit of work entered transaction");
        self.slot = TransactionSlot::Active(transaction);
        Ok(())
    }

    /// Queue a command.
    ///
    /// Inside a transaction the queue is flushed against it at once and the
    /// combined count is returned. Otherwise the command waits for the next
    /// flush and this returns 0.
    pub async fn add_command(&mut self, entry: impl Into<CommandEntry>) -> DbResult<u64> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;
        self.queue.push(entry.into());

        match &self.slot {
            TransactionSlot::Active(tx) => {
                let entries = std::mem::take(&mut self.queue);
                run_entries(connection, entries, Some(tx)).await
            }
            _ => {
                debug!(pending = self.queue.len(), "Command queued");
                Ok(0)
            }
        }
    }

    /// Execute every queued command and return the combined count.
    ///
    /// With more than one command and no open transaction, the batch runs in a
    /// scoped transaction that is committed here and never stored on the
    /// unit of work. The queue is empty afterwards whatever the outcome.
    pub async fn save_changes(&mut self) -> DbResult<u64> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;
        let entries = std::mem::take(&mut self.queue);

        match &self.slot {
            TransactionSlot::Active(tx) => run_entries(connection, entries, Some(tx)).await,
            _ if entries.len() > 1 => run_scoped(connection, entries, self.default_isolation).await,
            _ => run_entries(connection, entries, None).await,
        }
    }

    /// Commit the active transaction. A no-op when there is none.
    ///
    /// Queued commands are left in place.
    pub async fn commit(&mut self) -> DbResult<()> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;
        let Some(tx) = self.slot.active() else {
            debug!("No active transaction to commit");
            return Ok(());
        };

        connection.commit(tx).await?;
        self.complete(TransactionState::Committed);
        Ok(())
    }

    /// Roll back the active transaction. A no-op when there is none.
    ///
    /// Queued commands are left in place.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;
        let Some(tx) = self.slot.active() else {
            debug!("No active transaction to roll back");
            return Ok(());
        };

        let result = connection.rollback(tx).await;
        self.complete(TransactionState::RolledBack);
        result
    }

    /// Release the connection, the transaction and the queue.
    ///
    /// An active transaction is rolled back and the connection is closed.
    /// Disposing twice is a no-op; every other operation fails afterwards.
    pub async fn dispose(&mut self) -> DbResult<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        if !self.queue.is_empty() {
            warn!(
                discarded = self.queue.len(),
                "Disposing unit of work with queued commands; they were never executed"
            );
            self.queue.clear();
        }

        if let TransactionSlot::Active(tx) = std::mem::take(&mut self.slot) {
            rollback_quietly(&mut connection, &tx).await;
        }

        connection.close().await?;
        info!("Unit of work disposed");
        Ok(())
    }

    /// Execute a command and return the first column of the first row.
    pub async fn execute_scalar(&mut self, command: impl Into<SqlCommand>) -> DbResult<JsonValue> {
        let command = command.into();
        let (connection, transaction) = self.forward()?;
        connection.execute_scalar(&command, transaction).await
    }

    /// Execute a command and return its rows.
    pub async fn query(&mut self, command: impl Into<SqlCommand>) -> DbResult<Vec<Row>> {
        let command = command.into();
        let (connection, transaction) = self.forward()?;
        connection.query(&command, transaction).await
    }

    /// Execute a command and deserialize each row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &mut self,
        command: impl Into<SqlCommand>,
    ) -> DbResult<Vec<T>> {
        self.query(command)
            .await?
            .into_iter()
            .map(deserialize_row)
            .collect()
    }

    /// Execute a command and deserialize its first row, if any.
    pub async fn query_first<T: DeserializeOwned>(
        &mut self,
        command: impl Into<SqlCommand>,
    ) -> DbResult<Option<T>> {
        self.query(command)
            .await?
            .into_iter()
            .next()
            .map(deserialize_row)
            .transpose()
    }

    /// The connection and the active transaction, for reads that bypass the queue.
    fn forward(&mut self) -> DbResult<(&mut C, Option<&TransactionHandle>)> {
        let connection = self.connection.as_mut().ok_or(DbError::Disposed)?;
        Ok((connection, self.slot.active()))
    }

    fn complete(&mut self, state: TransactionState) {
        self.slot = match std::mem::take(&mut self.slot) {
            TransactionSlot::Active(transaction) => {
                TransactionSlot::Completed { transaction, state }
            }
            other => other,
        };
    }
}

impl<C: Connection> Drop for UnitOfWork<C> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            warn!(
                pending = self.queue.len(),
                in_transaction = self.is_in_transaction(),
                "Unit of work dropped without dispose"
            );
        }
    }
}

impl<C: Connection> std::fmt::Debug for UnitOfWork<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("slot", &self.slot)
            .field("pending", &self.queue.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Run `entries` in order and sum their counts, stopping at the first failure.
async fn run_entries<C: Connection>(
    connection: &mut C,
    entries: Vec<CommandEntry>,
    transaction: Option<&TransactionHandle>,
) -> DbResult<u64> {
    let total = entries.len();
    let mut affected = 0;

    for (index, entry) in entries.iter().enumerate() {
        match entry.execute(connection, transaction).await {
            Ok(count) => affected += count,
            Err(e) => {
                let discarded = total - index - 1;
                if discarded > 0 {
                    warn!(
                        discarded,
                        executed = index,
                        transaction_id = ?transaction.map(|t| t.id()),
                        error = %e,
                        "Command failed during flush; remaining queued commands discarded"
                    );
                }
                return Err(e);
            }
        }
    }

    Ok(affected)
}

/// Run `entries` inside a transaction of their own.
async fn run_scoped<C: Connection>(
    connection: &mut C,
    entries: Vec<CommandEntry>,
    isolation_level: IsolationLevel,
) -> DbResult<u64> {
    let scoped = connection.begin(isolation_level).await?;
    debug!(
        transaction_id = %scoped.id(),
        commands = entries.len(),
        "Flushing queued commands in a scoped transaction"
    );

    let result = match run_entries(connection, entries, Some(&scoped)).await {
        Ok(affected) => connection.commit(&scoped).await.map(|_| affected),
        Err(e) => Err(e),
    };

    if result.is_err() {
        rollback_quietly(connection, &scoped).await;
    }
    result
}

async fn rollback_quietly<C: Connection>(connection: &mut C, transaction: &TransactionHandle) {
    if let Err(e) = connection.rollback(transaction).await {
        warn!(
            transaction_id = %transaction.id(),
            error = %e,
            "Rollback failed"
        );
    }
}

fn deserialize_row<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(row))
        .map_err(|e| DbError::invalid_input(format!("Row does not match the target type: {}", e)))
}
