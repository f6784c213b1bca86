//! Shared test fixtures.
//!
//! `RecordingConnection` is an in-process `Connection` that records every call
//! in a shared journal, so tests can assert on exactly what the unit of work
//! asked the database to do.

#![allow(dead_code)]

use db_unit_of_work::db::Connection;
use db_unit_of_work::error::{DbError, DbResult};
use db_unit_of_work::models::{IsolationLevel, Row, SqlCommand, TransactionHandle};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    Begin(IsolationLevel, String),
    Execute(String, Option<String>),
    Scalar(String, Option<String>),
    Query(String, Option<String>),
    Commit(String),
    Rollback(String),
    Close,
}

/// Call log shared between a test and the connection it handed away.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(..)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Event::Close))
    }

    /// SQL of every execute/scalar call, in order, with its transaction id.
    pub fn writes(&self) -> Vec<(String, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql, tx) | Event::Scalar(sql, tx) => Some((sql, tx)),
                _ => None,
            })
            .collect()
    }
}

pub struct RecordingConnection {
    journal: Journal,
    open: bool,
    active: Option<String>,
    rows_affected: u64,
    scalar: JsonValue,
    rows: Vec<Row>,
    fail_on: Option<String>,
    fail_commit: bool,
}

impl RecordingConnection {
    /// A closed connection that reports one affected row per write.
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            open: false,
            active: None,
            rows_affected: 1,
            scalar: JsonValue::Null,
            rows: Vec::new(),
            fail_on: None,
            fail_commit: false,
        }
    }

    pub fn opened(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    pub fn with_scalar(mut self, scalar: JsonValue) -> Self {
        self.scalar = scalar;
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Fail any statement whose SQL contains `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    fn check(&self, command: &SqlCommand, transaction: Option<&TransactionHandle>) -> DbResult<()> {
        if !self.open {
            return Err(DbError::connection("Connection is closed", "Open it first"));
        }
        if let Some(tx) = transaction {
            if self.active.as_deref() != Some(tx.id()) {
                return Err(DbError::transaction("Transaction is no longer active", tx.id()));
            }
        }
        match &self.fail_on {
            Some(needle) if command.sql.contains(needle.as_str()) => Err(DbError::database(
                format!("statement failed: {}", command.sql),
                Some("23000".to_string()),
                "Check the statement",
            )),
            _ => Ok(()),
        }
    }
}

fn tx_id(transaction: Option<&TransactionHandle>) -> Option<String> {
    transaction.map(|t| t.id().to_string())
}

impl Connection for RecordingConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> DbResult<()> {
        self.journal.push(Event::Open);
        self.open = true;
        Ok(())
    }

    async fn begin(&mut self, isolation_level: IsolationLevel) -> DbResult<TransactionHandle> {
        if let Some(active) = &self.active {
            return Err(DbError::transaction("Nested transaction", active.clone()));
        }
        let handle = TransactionHandle::new(isolation_level);
        self.journal
            .push(Event::Begin(isolation_level, handle.id().to_string()));
        self.active = Some(handle.id().to_string());
        Ok(handle)
    }

    async fn execute(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> DbResult<u64> {
        self.journal
            .push(Event::Execute(command.sql.clone(), tx_id(transaction)));
        self.check(command, transaction)?;
        Ok(self.rows_affected)
    }

    async fn execute_scalar(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> DbResult<JsonValue> {
        self.journal
            .push(Event::Scalar(command.sql.clone(), tx_id(transaction)));
        self.check(command, transaction)?;
        Ok(self.scalar.clone())
    }

    async fn query(
        &mut self,
        command: &SqlCommand,
        transaction: Option<&TransactionHandle>,
    ) -> DbResult<Vec<Row>> {
        self.journal
            .push(Event::Query(command.sql.clone(), tx_id(transaction)));
        self.check(command, transaction)?;
        Ok(self.rows.clone())
    }

    async fn commit(&mut self, transaction: &TransactionHandle) -> DbResult<()> {
        self.journal.push(Event::Commit(transaction.id().to_string()));
        if self.fail_commit {
            return Err(DbError::database("commit failed", None, "Retry the batch"));
        }
        self.active = None;
        Ok(())
    }

    async fn rollback(&mut self, transaction: &TransactionHandle) -> DbResult<()> {
        self.journal
            .push(Event::Rollback(transaction.id().to_string()));
        self.active = None;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.journal.push(Event::Close);
        self.open = false;
        Ok(())
    }
}
