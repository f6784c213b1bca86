//! End-to-end tests against SQLite.

use db_unit_of_work::db::{Connection, DbConnection};
use db_unit_of_work::error::DbError;
use db_unit_of_work::generated_id_target;
use db_unit_of_work::models::{ConnectionConfig, IsolationLevel, SqlCommand, TransactionState};
use db_unit_of_work::uow::{CommandEntry, UnitOfWork};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Default)]
struct Customer {
    id: i64,
    name: String,
}

generated_id_target!(Customer { id });

#[derive(Debug, serde::Deserialize, PartialEq)]
struct CustomerRow {
    id: i64,
    name: String,
}

const SCHEMA: &str = "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)";
const TICKETS: &str = "CREATE TABLE tickets (id INTEGER PRIMARY KEY AUTOINCREMENT, note TEXT)";

async fn memory_uow() -> UnitOfWork<DbConnection> {
    let config = ConnectionConfig::new("mem", "sqlite::memory:").unwrap();
    let mut uow = UnitOfWork::new(DbConnection::new(config)).await.unwrap();
    uow.add_command(SCHEMA).await.unwrap();
    uow.save_changes().await.unwrap();
    uow
}

async fn count(uow: &mut UnitOfWork<DbConnection>) -> i64 {
    let value = uow
        .execute_scalar("SELECT COUNT(*) FROM customers")
        .await
        .unwrap();
    value.as_i64().unwrap()
}

fn insert(name: &str) -> CommandEntry {
    CommandEntry::new("INSERT INTO customers (name) VALUES (?)").with_param(name)
}

#[tokio::test]
async fn test_save_changes_commits_batch() {
    let mut uow = memory_uow().await;

    uow.add_command(insert("ada")).await.unwrap();
    uow.add_command(insert("grace")).await.unwrap();
    assert_eq!(count(&mut uow).await, 0);

    assert_eq!(assert_ok!(uow.save_changes().await), 2);
    assert_eq!(count(&mut uow).await, 2);

    let rows: Vec<CustomerRow> = uow
        .query_as("SELECT id, name FROM customers ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            CustomerRow { id: 1, name: "ada".into() },
            CustomerRow { id: 2, name: "grace".into() },
        ]
    );

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_failing_batch_is_rolled_back() {
    let mut uow = memory_uow().await;

    uow.add_command(insert("ada")).await.unwrap();
    // Violates the UNIQUE constraint
    uow.add_command(insert("ada")).await.unwrap();
    uow.add_command(insert("linus")).await.unwrap();

    let err = assert_err!(uow.save_changes().await);
    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(uow.pending_commands(), 0);
    assert_eq!(count(&mut uow).await, 0);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_generated_id_capture_with_returning() {
    let mut uow = memory_uow().await;
    uow.add_command(insert("ada")).await.unwrap();
    uow.save_changes().await.unwrap();

    let customer = Arc::new(Mutex::new(Customer {
        id: 0,
        name: "grace".into(),
    }));
    let name = customer.lock().unwrap().name.clone();
    let entry = CommandEntry::new("INSERT INTO customers (name) VALUES (?) RETURNING id")
        .with_param(name)
        .with_generated_id(&customer, "id");

    uow.add_command(entry).await.unwrap();
    assert_eq!(uow.save_changes().await.unwrap(), 1);
    assert_eq!(customer.lock().unwrap().id, 2);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_generated_id_capture_without_params() {
    let mut uow = memory_uow().await;
    uow.add_command(TICKETS).await.unwrap();
    uow.save_changes().await.unwrap();

    let ticket = Arc::new(Mutex::new(Customer::default()));
    let entry = CommandEntry::new("INSERT INTO tickets DEFAULT VALUES RETURNING id")
        .with_generated_id(&ticket, "id");

    uow.add_command(entry).await.unwrap();
    assert_eq!(assert_ok!(uow.save_changes().await), 1);
    assert_eq!(ticket.lock().unwrap().id, 1);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_generated_id_capture_with_no_row() {
    let mut uow = memory_uow().await;
    uow.add_command(TICKETS).await.unwrap();
    uow.save_changes().await.unwrap();

    let ticket = Arc::new(Mutex::new(Customer { id: 99, name: String::new() }));
    let entry = CommandEntry::new("UPDATE tickets SET note = 'x' WHERE 0 RETURNING id")
        .with_generated_id(&ticket, "id");
    uow.add_command(entry).await.unwrap();
    assert_eq!(assert_ok!(uow.save_changes().await), 0);
    assert_eq!(ticket.lock().unwrap().id, 0);

    ticket.lock().unwrap().id = 99;
    let entry = CommandEntry::new("UPDATE tickets SET note = ? WHERE id = ? RETURNING id")
        .with_param("x")
        .with_param(42)
        .with_generated_id(&ticket, "id");
    uow.begin_transaction().await.unwrap();
    assert_eq!(assert_ok!(uow.add_command(entry).await), 0);
    uow.commit().await.unwrap();
    assert_eq!(ticket.lock().unwrap().id, 0);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_explicit_transaction_rollback() {
    let mut uow = memory_uow().await;

    uow.begin_transaction().await.unwrap();
    assert_eq!(uow.add_command(insert("ada")).await.unwrap(), 1);
    // Reads see the uncommitted row through the same transaction
    assert_eq!(count(&mut uow).await, 1);

    uow.rollback().await.unwrap();
    assert_eq!(uow.transaction_state(), Some(TransactionState::RolledBack));
    assert_eq!(count(&mut uow).await, 0);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_explicit_transaction_commit() {
    let mut uow = memory_uow().await;

    uow.begin_transaction_with(IsolationLevel::Serializable)
        .await
        .unwrap();
    uow.add_command(insert("ada")).await.unwrap();
    uow.add_command(insert("grace")).await.unwrap();
    uow.commit().await.unwrap();

    assert_eq!(count(&mut uow).await, 2);
    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_isolation_rejected() {
    let mut uow = memory_uow().await;

    let err = assert_err!(uow.begin_transaction_with(IsolationLevel::Chaos).await);
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert!(!uow.is_in_transaction());

    // The connection is still usable
    uow.add_command(insert("ada")).await.unwrap();
    assert_eq!(uow.save_changes().await.unwrap(), 1);

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_stored_procedure_rejected_on_sqlite() {
    let mut uow = memory_uow().await;

    let command = SqlCommand::new("add_customer")
        .with_param("ada")
        .with_command_type(db_unit_of_work::models::CommandType::StoredProcedure);
    uow.add_command(command).await.unwrap();

    let err = assert_err!(uow.save_changes().await);
    assert!(matches!(err, DbError::InvalidInput { .. }));

    uow.dispose().await.unwrap();
}

#[tokio::test]
async fn test_dispose_closes_connection_and_keeps_committed_data() {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", temp_file.path().to_str().unwrap());

    let config = ConnectionConfig::new("file", url.as_str()).unwrap();
    let mut uow = UnitOfWork::new(DbConnection::new(config.clone()))
        .await
        .unwrap();
    uow.add_command(SCHEMA).await.unwrap();
    uow.add_command(insert("ada")).await.unwrap();
    assert_eq!(uow.save_changes().await.unwrap(), 1);

    // Uncommitted work is rolled back on dispose
    uow.begin_transaction().await.unwrap();
    uow.add_command(insert("grace")).await.unwrap();
    uow.dispose().await.unwrap();
    assert!(uow.is_disposed());

    let mut reader = DbConnection::connect(config).await.unwrap();
    let names = reader
        .query(&SqlCommand::new("SELECT name FROM customers"), None)
        .await
        .unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0]["name"], json!("ada"));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_query_first_with_params() {
    let mut uow = memory_uow().await;
    uow.add_command(insert("ada")).await.unwrap();
    uow.save_changes().await.unwrap();

    let found: Option<CustomerRow> = uow
        .query_first(SqlCommand::new("SELECT id, name FROM customers WHERE name = ?").with_param("ada"))
        .await
        .unwrap();
    assert_eq!(found.map(|c| c.id), Some(1));

    let missing: Option<CustomerRow> = uow
        .query_first(SqlCommand::new("SELECT id, name FROM customers WHERE name = ?").with_param("bob"))
        .await
        .unwrap();
    assert!(missing.is_none());

    uow.dispose().await.unwrap();
}
