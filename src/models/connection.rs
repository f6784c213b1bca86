//! Connection-related data models.
//!
//! This module defines types for database connection configuration, isolation
//! levels, and the handles the connection hands out for open transactions.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transaction isolation level, passed through to the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
    /// Pending changes from more highly isolated transactions cannot be overwritten.
    Chaos,
    /// Let the engine pick its own default.
    Unspecified,
}

impl IsolationLevel {
    /// SQL spelling of the level, where standard SQL has one.
    pub fn sql_name(&self) -> Option<&'static str> {
        match self {
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
            Self::Snapshot | Self::Chaos | Self::Unspecified => None,
        }
    }

    /// Statements that open a transaction at this level on the given database.
    ///
    /// Levels the engine cannot express are rejected rather than substituted.
    pub fn begin_statements(&self, db_type: DatabaseType) -> DbResult<Vec<String>> {
        let unsupported = || {
            DbError::invalid_input(format!(
                "Isolation level {} is not supported by {}",
                self, db_type
            ))
        };

        match (db_type, self) {
            (_, Self::Chaos) => Err(unsupported()),
            // SQLite transactions are always serializable.
            (DatabaseType::SQLite, _) => Ok(vec!["BEGIN".to_string()]),
            (_, Self::Snapshot) => Err(unsupported()),
            (DatabaseType::MySQL, level) => Ok(match level.sql_name() {
                Some(name) => vec![
                    format!("SET TRANSACTION ISOLATION LEVEL {}", name),
                    "START TRANSACTION".to_string(),
                ],
                None => vec!["START TRANSACTION".to_string()],
            }),
            (DatabaseType::PostgreSQL, level) => Ok(match level.sql_name() {
                Some(name) => vec![format!("BEGIN ISOLATION LEVEL {}", name)],
                None => vec!["BEGIN".to_string()],
            }),
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
            Self::Chaos => "chaos",
            Self::Unspecified => "unspecified",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    /// Accepts `read_committed`, `read-committed`, `ReadCommitted` and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" => Ok(Self::ReadUncommitted),
            "readcommitted" => Ok(Self::ReadCommitted),
            "repeatableread" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            "snapshot" => Ok(Self::Snapshot),
            "chaos" => Ok(Self::Chaos),
            "unspecified" => Ok(Self::Unspecified),
            _ => Err(format!("Unknown isolation level: {}", s)),
        }
    }
}

/// Configuration for a database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Default command timeout. None means the built-in default (30s).
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// None means the built-in default (10s).
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl ConnectionConfig {
    /// Create a new connection configuration.
    pub fn new(
        id: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Result<Self, ConnectionConfigError> {
        let id = id.into();
        let connection_string = connection_string.into();

        // Validate ID
        if id.is_empty() {
            return Err(ConnectionConfigError::EmptyId);
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConnectionConfigError::InvalidId(id));
        }

        // Detect database type
        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| ConnectionConfigError::UnknownDatabaseType(connection_string.clone()))?;

        Ok(Self {
            id,
            db_type,
            connection_string,
            command_timeout_secs: None,
            connect_timeout_secs: None,
        })
    }

    /// Set the default command timeout.
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = Some(secs);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        // Simple masking: replace password in URL
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                let prefix = &self.connection_string[..colon_pos + 1];
                let suffix = &self.connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.connection_string.clone()
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    /// Connection ID is empty
    #[error("Connection ID cannot be empty")]
    EmptyId,

    /// Connection ID contains invalid characters
    #[error("Connection ID contains invalid characters: {0}")]
    InvalidId(String),

    /// Could not determine database type from connection string
    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),
}

/// Lifecycle state of a transaction handed out by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_ended(&self) -> bool {
        !self.is_active()
    }
}

/// Identifies one transaction opened on a connection.
///
/// The handle carries no database resources; the connection that issued it
/// decides whether it still names the active transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionHandle {
    id: String,
    isolation_level: IsolationLevel,
    started_at: DateTime<Utc>,
}

impl TransactionHandle {
    /// Create a handle with a fresh transaction id.
    pub fn new(isolation_level: IsolationLevel) -> Self {
        Self {
            id: generate_transaction_id(),
            isolation_level,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
