//! Command-related data models.
//!
//! This module defines the SQL command description shared by queued writes and
//! passthrough reads, and the parameter values bound to it.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::time::Duration;

/// Default command timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;

/// Maximum command timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u32 = 300;

/// A decoded result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Arbitrary JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// The text is a complete SQL statement.
    #[default]
    Text,
    /// The text names a stored procedure; parameters become its arguments.
    StoredProcedure,
}

/// A SQL command: statement text plus everything passed through to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCommand {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Default: connection setting (30), max: 300
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default)]
    pub command_type: CommandType,
    /// Default: false
    #[serde(default)]
    pub decode_binary: bool,
}

impl SqlCommand {
    /// Create a new text command with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout_secs: None,
            command_type: CommandType::Text,
            decode_binary: false,
        }
    }

    /// Add a parameter to this command.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace the parameter list.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Set the command type.
    pub fn with_command_type(mut self, command_type: CommandType) -> Self {
        self.command_type = command_type;
        self
    }

    /// Decode binary columns as UTF-8 text when possible.
    pub fn with_decode_binary(mut self, decode_binary: bool) -> Self {
        self.decode_binary = decode_binary;
        self
    }

    /// Get the effective timeout (with bounds checking).
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout_secs
            .map(|t| Duration::from_secs(t.min(MAX_QUERY_TIMEOUT_SECS) as u64))
            .unwrap_or(default)
    }

    /// Render the statement sent to the given database.
    ///
    /// Text commands are sent verbatim. Stored procedures are rendered as a
    /// `CALL` with one placeholder per parameter.
    pub fn statement(&self, db_type: DatabaseType) -> DbResult<Cow<'_, str>> {
        match self.command_type {
            CommandType::Text => Ok(Cow::Borrowed(&self.sql)),
            CommandType::StoredProcedure => {
                let placeholders: Vec<String> = match db_type {
                    DatabaseType::MySQL => self.params.iter().map(|_| "?".to_string()).collect(),
                    DatabaseType::PostgreSQL => {
                        (1..=self.params.len()).map(|i| format!("${}", i)).collect()
                    }
                    DatabaseType::SQLite => {
                        return Err(DbError::invalid_input(
                            "SQLite does not support stored procedures",
                        ));
                    }
                };
                Ok(Cow::Owned(format!(
                    "CALL {}({})",
                    self.sql,
                    placeholders.join(", ")
                )))
            }
        }
    }
}

impl From<&str> for SqlCommand {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for SqlCommand {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
