//! Queued write commands.
//!
//! A `CommandEntry` is one pending write: a `SqlCommand` and, optionally, a
//! request to read a database-generated id back into a caller-owned entity.
//! Entries hold no connection; they run against whichever connection the unit
//! of work that owns them hands in.

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, SqlCommand, TransactionHandle};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// An entity that can receive a database-generated id.
///
/// Implement it by hand, or with [`generated_id_target!`](crate::generated_id_target)
/// for structs whose id fields are plain integers.
pub trait GeneratedIdTarget: Send {
    /// Whether `field` names a field that accepts a generated id.
    fn has_generated_id_field(&self, field: &str) -> bool;

    /// Store `value` into `field`.
    ///
    /// Fails with a configuration error when the field does not exist or
    /// cannot hold the value.
    fn set_generated_id(&mut self, field: &str, value: i64) -> DbResult<()>;
}

/// Implement [`GeneratedIdTarget`] for a struct with integer id fields.
///
/// ```
/// use db_unit_of_work::generated_id_target;
///
/// #[derive(Default)]
/// struct Order {
///     id: i64,
///     invoice_no: u32,
/// }
///
/// generated_id_target!(Order { id, invoice_no });
/// ```
#[macro_export]
macro_rules! generated_id_target {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::uow::GeneratedIdTarget for $ty {
            fn has_generated_id_field(&self, field: &str) -> bool {
                matches!(field, $(stringify!($field))|+)
            }

            fn set_generated_id(
                &mut self,
                field: &str,
                value: i64,
            ) -> $crate::error::DbResult<()> {
                match field {
                    $(
                        stringify!($field) => {
                            self.$field = ::std::convert::TryFrom::try_from(value).map_err(|_| {
                                $crate::error::DbError::configuration(
                                    format!("Generated id {} does not fit field '{}'", value, field),
                                    field,
                                )
                            })?;
                            Ok(())
                        }
                    )+
                    _ => Err($crate::error::DbError::configuration(
                        format!("Unknown generated id field '{}'", field),
                        field,
                    )),
                }
            }
        }
    };
}

/// Where a generated id goes: a weakly held entity and one of its fields.
#[derive(Clone)]
pub struct GeneratedIdCapture {
    target: Weak<Mutex<dyn GeneratedIdTarget>>,
    field: String,
}

impl GeneratedIdCapture {
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Whether the entity is still alive.
    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }

    fn target(&self) -> DbResult<Arc<Mutex<dyn GeneratedIdTarget>>> {
        self.target.upgrade().ok_or_else(|| {
            DbError::configuration(
                "The entity to receive the generated id has been dropped",
                self.field.as_str(),
            )
        })
    }

    fn validate(&self) -> DbResult<()> {
        let target = self.target()?;
        let entity = target
            .lock()
            .map_err(|_| DbError::internal("Generated id target lock poisoned"))?;
        if entity.has_generated_id_field(&self.field) {
            Ok(())
        } else {
            Err(DbError::configuration(
                format!("Entity has no generated id field '{}'", self.field),
                self.field.as_str(),
            ))
        }
    }

    fn assign(&self, value: i64) -> DbResult<()> {
        let target = self.target()?;
        let mut entity = target
            .lock()
            .map_err(|_| DbError::internal("Generated id target lock poisoned"))?;
        entity.set_generated_id(&self.field, value)
    }
}

impl std::fmt::Debug for GeneratedIdCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedIdCapture")
            .field("field", &self.field)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// One pending write.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    command: SqlCommand,
    capture: Option<GeneratedIdCapture>,
}

impl CommandEntry {
    pub fn new(command: impl Into<SqlCommand>) -> Self {
        Self {
            command: command.into(),
            capture: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.command = self.command.with_param(param);
        self
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.command = self.command.with_params(params);
        self
    }

    /// Write the command's scalar result into `field` of `entity`.
    ///
    /// Only a weak reference is kept. An empty `field` leaves the entry a plain
    /// row-count write.
    pub fn with_generated_id<E>(mut self, entity: &Arc<Mutex<E>>, field: impl Into<String>) -> Self
    where
        E: GeneratedIdTarget + 'static,
    {
        let field = field.into();
        if field.is_empty() {
            self.capture = None;
            return self;
        }
        let target: Weak<Mutex<E>> = Arc::downgrade(entity);
        self.capture = Some(GeneratedIdCapture { target, field });
        self
    }

    pub fn command(&self) -> &SqlCommand {
        &self.command
    }

    pub fn capture(&self) -> Option<&GeneratedIdCapture> {
        self.capture.as_ref()
    }

    /// Run the entry.
    ///
    /// Without a capture this returns the rows affected. With one, the scalar
    /// result is written to the entity and the return value is `1` when the
    /// id is positive, `0` otherwise.
    pub async fn execute<C: Connection>(
        &self,
        connection: &mut C,
        transaction: Option<&TransactionHandle>,
    ) -> DbResult<u64> {
        let Some(capture) = &self.capture else {
            return connection.execute(&self.command, transaction).await;
        };

        capture.validate()?;
        let scalar = connection.execute_scalar(&self.command, transaction).await?;
        let id = generated_id(&scalar, capture.field())?;
        capture.assign(id)?;

        debug!(field = %capture.field(), id, "Generated id captured");
        Ok(u64::from(id > 0))
    }
}

impl From<SqlCommand> for CommandEntry {
    fn from(command: SqlCommand) -> Self {
        Self::new(command)
    }
}

impl From<&str> for CommandEntry {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for CommandEntry {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Interpret a scalar result as an integer id. `null` (no row) reads as 0.
fn generated_id(scalar: &JsonValue, field: &str) -> DbResult<i64> {
    let unassignable = || {
        DbError::configuration(
            format!("Scalar result {} cannot be assigned to '{}'", scalar, field),
            field,
        )
    };

    match scalar {
        JsonValue::Null => Ok(0),
        JsonValue::Number(n) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            // i64::MAX as f64 rounds up to 2^63, which no i64 can hold
            .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
            .ok_or_else(unassignable),
        JsonValue::Number(n) => n.as_i64().ok_or_else(unassignable),
        JsonValue::String(s) => s.trim().parse::<i64>().map_err(|_| unassignable()),
        _ => Err(unassignable()),
    }
}
