//! Command batching over a single connection.
//!
//! - `CommandEntry`: one queued write, optionally capturing a generated id
//! - `UnitOfWork`: the queue plus the transaction lifecycle around it

pub mod command;
pub mod unit_of_work;

pub use command::{CommandEntry, GeneratedIdCapture, GeneratedIdTarget};
pub use unit_of_work::UnitOfWork;
