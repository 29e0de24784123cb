//! Core domain types for the storage job executor.
//!
//! This crate contains the pieces shared by the worker and the daemon:
//! - `Job`, `Operation` and `Backend` for validated units of work
//! - `JobMessage` and `parse_message` for the inbound wire format
//! - `validate` for classifying messages as well-formed or malformed
//! - `JobError`, `JobOutcome` and `CallbackMessage` for result propagation
//! - `JobEvent` for per-delivery lifecycle events

mod error;
mod events;
mod job;
mod message;
mod outcome;
mod validate;

pub use error::{ErrorKind, JobError};
pub use events::{DeliveryId, JobEvent};
pub use job::{Backend, Callback, Job, JobArgs, ObjectLocation, Operation, UnknownVariant};
pub use message::{JobMessage, ParseFailure, parse_message};
pub use outcome::{CallbackMessage, JobOutcome};
pub use validate::validate;
