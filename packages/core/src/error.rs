//! Error taxonomy for job processing.

use serde::{Deserialize, Serialize};

use crate::{Backend, Operation};

/// Every way a job can fail.
///
/// Expected failures (malformed input, missing sources) and unexpected ones
/// (backend faults) share this enum so the consumer handles them in a single
/// branch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The payload was not a job message at all.
    #[error("unparseable job message: {0}")]
    Unparseable(String),

    #[error("malformed job: {0}")]
    Malformed(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("no handler for {operation} on {backend}")]
    Unroutable {
        operation: Operation,
        backend: Backend,
    },

    #[error("{failed} callback publish(es) failed: {reasons}")]
    CallbackPublish { failed: usize, reasons: String },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Unparseable(_) => ErrorKind::Unparseable,
            JobError::Malformed(_) => ErrorKind::Malformed,
            JobError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            JobError::Backend(_) => ErrorKind::Backend,
            JobError::Unroutable { .. } => ErrorKind::Unroutable,
            JobError::CallbackPublish { .. } => ErrorKind::CallbackPublish,
        }
    }

    /// Expected failures are part of normal operation and never logged as faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, JobError::Malformed(_) | JobError::SourceNotFound(_))
    }
}

/// Field-less discriminant of [`JobError`], carried by outcomes and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unparseable,
    Malformed,
    SourceNotFound,
    Backend,
    Unroutable,
    CallbackPublish,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unparseable => "unparseable",
            ErrorKind::Malformed => "malformed",
            ErrorKind::SourceNotFound => "source_not_found",
            ErrorKind::Backend => "backend",
            ErrorKind::Unroutable => "unroutable",
            ErrorKind::CallbackPublish => "callback_publish",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
