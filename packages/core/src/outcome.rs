//! Job outcomes and the callback messages built from them.

use crate::{ErrorKind, Job, JobError};

/// Result of executing one job. Consumed once by the callback publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobError),
}

impl JobOutcome {
    pub fn from_result(result: Result<(), JobError>) -> Self {
        match result {
            Ok(()) => JobOutcome::Succeeded,
            Err(error) => JobOutcome::Failed(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobOutcome::Succeeded => None,
            JobOutcome::Failed(error) => Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(JobError::kind)
    }
}

/// A single result message bound for a destination queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackMessage {
    pub queue: String,
    pub payload: Vec<u8>,
}

impl CallbackMessage {
    /// Messages for the callback list matching `outcome`, in declaration order.
    pub fn for_outcome(job: &Job, outcome: &JobOutcome) -> Vec<Self> {
        Self::from_callbacks(job.callbacks(outcome.succeeded()))
    }

    pub fn from_callbacks(callbacks: &[crate::Callback]) -> Vec<Self> {
        callbacks
            .iter()
            .map(|callback| CallbackMessage {
                queue: callback.queue.clone(),
                payload: callback.payload_bytes(),
            })
            .collect()
    }
}
