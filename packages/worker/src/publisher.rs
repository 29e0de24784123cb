//! Fan-out of callback messages to caller-named queues.

use std::sync::Arc;

use futures_util::future::join_all;
use job_core::{CallbackMessage, Job, JobError, JobOutcome};

use crate::broker::{BrokerError, Publisher};

/// What a fan-out did. Failures are kept per entry; nothing is retracted.
#[derive(Debug, Default)]
pub(crate) struct PublishSummary {
    pub published: usize,
    pub failures: Vec<BrokerError>,
}

impl PublishSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn into_result(self) -> Result<usize, JobError> {
        if self.failures.is_empty() {
            return Ok(self.published);
        }
        let reasons: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        Err(JobError::CallbackPublish {
            failed: reasons.len(),
            reasons: reasons.join("; "),
        })
    }
}

#[derive(Clone)]
pub struct CallbackPublisher {
    broker: Arc<dyn Publisher>,
}

impl CallbackPublisher {
    pub fn new(broker: Arc<dyn Publisher>) -> Self {
        Self { broker }
    }

    /// Publish the callbacks matching `outcome`: `onSuccess` after a success,
    /// `onFailure` otherwise. Returns how many were published.
    pub async fn publish(&self, job: &Job, outcome: &JobOutcome) -> Result<usize, JobError> {
        self.send(&CallbackMessage::for_outcome(job, outcome))
            .await
            .into_result()
    }

    /// Declare and publish every message concurrently. Every entry is
    /// attempted even when another one fails.
    pub(crate) async fn send(&self, messages: &[CallbackMessage]) -> PublishSummary {
        if messages.is_empty() {
            return PublishSummary::default();
        }

        let results = join_all(messages.iter().map(|message| self.send_one(message))).await;

        let mut summary = PublishSummary::default();
        for result in results {
            match result {
                Ok(()) => summary.published += 1,
                Err(error) => summary.failures.push(error),
            }
        }
        summary
    }

    async fn send_one(&self, message: &CallbackMessage) -> Result<(), BrokerError> {
        self.broker.declare_durable(&message.queue).await?;
        self.broker.publish(&message.queue, &message.payload).await?;
        tracing::debug!(
            queue = %message.queue,
            bytes = message.payload.len(),
            "published callback"
        );
        Ok(())
    }
}

impl std::fmt::Debug for CallbackPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPublisher").finish_non_exhaustive()
    }
}
