//! The receive loop: parse, validate, dispatch, call back, acknowledge.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use job_core::{
    CallbackMessage, DeliveryId, Job, JobError, JobEvent, JobOutcome, parse_message, validate,
};
use storage::LocalDisk;
use tokio::sync::{Semaphore, broadcast};
use tracing::Instrument;

use crate::broker::{Acknowledger, BrokerError, Delivery};
use crate::publisher::CallbackPublisher;
use crate::router::Router;

/// Processes deliveries with at most `concurrency` jobs between receipt and
/// acknowledgement.
///
/// Every delivery is acknowledged exactly once whatever happens to the job.
/// Only a failing delivery stream ends [`JobConsumer::run`].
#[derive(Clone)]
pub struct JobConsumer {
    router: Arc<Router>,
    publisher: CallbackPublisher,
    local: LocalDisk,
    concurrency: u16,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl JobConsumer {
    pub fn new(router: Router, publisher: CallbackPublisher, concurrency: u16) -> Self {
        Self {
            router: Arc::new(router),
            publisher,
            local: LocalDisk::new(),
            concurrency: concurrency.max(1),
            event_tx: None,
        }
    }

    /// Publish every [`JobEvent`] on `tx`.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Consume `deliveries` until the stream ends or yields an error, then
    /// wait for in-flight jobs to be acknowledged.
    pub async fn run<S>(&self, deliveries: S) -> Result<(), BrokerError>
    where
        S: Stream<Item = Result<Delivery, BrokerError>>,
    {
        tracing::info!(concurrency = self.concurrency, "job consumer started");

        let semaphore = Arc::new(Semaphore::new(usize::from(self.concurrency)));
        let mut deliveries = std::pin::pin!(deliveries);
        let mut outcome = Ok(());

        loop {
            // A permit is taken before the next delivery is pulled, so the
            // ceiling holds even if the transport ignores prefetch.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let delivery = match deliveries.next().await {
                Some(Ok(delivery)) => delivery,
                Some(Err(error)) => {
                    tracing::error!(error = %error, "delivery stream failed");
                    outcome = Err(error);
                    break;
                }
                None => {
                    tracing::info!("delivery stream ended");
                    break;
                }
            };

            let consumer = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                consumer.handle_delivery(delivery).await;
            });
        }

        tracing::info!("waiting for in-flight jobs to complete");
        let _ = semaphore.acquire_many(u32::from(self.concurrency)).await;
        tracing::info!("job consumer stopped");
        outcome
    }

    /// Run one delivery to completion, including its acknowledgement.
    pub async fn handle_delivery(&self, delivery: Delivery) -> JobOutcome {
        let id = DeliveryId::new();
        let span = tracing::info_span!("delivery", delivery = %id);
        self.process(id, delivery).instrument(span).await
    }

    async fn process(&self, id: DeliveryId, delivery: Delivery) -> JobOutcome {
        let (payload, acker) = delivery.into_parts();
        self.emit(JobEvent::Received {
            delivery: id,
            timestamp: Utc::now(),
        });
        tracing::debug!(
            bytes = payload.len(),
            message = %String::from_utf8_lossy(&payload),
            "received job message"
        );

        let outcome = match parse_message(&payload) {
            Err(failure) => {
                self.reject(id, &failure.error);
                self.send_callbacks(id, CallbackMessage::from_callbacks(&failure.on_failure))
                    .await;
                JobOutcome::Failed(failure.error)
            }
            Ok(message) => match validate(&message) {
                Err(error) => {
                    self.reject(id, &error);
                    self.send_callbacks(
                        id,
                        CallbackMessage::from_callbacks(message.failure_callbacks()),
                    )
                    .await;
                    JobOutcome::Failed(error)
                }
                Ok(job) => self.execute(id, &job).await,
            },
        };

        self.acknowledge(id, acker).await;
        outcome
    }

    async fn execute(&self, id: DeliveryId, job: &Job) -> JobOutcome {
        self.emit(JobEvent::Started {
            delivery: id,
            operation: job.operation,
            backend: job.backend,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let outcome = JobOutcome::from_result(self.router.dispatch(job).await);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome.error() {
            None => {
                tracing::info!(
                    operation = %job.operation,
                    backend = %job.backend,
                    duration_ms,
                    "job succeeded"
                );
                self.emit(JobEvent::Executed {
                    delivery: id,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Some(error) => {
                if error.is_expected() {
                    tracing::warn!(operation = %job.operation, backend = %job.backend, error = %error, "job failed");
                } else {
                    tracing::error!(operation = %job.operation, backend = %job.backend, error = %error, "job failed");
                }
                self.emit(JobEvent::Failed {
                    delivery: id,
                    kind: error.kind(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        let attempted = job.callbacks(outcome.succeeded()).len();
        let published = match self.publisher.publish(job, &outcome).await {
            Ok(published) => published,
            Err(error) => {
                tracing::error!(error = %error, "callback publish failed");
                match error {
                    JobError::CallbackPublish { failed, .. } => attempted.saturating_sub(failed),
                    _ => 0,
                }
            }
        };
        self.emit(JobEvent::CallbacksSent {
            delivery: id,
            published,
            failed: attempted - published,
            timestamp: Utc::now(),
        });

        if !outcome.succeeded() && job.wants_cleanup() {
            self.clean_up(id, job).await;
        }
        outcome
    }

    fn reject(&self, id: DeliveryId, error: &JobError) {
        if error.is_expected() {
            tracing::warn!(kind = %error.kind(), error = %error, "job rejected");
        } else {
            tracing::error!(kind = %error.kind(), error = %error, "job rejected");
        }
        self.emit(JobEvent::Rejected {
            delivery: id,
            kind: error.kind(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn send_callbacks(&self, id: DeliveryId, messages: Vec<CallbackMessage>) {
        let summary = self.publisher.send(&messages).await;
        for failure in &summary.failures {
            tracing::error!(error = %failure, "callback publish failed");
        }
        self.emit(JobEvent::CallbacksSent {
            delivery: id,
            published: summary.published,
            failed: summary.failed(),
            timestamp: Utc::now(),
        });
    }

    async fn clean_up(&self, id: DeliveryId, job: &Job) {
        let Some(dst) = job.dst() else {
            return;
        };
        match self.local.remove_path(Path::new(dst)).await {
            Ok(true) => {
                tracing::info!(path = dst, "removed partial destination");
                self.emit(JobEvent::CleanedUp {
                    delivery: id,
                    path: dst.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => tracing::debug!(path = dst, "nothing to clean up"),
            Err(error) => {
                tracing::error!(path = dst, error = %error, "failed to remove partial destination")
            }
        }
    }

    async fn acknowledge(&self, id: DeliveryId, acker: Box<dyn Acknowledger>) {
        match acker.ack().await {
            Ok(()) => self.emit(JobEvent::Acknowledged {
                delivery: id,
                timestamp: Utc::now(),
            }),
            Err(error) => tracing::error!(error = %error, "failed to acknowledge delivery"),
        }
    }

    fn emit(&self, event: JobEvent) {
        tracing::trace!("{}", event.description());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for JobConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConsumer")
            .field("router", &self.router)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
