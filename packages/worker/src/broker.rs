//! Broker capabilities the worker depends on.
//!
//! The transport (connection, channel, consumer tag) lives outside this crate.
//! The worker only sees a stream of [`Delivery`] values and a [`Publisher`].

use std::future::Future;
use std::pin::Pin;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection lost: {0}")]
    Connection(String),

    #[error("failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("failed to publish to {queue}: {reason}")]
    Publish { queue: String, reason: String },

    #[error("failed to acknowledge delivery: {0}")]
    Ack(String),
}

/// Future returned by broker trait methods.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Declares queues and publishes messages. Shared by all in-flight jobs.
pub trait Publisher: Send + Sync + 'static {
    /// Declare `queue` durable. Declaring an existing queue is a no-op.
    fn declare_durable<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()>;

    /// Publish `payload` to `queue` through the default exchange.
    fn publish<'a>(&'a self, queue: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()>;
}

/// Acknowledges exactly one delivery. Consumed by the call.
pub trait Acknowledger: Send + 'static {
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()>;
}

/// A received job message together with the handle that acknowledges it.
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: impl Acknowledger) -> Self {
        Self {
            payload,
            acker: Box::new(acker),
        }
    }

    pub fn into_parts(self) -> (Vec<u8>, Box<dyn Acknowledger>) {
        (self.payload, self.acker)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.payload.len())
            .finish()
    }
}
