//! Job processing pipeline.
//!
//! Deliveries flow through the [`JobConsumer`], which validates them, routes
//! each job to a storage backend via the [`Router`], publishes callbacks with
//! the [`CallbackPublisher`] and acknowledges the delivery.
//!
//! # Usage
//!
//! ```ignore
//! use worker::{CallbackPublisher, JobConsumer, Router};
//!
//! let router = Router::new(s3, oss).with_timeout(timeout);
//! let consumer = JobConsumer::new(router, CallbackPublisher::new(broker), 4);
//! consumer.run(deliveries).await?;
//! ```
//!
//! The heartbeat responder is a separate actor ([`HeartbeatActor`]) that
//! shares only the broker with the pipeline.

mod broker;
mod consumer;
mod heartbeat;
mod messages;
mod publisher;
mod retry;
mod router;

pub use broker::{Acknowledger, BrokerError, BrokerFuture, Delivery, Publisher};
pub use consumer::JobConsumer;
pub use heartbeat::{HeartbeatActor, HeartbeatArgs, HostIdentity, Presence, start_heartbeat};
pub use messages::HeartbeatMessage;
pub use publisher::CallbackPublisher;
pub use retry::with_retry;
pub use router::{DEFAULT_BACKEND_TIMEOUT, Router};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
