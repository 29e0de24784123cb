//! Lifecycle events emitted while a delivery is processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Backend, ErrorKind, Operation};

/// Identifier assigned to each received delivery, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub Ulid);

impl DeliveryId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted by the consumer, one stream per delivery:
/// `Received → Rejected | Started → Executed | Failed → CallbacksSent → Acknowledged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A delivery arrived from the broker.
    Received {
        delivery: DeliveryId,
        timestamp: DateTime<Utc>,
    },
    /// The payload did not parse or did not validate.
    Rejected {
        delivery: DeliveryId,
        kind: ErrorKind,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A validated job was handed to the router.
    Started {
        delivery: DeliveryId,
        operation: Operation,
        backend: Backend,
        timestamp: DateTime<Utc>,
    },
    /// The backend operation completed.
    Executed {
        delivery: DeliveryId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The backend operation failed.
    Failed {
        delivery: DeliveryId,
        kind: ErrorKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A partially written destination was removed after a failure.
    CleanedUp {
        delivery: DeliveryId,
        path: String,
        timestamp: DateTime<Utc>,
    },
    /// Callback fan-out finished.
    CallbacksSent {
        delivery: DeliveryId,
        published: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
    /// The delivery was acknowledged to the broker.
    Acknowledged {
        delivery: DeliveryId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Received { timestamp, .. } => *timestamp,
            JobEvent::Rejected { timestamp, .. } => *timestamp,
            JobEvent::Started { timestamp, .. } => *timestamp,
            JobEvent::Executed { timestamp, .. } => *timestamp,
            JobEvent::Failed { timestamp, .. } => *timestamp,
            JobEvent::CleanedUp { timestamp, .. } => *timestamp,
            JobEvent::CallbacksSent { timestamp, .. } => *timestamp,
            JobEvent::Acknowledged { timestamp, .. } => *timestamp,
        }
    }

    pub fn delivery(&self) -> DeliveryId {
        match self {
            JobEvent::Received { delivery, .. } => *delivery,
            JobEvent::Rejected { delivery, .. } => *delivery,
            JobEvent::Started { delivery, .. } => *delivery,
            JobEvent::Executed { delivery, .. } => *delivery,
            JobEvent::Failed { delivery, .. } => *delivery,
            JobEvent::CleanedUp { delivery, .. } => *delivery,
            JobEvent::CallbacksSent { delivery, .. } => *delivery,
            JobEvent::Acknowledged { delivery, .. } => *delivery,
        }
    }

    /// Short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::Received { delivery, .. } => format!("Delivery {} received", delivery),
            JobEvent::Rejected {
                delivery,
                kind,
                reason,
                ..
            } => format!("Delivery {} rejected ({}): {}", delivery, kind, reason),
            JobEvent::Started {
                delivery,
                operation,
                backend,
                ..
            } => format!("Delivery {} running {} on {}", delivery, operation, backend),
            JobEvent::Executed {
                delivery,
                duration_ms,
                ..
            } => format!("Delivery {} executed in {}ms", delivery, duration_ms),
            JobEvent::Failed {
                delivery, error, ..
            } => format!("Delivery {} failed: {}", delivery, error),
            JobEvent::CleanedUp { delivery, path, .. } => {
                format!("Delivery {} removed partial destination {}", delivery, path)
            }
            JobEvent::CallbacksSent {
                delivery,
                published,
                failed,
                ..
            } => format!(
                "Delivery {} callbacks: {} published, {} failed",
                delivery, published, failed
            ),
            JobEvent::Acknowledged { delivery, .. } => {
                format!("Delivery {} acknowledged", delivery)
            }
        }
    }
}
