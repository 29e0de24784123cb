//! Job domain types for storage work items.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Storage operation requested by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Upload,
    Download,
    Remove,
    SyncUp,
    SyncDown,
    Copy,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Upload,
        Operation::Download,
        Operation::Remove,
        Operation::SyncUp,
        Operation::SyncDown,
        Operation::Copy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Remove => "remove",
            Operation::SyncUp => "syncUp",
            Operation::SyncDown => "syncDown",
            Operation::Copy => "copy",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an operation or backend name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

impl FromStr for Operation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Operation::Upload),
            "download" => Ok(Operation::Download),
            "remove" => Ok(Operation::Remove),
            "syncUp" | "sync_up" | "sync-up" => Ok(Operation::SyncUp),
            "syncDown" | "sync_down" | "sync-down" => Ok(Operation::SyncDown),
            "copy" => Ok(Operation::Copy),
            other => Err(UnknownVariant {
                what: "operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Storage backend a job runs against.
///
/// `S3` and `Oss` are the two object stores; `Local` is the worker's own disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    S3,
    Oss,
    Local,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::S3, Backend::Oss, Backend::Local];

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::S3 => "s3",
            Backend::Oss => "oss",
            Backend::Local => "local",
        }
    }

    /// Whether jobs on this backend address a bucket in a region.
    pub fn is_object_store(self) -> bool {
        matches!(self, Backend::S3 | Backend::Oss)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Backend::S3),
            "oss" => Ok(Backend::Oss),
            "local" | "localDisk" => Ok(Backend::Local),
            other => Err(UnknownVariant {
                what: "backend",
                value: other.to_string(),
            }),
        }
    }
}

/// A follow-up message declared by the job submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    /// Destination queue, declared durable before publishing.
    pub queue: String,
    /// Opaque payload forwarded to the destination queue.
    #[serde(default, alias = "msg")]
    pub payload: serde_json::Value,
}

impl Callback {
    pub fn new(queue: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            payload,
        }
    }

    /// Bytes published for this callback: the payload as compact JSON,
    /// strings included, so `"42"` and `42` stay distinguishable.
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.to_string().into_bytes()
    }
}

/// Operation arguments carried in the `arguments` object of a job message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobArgs {
    /// Backend name when given inside the arguments (`cloud` in older messages).
    #[serde(alias = "cloud", skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Delete extraneous entries on the receiving side of a sync.
    pub delete: bool,
    /// Glob patterns excluded from a sync, relative to the synced root.
    pub exclude: Vec<String>,
    /// Log every transferred entry of a sync at info level.
    pub verbose: bool,
    /// Retries granted to a retryable operation; 0 runs it once.
    pub retry: u32,
    /// Remove the partially written destination when a sync-down fails.
    pub clean_on_error: bool,
    /// Object headers applied on upload.
    pub headers: BTreeMap<String, String>,
}

/// Bucket and region addressed by an object-store job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub region: String,
}

/// A validated unit of storage work.
///
/// Jobs are only built by [`crate::validate`] and are never mutated
/// afterwards; outcome handling only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub operation: Operation,
    pub backend: Backend,
    pub args: JobArgs,
    pub on_success: Vec<Callback>,
    pub on_failure: Vec<Callback>,
}

impl Job {
    /// Bucket and region, present for every validated object-store job.
    pub fn location(&self) -> Option<ObjectLocation> {
        Some(ObjectLocation {
            bucket: self.args.bucket.clone()?,
            region: self.args.region.clone()?,
        })
    }

    pub fn src(&self) -> Option<&str> {
        self.args.src.as_deref()
    }

    pub fn dst(&self) -> Option<&str> {
        self.args.dst.as_deref()
    }

    /// Callbacks to publish for the given result.
    pub fn callbacks(&self, succeeded: bool) -> &[Callback] {
        if succeeded {
            &self.on_success
        } else {
            &self.on_failure
        }
    }

    /// Whether a failed run of this job must remove its local destination.
    pub fn wants_cleanup(&self) -> bool {
        self.operation == Operation::SyncDown && self.args.clean_on_error
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use serde_json::json;

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
            let encoded = serde_json::to_value(op).unwrap();
            assert_eq!(encoded, json!(op.as_str()));
        }
        assert_eq!("sync_down".parse::<Operation>(), Ok(Operation::SyncDown));
        assert!("move".parse::<Operation>().is_err());
    }

    #[test]
    fn backend_names() {
        for backend in Backend::ALL {
            assert_eq!(backend.as_str().parse::<Backend>(), Ok(backend));
        }
        assert!(Backend::Oss.is_object_store());
        assert!(!Backend::Local.is_object_store());
        assert!("gcs".parse::<Backend>().is_err());
    }

    #[test]
    fn args_accept_legacy_cloud_field() {
        let args: JobArgs = serde_json::from_value(json!({
            "cloud": "oss",
            "bucket": "assets",
            "region": "oss-cn-hangzhou",
            "cleanOnError": true,
            "exclude": ["*.tmp"]
        }))
        .unwrap();
        assert_eq!(args.backend.as_deref(), Some("oss"));
        assert!(args.clean_on_error);
        assert_eq!(args.exclude, vec!["*.tmp".to_string()]);
        assert_eq!(args.retry, 0);
    }

    #[test]
    fn callback_payload_bytes() {
        let text = Callback::new("q", json!("done"));
        assert_eq!(text.payload_bytes(), br#""done""#.to_vec());

        let quoted_number = Callback::new("q", json!("42"));
        let number = Callback::new("q", json!(42));
        assert_eq!(quoted_number.payload_bytes(), br#""42""#.to_vec());
        assert_eq!(number.payload_bytes(), b"42".to_vec());

        let object = Callback::new("q", json!({"id": 7}));
        assert_eq!(object.payload_bytes(), br#"{"id":7}"#.to_vec());

        let legacy: Callback = serde_json::from_value(json!({"queue": "q", "msg": "hi"})).unwrap();
        assert_eq!(legacy.payload, json!("hi"));
    }
}
