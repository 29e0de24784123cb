//! Inbound wire format.
//!
//! Messages are decoded leniently: every field is optional here and the
//! validator decides what is required. Older producers used `ops`, `args`,
//! `done` and `error`; those names are accepted as aliases.

use serde::Deserialize;

use crate::{Callback, JobError};

/// A decoded but not yet validated job message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    #[serde(default, alias = "ops")]
    pub operation: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default, alias = "args")]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, alias = "done")]
    pub on_success: Option<Vec<Callback>>,
    #[serde(default, alias = "error")]
    pub on_failure: Option<Vec<Callback>>,
}

impl JobMessage {
    pub fn failure_callbacks(&self) -> &[Callback] {
        self.on_failure.as_deref().unwrap_or_default()
    }
}

/// A payload that could not be decoded as a [`JobMessage`].
///
/// `on_failure` holds whatever failure callbacks could still be recovered
/// from the raw document, so the submitter can be told about the fault.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub error: JobError,
    pub on_failure: Vec<Callback>,
}

/// Decode raw delivery bytes.
pub fn parse_message(bytes: &[u8]) -> Result<JobMessage, ParseFailure> {
    let document: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ParseFailure {
            error: JobError::Unparseable(e.to_string()),
            on_failure: Vec::new(),
        })?;

    match serde_json::from_value::<JobMessage>(document.clone()) {
        Ok(message) => Ok(message),
        Err(e) => Err(ParseFailure {
            error: JobError::Unparseable(e.to_string()),
            on_failure: recover_failure_callbacks(&document),
        }),
    }
}

/// Salvage individually well-formed `onFailure` entries from a document
/// that failed to decode as a whole.
fn recover_failure_callbacks(document: &serde_json::Value) -> Vec<Callback> {
    let entries = document
        .get("onFailure")
        .or_else(|| document.get("error"))
        .and_then(serde_json::Value::as_array);

    entries
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value::<Callback>(entry.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_current_field_names() {
        let raw = json!({
            "operation": "upload",
            "backend": "s3",
            "arguments": {"bucket": "b", "region": "r"},
            "onSuccess": [{"queue": "next", "payload": {"id": 1}}]
        });
        let message = parse_message(raw.to_string().as_bytes()).unwrap();
        assert_eq!(message.operation.as_deref(), Some("upload"));
        assert_eq!(message.on_success.as_ref().map(Vec::len), Some(1));
        assert!(message.on_failure.is_none());
        assert!(message.failure_callbacks().is_empty());
    }

    #[test]
    fn decodes_legacy_field_names() {
        let raw = json!({
            "ops": "remove",
            "args": {"cloud": "oss", "bucket": "b", "region": "r", "dst": "k"},
            "done": [{"queue": "ok", "msg": "fine"}],
            "error": [{"queue": "bad", "msg": "oops"}]
        });
        let message = parse_message(raw.to_string().as_bytes()).unwrap();
        assert_eq!(message.operation.as_deref(), Some("remove"));
        assert_eq!(message.failure_callbacks()[0].queue, "bad");
        assert_eq!(message.failure_callbacks()[0].payload, json!("oops"));
    }

    #[test]
    fn non_json_recovers_nothing() {
        let failure = parse_message(b"not json").unwrap_err();
        assert!(matches!(failure.error, JobError::Unparseable(_)));
        assert!(failure.on_failure.is_empty());
    }

    #[test]
    fn recovers_failure_callbacks_from_bad_document() {
        let raw = json!({
            "operation": 42,
            "onFailure": [{"queue": "errors", "payload": "x"}, {"nope": true}]
        });
        let failure = parse_message(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(failure.on_failure.len(), 1);
        assert_eq!(failure.on_failure[0].queue, "errors");
    }
}
