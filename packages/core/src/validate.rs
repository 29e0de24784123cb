//! Job validation.
//!
//! Invalid input is an expected classification, returned as
//! [`JobError::Malformed`], never a panic.

use crate::{Backend, Job, JobArgs, JobError, JobMessage, Operation};

/// Classify a decoded message as a [`Job`] or as malformed.
///
/// Rules:
/// - `operation` and `arguments` are present, `arguments` is an object
/// - the backend (top level or inside `arguments`) names a known backend
/// - object-store jobs carry `bucket` and `region`
/// - local-disk jobs are either `copy` (with `src` and `dst`) or `remove` (with `dst`)
/// - every operation carries the paths it reads and writes
pub fn validate(message: &JobMessage) -> Result<Job, JobError> {
    let operation = message
        .operation
        .as_deref()
        .ok_or_else(|| malformed("missing operation"))?;
    let arguments = message
        .arguments
        .as_ref()
        .ok_or_else(|| malformed("missing arguments"))?;
    if !arguments.is_object() {
        return Err(malformed("arguments must be an object"));
    }

    let operation = operation
        .parse::<Operation>()
        .map_err(|e| malformed(&e.to_string()))?;
    let args: JobArgs = serde_json::from_value(arguments.clone())
        .map_err(|e| malformed(&format!("invalid arguments: {e}")))?;

    let backend = message
        .backend
        .as_deref()
        .or(args.backend.as_deref())
        .ok_or_else(|| malformed("missing backend"))?
        .parse::<Backend>()
        .map_err(|e| malformed(&e.to_string()))?;

    if backend.is_object_store() {
        require(&args.bucket, "bucket")?;
        require(&args.region, "region")?;
    } else if !matches!(operation, Operation::Copy | Operation::Remove) {
        return Err(malformed(&format!(
            "{operation} is not supported on {backend}"
        )));
    }

    match operation {
        Operation::Remove => require(&args.dst, "dst")?,
        _ => {
            require(&args.src, "src")?;
            require(&args.dst, "dst")?;
        }
    }

    Ok(Job {
        operation,
        backend,
        args,
        on_success: message.on_success.clone().unwrap_or_default(),
        on_failure: message.on_failure.clone().unwrap_or_default(),
    })
}

fn require(value: &Option<String>, field: &str) -> Result<(), JobError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(malformed(&format!("missing arguments.{field}"))),
    }
}

fn malformed(reason: &str) -> JobError {
    JobError::Malformed(reason.to_string())
}
