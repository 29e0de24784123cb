//! Dispatch of validated jobs onto storage backends.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use job_core::{Backend, Job, JobError, ObjectLocation, Operation};
use storage::{LocalDisk, ObjectBackend, StorageError, SyncOptions};

use crate::retry::with_retry;

/// Per-call ceiling applied to every backend operation.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Maps `(operation, backend)` to a backend call.
///
/// Backends are injected so tests can swap in doubles. The router itself holds
/// no per-job state and is shared by every in-flight job.
pub struct Router {
    s3: Arc<dyn ObjectBackend>,
    oss: Arc<dyn ObjectBackend>,
    local: LocalDisk,
    timeout: Duration,
}

impl Router {
    pub fn new(s3: Arc<dyn ObjectBackend>, oss: Arc<dyn ObjectBackend>) -> Self {
        Self {
            s3,
            oss,
            local: LocalDisk::new(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        tracing::info!(
            operation = %job.operation,
            backend = %job.backend,
            src = job.src().unwrap_or_default(),
            dst = job.dst().unwrap_or_default(),
            "dispatching job"
        );

        match (job.operation, job.backend) {
            (Operation::Upload, backend @ (Backend::S3 | Backend::Oss)) => {
                let store = self.object_backend(job.operation, backend)?;
                let loc = location(job)?;
                let src = required(job.src(), "src")?;
                let dst = required(job.dst(), "dst")?;
                let src = Path::new(src);
                if !tokio::fs::metadata(src).await.is_ok_and(|m| m.is_file()) {
                    return Err(JobError::SourceNotFound(src.display().to_string()));
                }
                self.bounded(store.put(&loc.bucket, &loc.region, src, dst, &job.args.headers))
                    .await
            }

            (Operation::Download, backend @ (Backend::S3 | Backend::Oss)) => {
                let store = self.object_backend(job.operation, backend)?;
                let loc = location(job)?;
                let src = required(job.src(), "src")?;
                let dst = required(job.dst(), "dst")?;
                self.bounded(store.get(&loc.bucket, &loc.region, src, Path::new(dst)))
                    .await
            }

            (Operation::Remove, backend @ (Backend::S3 | Backend::Oss)) => {
                let store = self.object_backend(job.operation, backend)?;
                let loc = location(job)?;
                let dst = required(job.dst(), "dst")?;
                self.bounded(store.delete(&loc.bucket, &loc.region, dst)).await
            }

            (Operation::Remove, Backend::Local) => {
                let dst = required(job.dst(), "dst")?;
                self.bounded(self.local.remove_path(Path::new(dst)))
                    .await
                    .map(|_| ())
            }

            (Operation::SyncUp, backend @ (Backend::S3 | Backend::Oss)) => {
                let store = self.object_backend(job.operation, backend)?;
                let loc = location(job)?;
                let src = required(job.src(), "src")?;
                let dst = required(job.dst(), "dst")?;
                let options = sync_options(job);
                let report = self
                    .bounded(store.sync_up(&loc.bucket, &loc.region, Path::new(src), dst, &options))
                    .await?;
                tracing::info!(
                    transferred = report.transferred,
                    skipped = report.skipped,
                    deleted = report.deleted,
                    "sync up finished"
                );
                Ok(())
            }

            (Operation::SyncDown, Backend::S3) => {
                let loc = location(job)?;
                let src = required(job.src(), "src")?;
                let dst = required(job.dst(), "dst")?;
                let options = sync_options(job);
                self.sync_down_once(&*self.s3, &loc, src, Path::new(dst), &options)
                    .await
            }

            // Bulk listing on OSS fails transiently; this is the only retried call.
            (Operation::SyncDown, Backend::Oss) => {
                let loc = location(job)?;
                let src = required(job.src(), "src")?;
                let dst = Path::new(required(job.dst(), "dst")?);
                let options = sync_options(job);
                let store = &*self.oss;
                let (loc, options) = (&loc, &options);
                with_retry("sync_down", job.args.retry, move || {
                    self.sync_down_once(store, loc, src, dst, options)
                })
                .await
            }

            (Operation::Copy, Backend::Local) => {
                let src = required(job.src(), "src")?;
                let dst = required(job.dst(), "dst")?;
                let copied = self
                    .bounded(self.local.copy_path(Path::new(src), Path::new(dst)))
                    .await?;
                tracing::debug!(files = copied, "local copy finished");
                Ok(())
            }

            (operation, backend) => Err(JobError::Unroutable { operation, backend }),
        }
    }

    async fn sync_down_once(
        &self,
        store: &dyn ObjectBackend,
        loc: &ObjectLocation,
        src: &str,
        dst: &Path,
        options: &SyncOptions,
    ) -> Result<(), JobError> {
        let report = self
            .bounded(store.sync_down(&loc.bucket, &loc.region, src, dst, options))
            .await?;
        tracing::info!(
            transferred = report.transferred,
            skipped = report.skipped,
            deleted = report.deleted,
            "sync down finished"
        );
        Ok(())
    }

    fn object_backend(
        &self,
        operation: Operation,
        backend: Backend,
    ) -> Result<&dyn ObjectBackend, JobError> {
        match backend {
            Backend::S3 => Ok(&*self.s3),
            Backend::Oss => Ok(&*self.oss),
            Backend::Local => Err(JobError::Unroutable { operation, backend }),
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, JobError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(storage_error),
            Err(_) => Err(JobError::Backend(format!(
                "backend call timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("s3", &self.s3.name())
            .field("oss", &self.oss.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn storage_error(error: StorageError) -> JobError {
    match error {
        StorageError::NotFound(path) => JobError::SourceNotFound(path),
        other => JobError::Backend(other.to_string()),
    }
}

fn location(job: &Job) -> Result<ObjectLocation, JobError> {
    job.location()
        .ok_or_else(|| JobError::Malformed("bucket and region are required".to_string()))
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, JobError> {
    value.ok_or_else(|| JobError::Malformed(format!("missing argument {field}")))
}

fn sync_options(job: &Job) -> SyncOptions {
    SyncOptions {
        delete: job.args.delete,
        exclude: job.args.exclude.clone(),
        verbose: job.args.verbose,
    }
}
