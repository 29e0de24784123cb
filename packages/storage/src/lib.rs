//! Storage backends used by the job executor.
//!
//! - S3 and OSS object stores behind the [`ObjectBackend`] capability trait,
//!   both served by [`ObjectStoreBackend`] on top of `object_store`
//! - an in-memory object store for tests and local development
//! - [`LocalDisk`] for copy/remove on the worker's own filesystem
//! - recursive directory sync in both directions

mod config;
mod local;
mod object;
mod sync;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

pub use config::{ObjectStoreConfig, ObjectStoreKind};
pub use local::LocalDisk;
pub use object::ObjectStoreBackend;
pub use sync::{ExcludeFilter, SyncOptions, SyncReport};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    /// A local file or directory the operation reads from does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An object key or prefix that cannot be stored verbatim.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Future returned by [`ObjectBackend`] methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Capability interface over a bucket-addressed object store.
///
/// One instance serves every bucket and region of its provider and is shared
/// by all in-flight jobs, so implementations must be safe for concurrent use.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Provider name for logging (e.g. "s3").
    fn name(&self) -> &str;

    /// Upload a local file to `remote_path`. Fails with
    /// [`StorageError::NotFound`] before any network call if the file is missing.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        local_path: &'a Path,
        remote_path: &'a str,
        headers: &'a BTreeMap<String, String>,
    ) -> StorageFuture<'a, ()>;

    /// Download `remote_path` into a local file, creating parent directories.
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_path: &'a str,
        local_path: &'a Path,
    ) -> StorageFuture<'a, ()>;

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_path: &'a str,
    ) -> StorageFuture<'a, ()>;

    /// Recursively upload `local_dir` under the `remote_dir` prefix.
    fn sync_up<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        local_dir: &'a Path,
        remote_dir: &'a str,
        options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport>;

    /// Recursively download the `remote_dir` prefix into `local_dir`.
    fn sync_down<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_dir: &'a str,
        local_dir: &'a Path,
        options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport>;
}
