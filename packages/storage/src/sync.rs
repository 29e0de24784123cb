//! Recursive directory sync between a local tree and an object-store prefix.
//!
//! Entries are compared by size and modification time: a side is refreshed
//! when sizes differ or its copy is older than the source. Excluded paths are
//! neither transferred nor deleted.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{Attributes, ObjectMeta, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};
use tokio::fs;

use crate::StorageError;

/// Flags shared by both sync directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete entries on the receiving side that the sending side lacks.
    pub delete: bool,
    /// Glob patterns matched against paths relative to the synced root.
    pub exclude: Vec<String>,
    /// Log each transferred entry at info instead of debug.
    pub verbose: bool,
}

/// Counts of what a sync did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
    pub deleted: usize,
}

/// Compiled exclusion patterns. `*` also matches across `/`.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    set: GlobSet,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Result<Self, StorageError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    pub fn is_excluded(&self, relative: &str) -> bool {
        self.set.is_match(relative)
    }
}

#[derive(Debug)]
pub(crate) struct LocalEntry {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) modified: Option<DateTime<Utc>>,
}

/// Files under `root`, keyed by `/`-separated relative path.
pub(crate) async fn walk_files(root: &Path) -> Result<BTreeMap<String, LocalEntry>, StorageError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }

            let Some(relative) = relative_key(root, &path) else {
                continue;
            };
            files.insert(
                relative,
                LocalEntry {
                    path,
                    size: meta.len(),
                    modified: meta.modified().ok().map(DateTime::<Utc>::from),
                },
            );
        }
    }

    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Parse `key` as a stored object key, kept byte for byte.
///
/// Keys are never percent-encoded, so listed locations compare equal to the
/// local relative names they were built from.
pub(crate) fn parse_key(key: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(key).map_err(|e| StorageError::InvalidKey {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Normalise a remote directory into an optional listing prefix.
pub(crate) fn remote_prefix(remote_dir: &str) -> Result<Option<ObjectPath>, StorageError> {
    let trimmed = remote_dir.trim_matches('/');
    if trimmed.is_empty() {
        Ok(None)
    } else {
        parse_key(trimmed).map(Some)
    }
}

fn join_remote(prefix: Option<&ObjectPath>, relative: &str) -> Result<ObjectPath, StorageError> {
    match prefix {
        Some(prefix) => parse_key(&format!("{}/{}", prefix.as_ref(), relative)),
        None => parse_key(relative),
    }
}

/// Objects under `prefix`, keyed by path relative to it.
async fn list_remote(
    store: &Arc<dyn ObjectStore>,
    prefix: Option<&ObjectPath>,
) -> Result<BTreeMap<String, ObjectMeta>, StorageError> {
    let mut objects = BTreeMap::new();
    let mut listing = store.list(prefix);

    while let Some(meta) = listing.next().await {
        let meta = meta?;
        let full = meta.location.as_ref();
        let relative = match prefix {
            Some(prefix) => match full.strip_prefix(prefix.as_ref()) {
                Some(rest) => rest.trim_start_matches('/').to_string(),
                None => continue,
            },
            None => full.to_string(),
        };
        if !relative.is_empty() {
            objects.insert(relative, meta);
        }
    }

    Ok(objects)
}

/// Whether `relative` stays inside the root it is joined to.
fn is_contained(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn log_transfer(verbose: bool, direction: &str, relative: &str) {
    if verbose {
        tracing::info!(direction, path = relative, "sync transfer");
    } else {
        tracing::debug!(direction, path = relative, "sync transfer");
    }
}

pub(crate) async fn upload_tree(
    store: &Arc<dyn ObjectStore>,
    local_dir: &Path,
    remote_dir: &str,
    options: &SyncOptions,
    attributes: &Attributes,
) -> Result<SyncReport, StorageError> {
    if !fs::metadata(local_dir).await.is_ok_and(|m| m.is_dir()) {
        return Err(StorageError::NotFound(local_dir.display().to_string()));
    }

    let filter = ExcludeFilter::new(&options.exclude)?;
    let prefix = remote_prefix(remote_dir)?;
    let local = walk_files(local_dir).await?;
    let remote = list_remote(store, prefix.as_ref()).await?;
    let mut report = SyncReport::default();

    for (relative, entry) in &local {
        if filter.is_excluded(relative) {
            continue;
        }
        if let Some(existing) = remote.get(relative)
            && existing.size == entry.size
            && entry.modified.is_some_and(|m| existing.last_modified >= m)
        {
            report.skipped += 1;
            continue;
        }

        let key = join_remote(prefix.as_ref(), relative)?;
        let data = fs::read(&entry.path).await?;
        let opts = PutOptions {
            attributes: attributes.clone(),
            ..Default::default()
        };
        store
            .put_opts(&key, PutPayload::from(data), opts)
            .await?;
        log_transfer(options.verbose, "up", relative);
        report.transferred += 1;
    }

    if options.delete {
        for (relative, meta) in &remote {
            if local.contains_key(relative) || filter.is_excluded(relative) {
                continue;
            }
            store.delete(&meta.location).await?;
            tracing::debug!(path = %relative, "deleted extraneous remote object");
            report.deleted += 1;
        }
    }

    Ok(report)
}

pub(crate) async fn download_tree(
    store: &Arc<dyn ObjectStore>,
    remote_dir: &str,
    local_dir: &Path,
    options: &SyncOptions,
) -> Result<SyncReport, StorageError> {
    let filter = ExcludeFilter::new(&options.exclude)?;
    let prefix = remote_prefix(remote_dir)?;
    let remote = list_remote(store, prefix.as_ref()).await?;

    fs::create_dir_all(local_dir).await?;
    let local = walk_files(local_dir).await?;
    let mut report = SyncReport::default();
    let mut wanted = HashSet::new();

    for (relative, meta) in &remote {
        if filter.is_excluded(relative) {
            continue;
        }
        if !is_contained(relative) {
            tracing::warn!(path = %relative, "skipping object that escapes the sync root");
            continue;
        }
        wanted.insert(relative.as_str());

        if let Some(existing) = local.get(relative)
            && existing.size == meta.size
            && existing.modified.is_some_and(|m| m >= meta.last_modified)
        {
            report.skipped += 1;
            continue;
        }

        let target = local_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = store.get(&meta.location).await?.bytes().await?;
        fs::write(&target, &bytes).await?;
        log_transfer(options.verbose, "down", relative);
        report.transferred += 1;
    }

    if options.delete {
        for (relative, entry) in &local {
            if wanted.contains(relative.as_str()) || filter.is_excluded(relative) {
                continue;
            }
            fs::remove_file(&entry.path).await?;
            tracing::debug!(path = %relative, "deleted extraneous local file");
            report.deleted += 1;
        }
    }

    Ok(report)
}
