//! Copy and remove on the worker's own filesystem.

use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::StorageError;

/// Local-disk backend. Stateless; paths are used as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDisk;

impl LocalDisk {
    pub fn new() -> Self {
        Self
    }

    /// Copy a file or directory tree from `src` to `dst`.
    ///
    /// A file copied onto an existing directory lands inside it under its own
    /// name. Directories are merged into `dst`, overwriting files that exist
    /// on both sides. Returns the number of files copied.
    pub async fn copy_path(&self, src: &Path, dst: &Path) -> Result<u64, StorageError> {
        let meta = match fs::metadata(src).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(src.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            if nests_inside(src, dst).await? {
                return Err(StorageError::InvalidPath(format!(
                    "cannot copy {} into itself at {}",
                    src.display(),
                    dst.display()
                )));
            }
            return copy_tree(src, dst).await;
        }

        let target = if fs::metadata(dst).await.is_ok_and(|m| m.is_dir()) {
            match src.file_name() {
                Some(name) => dst.join(name),
                None => dst.to_path_buf(),
            }
        } else {
            dst.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, &target).await?;
        tracing::debug!(src = %src.display(), dst = %target.display(), "copied file");
        Ok(1)
    }

    /// Remove a file or directory tree. A missing path is not an error.
    pub async fn remove_path(&self, path: &Path) -> Result<bool, StorageError> {
        let meta = match fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        tracing::debug!(path = %path.display(), "removed local path");
        Ok(true)
    }
}

/// Whether `dst` is `src` or lies below it.
///
/// `dst` may not exist yet, so its nearest existing ancestor is resolved and
/// the missing tail appended.
async fn nests_inside(src: &Path, dst: &Path) -> Result<bool, StorageError> {
    let src = fs::canonicalize(src).await?;
    let mut existing = lexical_absolute(dst)?;
    let mut tail = Vec::new();

    let resolved = loop {
        match fs::canonicalize(&existing).await {
            Ok(resolved) => break resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Ok(false);
                };
                tail.push(name);
                existing.pop();
            }
            Err(e) => return Err(e.into()),
        }
    };

    let dst = tail.iter().rev().fold(resolved, |path, name| path.join(name));
    Ok(dst.starts_with(&src))
}

/// Absolute form of `path` with `.` and `..` folded away.
fn lexical_absolute(path: &Path) -> Result<PathBuf, StorageError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    Ok(clean)
}

async fn copy_tree(src: &Path, dst: &Path) -> Result<u64, StorageError> {
    let mut copied = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let kind = entry.file_type().await?;
            let target = to.join(entry.file_name());
            if kind.is_dir() {
                pending.push((entry.path(), target));
            } else if kind.is_file() {
                fs::copy(entry.path(), &target).await?;
                copied += 1;
            }
        }
    }

    tracing::debug!(src = %src.display(), dst = %dst.display(), files = copied, "copied tree");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn copies_a_file() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("a.txt");
        fs::write(&src, b"alpha").await?;

        let dst = dir.path().join("out/b.txt");
        assert_eq!(LocalDisk.copy_path(&src, &dst).await?, 1);
        assert_eq!(fs::read(&dst).await?, b"alpha".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn file_onto_directory_lands_inside() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("a.txt");
        fs::write(&src, b"alpha").await?;
        let target_dir = dir.path().join("target");
        fs::create_dir_all(&target_dir).await?;

        LocalDisk.copy_path(&src, &target_dir).await?;
        assert_eq!(fs::read(target_dir.join("a.txt")).await?, b"alpha".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn copies_a_tree() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).await?;
        fs::write(src.join("one.txt"), b"1").await?;
        fs::write(src.join("nested/two.txt"), b"2").await?;

        let dst = dir.path().join("dst");
        assert_eq!(LocalDisk.copy_path(&src, &dst).await?, 2);
        assert_eq!(fs::read(dst.join("nested/two.txt")).await?, b"2".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn refuses_to_copy_a_tree_into_itself() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir_all(&data).await?;
        fs::write(data.join("one.txt"), b"1").await?;

        let result = LocalDisk.copy_path(&data, &data.join("backup")).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(!data.join("backup").exists());

        let result = LocalDisk
            .copy_path(&data, &data.join("x/../backup/deeper"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        let result = LocalDisk.copy_path(&data, &data).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        assert_eq!(
            LocalDisk.copy_path(&data, &dir.path().join("data-copy")).await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_is_not_found() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let result = LocalDisk
            .copy_path(&dir.path().join("nope"), &dir.path().join("dst"))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn remove_is_idempotent() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("x")).await?;
        fs::write(tree.join("x/y.txt"), b"y").await?;

        assert!(LocalDisk.remove_path(&tree).await?);
        assert!(!tree.exists());
        assert!(!LocalDisk.remove_path(&tree).await?);
        Ok(())
    }
}
