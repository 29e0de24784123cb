//! Object-store backend over `object_store`, serving S3, OSS and in-memory stores.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
};
use tokio::fs;

use crate::config::{ObjectStoreConfig, ObjectStoreKind};
use crate::sync::{download_tree, parse_key, upload_tree};
use crate::{ObjectBackend, StorageError, StorageFuture, SyncOptions, SyncReport};

type StoreKey = (String, String);

/// One provider's object stores, built lazily per bucket and region and
/// reused by every job addressing the same pair.
pub struct ObjectStoreBackend {
    config: ObjectStoreConfig,
    stores: RwLock<HashMap<StoreKey, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBackend {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// In-memory backend; each bucket/region pair gets its own empty store.
    pub fn memory() -> Self {
        Self::new(ObjectStoreConfig::memory())
    }

    /// Store for a bucket in a region, built on first use.
    pub fn store(&self, bucket: &str, region: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let key = (bucket.to_string(), region.to_string());
        if let Some(store) = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(store.clone());
        }

        let built = self.build(bucket, region)?;
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        Ok(stores.entry(key).or_insert(built).clone())
    }

    fn build(&self, bucket: &str, region: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let store: Arc<dyn ObjectStore> = match self.config.kind {
            ObjectStoreKind::Memory => Arc::new(InMemory::new()),
            ObjectStoreKind::S3 => Arc::new(self.s3_builder(bucket, region).build()?),
            ObjectStoreKind::Oss => Arc::new(self.oss_builder(bucket, region).build()?),
        };
        tracing::debug!(
            provider = self.config.kind.as_str(),
            bucket,
            region,
            "built object store client"
        );
        Ok(store)
    }

    fn base_builder(&self, bucket: &str, region: &str) -> object_store::aws::AmazonS3Builder {
        let mut builder = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region);

        if let Some(access_key_id) = &self.config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &self.config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }
        if self.config.allow_http {
            builder = builder.with_allow_http(true);
        }
        builder
    }

    fn s3_builder(&self, bucket: &str, region: &str) -> object_store::aws::AmazonS3Builder {
        let builder = self.base_builder(bucket, region);
        match &self.config.endpoint {
            Some(endpoint) => builder.with_endpoint(endpoint),
            None => builder,
        }
    }

    /// OSS speaks the S3 protocol on `<bucket>.<region>.aliyuncs.com`, where
    /// the region carries an `oss-` prefix (`oss-cn-hangzhou`).
    fn oss_builder(&self, bucket: &str, region: &str) -> object_store::aws::AmazonS3Builder {
        let host_region = if region.starts_with("oss-") {
            region.to_string()
        } else {
            format!("oss-{region}")
        };
        let signing_region = host_region.trim_start_matches("oss-").to_string();
        let builder = self.base_builder(bucket, &signing_region);

        match &self.config.endpoint {
            Some(endpoint) => builder.with_endpoint(endpoint),
            None => builder
                .with_endpoint(format!("https://{bucket}.{host_region}.aliyuncs.com"))
                .with_virtual_hosted_style_request(true),
        }
    }

    /// Provider defaults overlaid with the job's own headers.
    fn attributes(&self, headers: &BTreeMap<String, String>) -> Attributes {
        let mut attributes = Attributes::new();
        for (name, value) in self.config.default_headers.iter().chain(headers.iter()) {
            attributes.insert(header_attribute(name), value.clone().into());
        }
        attributes
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("kind", &self.config.kind)
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

fn header_attribute(name: &str) -> Attribute {
    match name.to_ascii_lowercase().as_str() {
        "cache-control" => Attribute::CacheControl,
        "content-type" => Attribute::ContentType,
        "content-encoding" => Attribute::ContentEncoding,
        "content-disposition" => Attribute::ContentDisposition,
        "content-language" => Attribute::ContentLanguage,
        other => {
            let key = other
                .strip_prefix("x-amz-meta-")
                .or_else(|| other.strip_prefix("x-oss-meta-"))
                .unwrap_or(other);
            Attribute::Metadata(Cow::Owned(key.to_string()))
        }
    }
}

fn object_path(key: &str) -> Result<ObjectPath, StorageError> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "object key must not be empty".to_string(),
        });
    }
    parse_key(key)
}

impl ObjectBackend for ObjectStoreBackend {
    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        local_path: &'a Path,
        remote_path: &'a str,
        headers: &'a BTreeMap<String, String>,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if !fs::metadata(local_path).await.is_ok_and(|m| m.is_file()) {
                return Err(StorageError::NotFound(local_path.display().to_string()));
            }
            let path = object_path(remote_path)?;
            let store = self.store(bucket, region)?;

            let data = Bytes::from(fs::read(local_path).await?);
            let size = data.len();
            let opts = PutOptions {
                attributes: self.attributes(headers),
                ..Default::default()
            };
            store.put_opts(&path, PutPayload::from(data), opts).await?;

            tracing::debug!(bucket, key = %path, bytes = size, "uploaded object");
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_path: &'a str,
        local_path: &'a Path,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = object_path(remote_path)?;
            let store = self.store(bucket, region)?;

            let bytes = store.get(&path).await?.bytes().await?;
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(local_path, &bytes).await?;

            tracing::debug!(bucket, key = %path, bytes = bytes.len(), "downloaded object");
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_path: &'a str,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = object_path(remote_path)?;
            let store = self.store(bucket, region)?;
            store.delete(&path).await?;
            tracing::debug!(bucket, key = %path, "deleted object");
            Ok(())
        })
    }

    fn sync_up<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        local_dir: &'a Path,
        remote_dir: &'a str,
        options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport> {
        Box::pin(async move {
            let store = self.store(bucket, region)?;
            let attributes = self.attributes(&BTreeMap::new());
            upload_tree(&store, local_dir, remote_dir, options, &attributes).await
        })
    }

    fn sync_down<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
        remote_dir: &'a str,
        local_dir: &'a Path,
        options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport> {
        Box::pin(async move {
            let store = self.store(bucket, region)?;
            download_tree(&store, remote_dir, local_dir, options).await
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use futures_util::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn in_memory_put_get_delete() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("hello.txt");
        fs::write(&src, b"hi").await?;

        let backend = ObjectStoreBackend::memory();
        backend
            .put("bucket", "region", &src, "greetings/hello.txt", &BTreeMap::new())
            .await?;

        let dst = dir.path().join("out/hello.txt");
        backend
            .get("bucket", "region", "greetings/hello.txt", &dst)
            .await?;
        assert_eq!(fs::read(&dst).await?, b"hi".to_vec());

        backend.delete("bucket", "region", "greetings/hello.txt").await?;
        let missing = backend
            .get("bucket", "region", "greetings/hello.txt", &dst)
            .await;
        assert!(matches!(missing, Err(StorageError::ObjectStore(_))));
        Ok(())
    }

    #[tokio::test]
    async fn put_missing_source_is_not_found() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let backend = ObjectStoreBackend::memory();
        let result = backend
            .put(
                "bucket",
                "region",
                &dir.path().join("absent.bin"),
                "key",
                &BTreeMap::new(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stores_are_shared_per_bucket() -> Result<(), StorageError> {
        let backend = ObjectStoreBackend::memory();
        let a = backend.store("one", "r")?;
        let b = backend.store("one", "r")?;
        let c = backend.store("two", "r")?;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        Ok(())
    }

    #[tokio::test]
    async fn sync_round_trip_with_exclude_and_delete() -> Result<(), StorageError> {
        let src = tempfile::tempdir()?;
        fs::create_dir_all(src.path().join("nested")).await?;
        fs::write(src.path().join("a.txt"), b"a").await?;
        fs::write(src.path().join("nested/b.txt"), b"bb").await?;
        fs::write(src.path().join("scratch.tmp"), b"tmp").await?;

        let backend = ObjectStoreBackend::memory();
        let up = SyncOptions {
            exclude: vec!["*.tmp".to_string()],
            ..Default::default()
        };
        let report = backend
            .sync_up("bucket", "region", src.path(), "site/", &up)
            .await?;
        assert_eq!(report.transferred, 2);

        let again = backend
            .sync_up("bucket", "region", src.path(), "site", &up)
            .await?;
        assert_eq!(again.transferred, 0);
        assert_eq!(again.skipped, 2);

        let dst = tempfile::tempdir()?;
        fs::write(dst.path().join("stale.txt"), b"old").await?;
        let down = SyncOptions {
            delete: true,
            ..Default::default()
        };
        let report = backend
            .sync_down("bucket", "region", "site", dst.path(), &down)
            .await?;
        assert_eq!(report.transferred, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(fs::read(dst.path().join("nested/b.txt")).await?, b"bb".to_vec());
        assert!(!dst.path().join("stale.txt").exists());
        assert!(!dst.path().join("scratch.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn sync_up_delete_removes_extraneous_objects() -> Result<(), StorageError> {
        let src = tempfile::tempdir()?;
        fs::write(src.path().join("keep.txt"), b"k").await?;
        let other = tempfile::tempdir()?;
        fs::write(other.path().join("gone.txt"), b"g").await?;

        let backend = ObjectStoreBackend::memory();
        backend
            .put("b", "r", &other.path().join("gone.txt"), "p/gone.txt", &BTreeMap::new())
            .await?;

        let options = SyncOptions {
            delete: true,
            ..Default::default()
        };
        let report = backend.sync_up("b", "r", src.path(), "p", &options).await?;
        assert_eq!(report.transferred, 1);
        assert_eq!(report.deleted, 1);
        Ok(())
    }

    #[tokio::test]
    async fn special_characters_survive_a_sync_round_trip() -> Result<(), StorageError> {
        let src = tempfile::tempdir()?;
        fs::write(src.path().join("report[1].txt"), b"r").await?;
        fs::write(src.path().join("notes#2.txt"), b"n").await?;

        let backend = ObjectStoreBackend::memory();
        let options = SyncOptions {
            delete: true,
            ..Default::default()
        };
        let first = backend.sync_up("b", "r", src.path(), "site", &options).await?;
        assert_eq!(first.transferred, 2);

        let second = backend.sync_up("b", "r", src.path(), "site", &options).await?;
        assert_eq!(
            second,
            SyncReport {
                transferred: 0,
                skipped: 2,
                deleted: 0
            }
        );

        let store = backend.store("b", "r")?;
        let mut keys: Vec<String> = store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        assert_eq!(keys, vec!["site/notes#2.txt", "site/report[1].txt"]);

        let dst = tempfile::tempdir()?;
        let report = backend
            .sync_down("b", "r", "site", dst.path(), &options)
            .await?;
        assert_eq!(report.transferred, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(fs::read(dst.path().join("report[1].txt")).await?, b"r".to_vec());
        assert_eq!(fs::read(dst.path().join("notes#2.txt")).await?, b"n".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn put_stores_the_key_verbatim() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("photo.jpg");
        fs::write(&src, b"jpg").await?;

        let backend = ObjectStoreBackend::memory();
        backend
            .put("b", "r", &src, "albums/a[1].jpg", &BTreeMap::new())
            .await?;

        let store = backend.store("b", "r")?;
        let bytes = store
            .get(&parse_key("albums/a[1].jpg")?)
            .await?
            .bytes()
            .await?;
        assert_eq!(bytes.as_ref(), b"jpg");
        Ok(())
    }

    #[test]
    fn header_names_map_to_attributes() {
        assert_eq!(header_attribute("Cache-Control"), Attribute::CacheControl);
        assert_eq!(header_attribute("content-type"), Attribute::ContentType);
        assert_eq!(
            header_attribute("x-oss-meta-owner"),
            Attribute::Metadata(Cow::Owned("owner".to_string()))
        );
    }
}
