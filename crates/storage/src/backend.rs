//! [`ObjectClient`] adapter over the `object_store` crate
//!
//! One adapter covers every backend `object_store` ships: in-memory, local
//! filesystem and Amazon S3 (or MinIO and other S3-compatible servers).

use std::fmt;
use std::fs;
use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use percent_encoding::percent_decode_str;
use tracing::{debug, info, trace};

use crate::client::{ObjectClient, ObjectEntry};
use crate::config::{BackendConfig, S3Config};
use crate::error::{StorageError, StorageResult};

/// Object client backed by any [`ObjectStore`] implementation.
#[derive(Clone)]
pub struct ObjectStoreClient {
    inner: Arc<dyn ObjectStore>,
    kind: &'static str,
}

impl ObjectStoreClient {
    /// Wrap an existing object store.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            kind: "custom",
        }
    }

    /// In-process store; contents vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            kind: "memory",
        }
    }

    /// Store rooted at a local directory, created if missing.
    ///
    /// Writes go through a temporary file and a rename, so readers never see
    /// a partial object.
    pub fn local(root: &FsPath) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(root, fs::Permissions::from_mode(0o700))?;
        }

        let store = LocalFileSystem::new_with_prefix(root)?;
        info!(root = %root.display(), "Opened local object store");

        Ok(Self {
            inner: Arc::new(store),
            kind: "local",
        })
    }

    /// Store backed by an S3 bucket.
    ///
    /// Settings left unset fall back to the standard `AWS_*` environment.
    /// A custom endpoint is always addressed path-style, since it names the
    /// server rather than the bucket.
    pub fn s3(config: &S3Config) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_virtual_hosted_style_request(virtual_hosted_style(config))
            .with_allow_http(config.allow_http);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder.build()?;
        info!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            virtual_hosted = virtual_hosted_style(config),
            "Opened S3 object store"
        );

        Ok(Self {
            inner: Arc::new(store),
            kind: "s3",
        })
    }
}

/// Build the object client described by `config`.
pub fn connect(config: &BackendConfig) -> StorageResult<Arc<dyn ObjectClient>> {
    let client = match config {
        BackendConfig::Memory => ObjectStoreClient::in_memory(),
        BackendConfig::Local { path } => ObjectStoreClient::local(path)?,
        BackendConfig::S3(s3) => ObjectStoreClient::s3(s3)?,
    };
    Ok(Arc::new(client))
}

/// Whether requests address the bucket as `bucket.endpoint`.
fn virtual_hosted_style(config: &S3Config) -> bool {
    !config.force_path_style && config.endpoint.is_none()
}

fn map_err(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::not_exist(key),
        other => StorageError::Backend(other),
    }
}

/// Key as the caller wrote it.
///
/// [`Path`] percent-encodes characters it does not allow in a segment (`*`,
/// `~`, `%`, `#` and others, plus `.` and `..` segments). `%` is among them,
/// so decoding each part gives back the original key exactly.
fn decode_path(location: &Path) -> String {
    location
        .parts()
        .map(|part| percent_decode_str(part.as_ref()).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_entry(meta: ObjectMeta) -> ObjectEntry {
    ObjectEntry {
        key: decode_path(&meta.location),
        size: meta.size as u64,
        last_modified: meta.last_modified,
    }
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()> {
        trace!(key = %key, size = data.len(), "put object");
        self.inner
            .put(&Path::from(key), PutPayload::from(data))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        trace!(key = %key, "get object");
        let result = self
            .inner
            .get(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))?;
        result.bytes().await.map_err(|e| map_err(key, e))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        trace!(key = %key, "delete object");
        match self.inner.delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                debug!(key = %key, "Object already absent");
                Ok(())
            }
            Err(e) => Err(StorageError::Backend(e)),
        }
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        trace!(prefix = %prefix, "list objects");
        let prefix_path = (!prefix.is_empty()).then(|| Path::from(prefix));
        let entries: Vec<ObjectEntry> = self
            .inner
            .list(prefix_path.as_ref())
            .map_ok(to_entry)
            .try_collect()
            .await?;
        Ok(entries)
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectEntry> {
        trace!(key = %key, "head object");
        let meta = self
            .inner
            .head(&Path::from(key))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(to_entry(meta))
    }
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("kind", &self.kind)
            .field("store", &self.inner.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_put_get_delete() {
        let client = ObjectStoreClient::in_memory();

        client
            .put_object("acme/a.crt", Bytes::from_static(b"crt"))
            .await
            .unwrap();
        assert_eq!(client.get_object("acme/a.crt").await.unwrap(), "crt");

        client.delete_object("acme/a.crt").await.unwrap();
        let err = client.get_object("acme/a.crt").await.unwrap_err();
        assert!(err.is_not_exist());

        // Deleting twice is fine
        client.delete_object("acme/a.crt").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_head_missing() {
        let client = ObjectStoreClient::in_memory();
        let err = client.head_object("missing").await.unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let client = ObjectStoreClient::local(&dir.path().join("objects")).unwrap();

        client
            .put_object("acme/example.com/a.key", Bytes::from_static(b"key data"))
            .await
            .unwrap();

        let entry = client.head_object("acme/example.com/a.key").await.unwrap();
        assert_eq!(entry.key, "acme/example.com/a.key");
        assert_eq!(entry.size, 8);

        let listed = client.list_objects("acme").await.unwrap();
        assert_eq!(listed.len(), 1);

        client.delete_object("acme/example.com/a.key").await.unwrap();
        client.delete_object("acme/example.com/a.key").await.unwrap();
        assert!(client.list_objects("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_respects_segment_boundary() {
        let client = ObjectStoreClient::in_memory();
        client.put_object("a/b", Bytes::from_static(b"1")).await.unwrap();
        client.put_object("ab/c", Bytes::from_static(b"2")).await.unwrap();

        let listed = client.list_objects("a").await.unwrap();
        let keys: Vec<_> = listed.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a/b".to_string()]);
    }

    #[tokio::test]
    async fn test_list_returns_keys_as_written() {
        let client = ObjectStoreClient::in_memory();
        for key in ["a/x*y", "b~c/d", "100%/x", "dots/../e"] {
            client.put_object(key, Bytes::from_static(b"1")).await.unwrap();
        }

        let keys = |entries: Vec<ObjectEntry>| {
            entries.into_iter().map(|e| e.key).collect::<Vec<_>>()
        };
        assert_eq!(keys(client.list_objects("a").await.unwrap()), vec!["a/x*y"]);
        assert_eq!(keys(client.list_objects("b~c").await.unwrap()), vec!["b~c/d"]);
        assert_eq!(keys(client.list_objects("100%").await.unwrap()), vec!["100%/x"]);
        assert_eq!(keys(client.list_objects("dots").await.unwrap()), vec!["dots/../e"]);

        let entry = client.head_object("a/x*y").await.unwrap();
        assert_eq!(entry.key, "a/x*y");
    }

    #[test]
    fn test_virtual_hosted_style_only_without_endpoint() {
        let mut config = S3Config {
            bucket: "certs".to_string(),
            ..Default::default()
        };
        assert!(virtual_hosted_style(&config));

        config.endpoint = Some("http://localhost:9000".to_string());
        assert!(!virtual_hosted_style(&config));

        config.endpoint = None;
        config.force_path_style = true;
        assert!(!virtual_hosted_style(&config));
    }

    #[test]
    fn test_connect_memory() {
        assert!(connect(&BackendConfig::Memory).is_ok());
    }
}
