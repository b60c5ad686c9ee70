//! Certificate storage facade
//!
//! [`CertStorage`] is the surface a certificate manager talks to: blob CRUD,
//! listing and the distributed lock over one configured object store. What
//! the blobs contain and when to lock is up to the caller; by convention
//! certificates live under `acme/<issuer>/sites/<domain>/`.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::backend;
use crate::blob::{BlobInfo, BlobStore};
use crate::client::ObjectClient;
use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::lock::{LockInfo, LockManager};

/// Certificate storage with cross-process locking.
///
/// Cheap to clone; clones share the object client.
#[derive(Debug, Clone)]
pub struct CertStorage {
    blobs: BlobStore,
    locks: LockManager,
}

impl CertStorage {
    /// Create storage over an already connected object client.
    pub fn new(client: Arc<dyn ObjectClient>, config: &StorageConfig) -> Self {
        let blobs = BlobStore::with_root(client, config.prefix.as_deref().unwrap_or(""));
        let locks = LockManager::new(blobs.clone(), config.lock.clone());

        info!(
            root = %blobs.root(),
            stale_after_secs = config.lock.stale_after_secs,
            "Initialized certificate storage"
        );

        Self { blobs, locks }
    }

    /// Validate `config`, connect to its backend and create storage.
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let client = backend::connect(&config.backend)?;
        Ok(Self::new(client, config))
    }

    /// Connect using the AWS environment variables.
    ///
    /// See [`StorageConfig::from_env`].
    pub fn from_env() -> StorageResult<Self> {
        Self::from_config(&StorageConfig::from_env()?)
    }

    /// The underlying blob store
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The underlying lock manager
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // =========================================================================
    // Blob Operations
    // =========================================================================

    /// Store `content` under `key`
    pub async fn store(&self, key: &str, content: impl Into<Bytes>) -> StorageResult<()> {
        self.blobs.store(key, content).await
    }

    /// Load the bytes under `key`
    pub async fn load(&self, key: &str) -> StorageResult<Bytes> {
        self.blobs.load(key).await
    }

    /// Delete `key`
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.blobs.delete(key).await
    }

    /// Whether `key` exists (never fails)
    pub async fn exists(&self, key: &str) -> bool {
        self.blobs.exists(key).await
    }

    /// Metadata for `key`
    pub async fn stat(&self, key: &str) -> StorageResult<BlobInfo> {
        self.blobs.stat(key).await
    }

    /// Keys below `prefix`
    pub async fn list(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>> {
        self.blobs.list(prefix, recursive).await
    }

    // =========================================================================
    // Lock Operations
    // =========================================================================

    /// Block until the lock for `name` is held
    pub async fn lock(&self, name: &str) -> StorageResult<()> {
        self.locks.lock(name).await
    }

    /// Release the lock for `name`; succeeds if it is not held
    pub async fn unlock(&self, name: &str) -> StorageResult<()> {
        self.locks.unlock(name).await
    }

    /// Take the lock for `name` only if it is free right now
    pub async fn try_lock(&self, name: &str) -> StorageResult<bool> {
        self.locks.try_lock(name).await
    }

    /// Who holds the lock for `name`, if anyone
    pub async fn lock_info(&self, name: &str) -> StorageResult<Option<LockInfo>> {
        self.locks.lock_info(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use std::time::Duration;

    fn setup_storage() -> CertStorage {
        let config = StorageConfig {
            lock: LockConfig {
                stale_after_secs: 60,
                poll_interval_ms: 20,
            },
            ..Default::default()
        };
        CertStorage::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_crud_surface() {
        let storage = setup_storage();
        let key = "acme/example.com/sites/example.com/example.com.crt";

        storage.store(key, "crt data").await.unwrap();
        assert!(storage.exists(key).await);
        assert_eq!(storage.load(key).await.unwrap(), "crt data");
        assert_eq!(storage.stat(key).await.unwrap().key, key);
        assert_eq!(
            storage.list("acme/example.com/sites", false).await.unwrap(),
            vec!["acme/example.com/sites/example.com"]
        );

        storage.delete(key).await.unwrap();
        assert!(!storage.exists(key).await);
        assert!(storage.load(key).await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let storage = setup_storage();
        let lock = "acme/example.com/sites/example.com/lock";

        storage.lock(lock).await.unwrap();
        storage.unlock(lock).await.unwrap();
        storage.unlock(lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_two_storages_share_lock() {
        let client = backend::connect(&crate::config::BackendConfig::Memory).unwrap();
        let config = StorageConfig {
            lock: LockConfig {
                stale_after_secs: 60,
                poll_interval_ms: 20,
            },
            ..Default::default()
        };
        let first = CertStorage::new(Arc::clone(&client), &config);
        let second = CertStorage::new(client, &config);
        let lock = "acme/example.com/sites/example.com/lock";

        first.lock(lock).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(100), second.lock(lock)).await;
        assert!(waited.is_err());

        first.unlock(lock).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), second.lock(lock))
            .await
            .unwrap()
            .unwrap();
        second.unlock(lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_site_certificate_scenario() {
        let storage = setup_storage();
        let site = "acme/example.com/sites/example.com";
        for ext in ["crt", "key", "json"] {
            storage
                .store(&format!("{}/example.com.{}", site, ext), ext)
                .await
                .unwrap();
        }

        let lock = format!("{}/lock", site);
        assert!(storage.try_lock(&lock).await.unwrap());
        assert!(storage.lock_info(&lock).await.unwrap().is_some());

        assert_eq!(storage.list(site, true).await.unwrap().len(), 3);
        assert_eq!(
            storage.list("acme/example.com/sites", false).await.unwrap(),
            vec![site]
        );
        assert_eq!(storage.list("", false).await.unwrap(), vec!["acme"]);

        storage.unlock(&lock).await.unwrap();
        assert!(storage.lock_info(&lock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_namespaces_storage() {
        let client = backend::connect(&crate::config::BackendConfig::Memory).unwrap();
        let config = StorageConfig {
            prefix: Some("caddy".to_string()),
            ..Default::default()
        };
        let storage = CertStorage::new(Arc::clone(&client), &config);

        storage.store("acme/x.crt", "crt").await.unwrap();

        assert_eq!(storage.list("", true).await.unwrap(), vec!["acme/x.crt"]);
        assert!(BlobStore::new(client).exists("caddy/acme/x.crt").await);
    }
}
