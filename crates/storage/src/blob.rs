//! Blob store over an object client
//!
//! Maps hierarchical keys to opaque payloads. Object stores have no
//! directories; listing and stat derive them from key prefixes.
//!
//! # Key Layout
//!
//! ```text
//! <root>/
//! └── acme/
//!     └── example.com/
//!         └── sites/
//!             └── example.com/
//!                 ├── example.com.crt
//!                 ├── example.com.key
//!                 └── example.com.json
//! ```
//!
//! `<root>` is the optional namespace from the configuration. Callers never
//! see it: keys going in and out are relative to it.
//!
//! The top-level `locks` folder belongs to the lock manager. Data operations
//! reject keys inside it and listings leave it out.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::client::ObjectClient;
use crate::error::{StorageError, StorageResult};
use crate::key;
use crate::lock::LOCKS_PREFIX;

/// Metadata about a stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Key, relative to the store's namespace
    pub key: String,
    /// Payload size in bytes (0 for directories)
    pub size: u64,
    /// Last write time; for directories, the newest write below it
    pub modified: DateTime<Utc>,
    /// `true` when the key is a common prefix of other keys, not an object
    pub is_directory: bool,
}

/// Key/value blob storage with prefix listing.
///
/// Cloning is cheap and clones share the underlying client.
#[derive(Clone)]
pub struct BlobStore {
    client: Arc<dyn ObjectClient>,
    root: String,
    lock_access: bool,
}

impl BlobStore {
    /// Create a blob store over `client` with no namespace.
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self::with_root(client, "")
    }

    /// Create a blob store whose keys all live below `root`.
    pub fn with_root(client: Arc<dyn ObjectClient>, root: &str) -> Self {
        Self {
            client,
            root: key::normalize(root),
            lock_access: false,
        }
    }

    /// A view of the same store that can read and write lock blobs.
    pub(crate) fn with_lock_access(&self) -> Self {
        Self {
            lock_access: true,
            ..self.clone()
        }
    }

    /// Whether `key` (normalized, relative to the root) may be used here.
    fn is_visible(&self, key: &str) -> bool {
        self.lock_access || !(key == LOCKS_PREFIX || key::is_under(key, LOCKS_PREFIX))
    }

    /// The namespace prepended to every key
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Normalize a caller key and place it inside the namespace.
    fn object_key(&self, key: &str) -> StorageResult<String> {
        let normalized = key::normalize(key);
        if normalized.is_empty() || !self.is_visible(&normalized) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(key::join([self.root.as_str(), normalized.as_str()]))
    }

    /// Map a stored object key back to a caller key.
    fn caller_key(&self, object_key: &str) -> Option<String> {
        key::strip_root(object_key, &self.root).map(str::to_string)
    }

    /// Store `content` under `key`, overwriting any previous value.
    pub async fn store(&self, key: &str, content: impl Into<Bytes>) -> StorageResult<()> {
        let object_key = self.object_key(key)?;
        let content = content.into();
        let size = content.len();

        self.client.put_object(&object_key, content).await?;

        debug!(key = %key, size = size, "Stored blob");
        Ok(())
    }

    /// Load the exact bytes stored under `key`.
    ///
    /// Returns [`StorageError::NotExist`] if the key is absent.
    pub async fn load(&self, key: &str) -> StorageResult<Bytes> {
        let object_key = self.object_key(key)?;
        let content = self
            .client
            .get_object(&object_key)
            .await
            .map_err(|e| relabel_not_exist(e, key))?;

        trace!(key = %key, size = content.len(), "Loaded blob");
        Ok(content)
    }

    /// Best-effort existence check.
    ///
    /// Any failure, including a transient store error, reads as `false`.
    pub async fn exists(&self, key: &str) -> bool {
        let Ok(object_key) = self.object_key(key) else {
            return false;
        };
        match self.client.head_object(&object_key).await {
            Ok(_) => true,
            Err(StorageError::NotExist { .. }) => false,
            Err(e) => {
                debug!(key = %key, error = %e, "Existence check failed, reporting absent");
                false
            }
        }
    }

    /// Delete `key`.
    ///
    /// Returns [`StorageError::NotExist`] if the key was not present.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let object_key = self.object_key(key)?;

        // The object store's delete is idempotent, so absence is checked first.
        self.client
            .head_object(&object_key)
            .await
            .map_err(|e| relabel_not_exist(e, key))?;
        self.client.delete_object(&object_key).await?;

        debug!(key = %key, "Deleted blob");
        Ok(())
    }

    /// Metadata for `key`.
    ///
    /// A key that is not an object but prefixes other keys is reported as a
    /// directory. Returns [`StorageError::NotExist`] when neither applies.
    pub async fn stat(&self, key: &str) -> StorageResult<BlobInfo> {
        let object_key = self.object_key(key)?;
        let caller_key = key::normalize(key);

        match self.client.head_object(&object_key).await {
            Ok(entry) => {
                return Ok(BlobInfo {
                    key: caller_key,
                    size: entry.size,
                    modified: entry.last_modified,
                    is_directory: false,
                })
            }
            Err(StorageError::NotExist { .. }) => {}
            Err(e) => return Err(e),
        }

        let newest = self
            .client
            .list_objects(&object_key)
            .await?
            .into_iter()
            .filter(|entry| key::is_under(&entry.key, &object_key))
            .map(|entry| entry.last_modified)
            .max();

        match newest {
            Some(modified) => Ok(BlobInfo {
                key: caller_key,
                size: 0,
                modified,
                is_directory: true,
            }),
            None => Err(StorageError::not_exist(caller_key)),
        }
    }

    /// List keys below `prefix`.
    ///
    /// With `recursive` every key at any depth is returned. Without it only
    /// the distinct immediate children (`prefix/<segment>`) are returned, so
    /// nested keys show up as their top-level directory. The empty prefix
    /// lists from the namespace root. No match yields an empty list.
    pub async fn list(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>> {
        let prefix = key::normalize(prefix);
        let object_prefix = key::join([self.root.as_str(), prefix.as_str()]);

        let entries = self.client.list_objects(&object_prefix).await?;

        let keys: BTreeSet<String> = entries
            .iter()
            .filter_map(|entry| self.caller_key(&entry.key))
            .filter(|k| self.is_visible(k))
            .filter_map(|k| {
                if recursive {
                    key::is_under(&k, &prefix).then_some(k)
                } else {
                    key::child_of(&k, &prefix)
                }
            })
            .collect();

        trace!(
            prefix = %prefix,
            recursive = recursive,
            count = keys.len(),
            "Listed blobs"
        );
        Ok(keys.into_iter().collect())
    }
}

/// Report not-found errors with the caller's key instead of the stored one.
fn relabel_not_exist(err: StorageError, key: &str) -> StorageError {
    match err {
        StorageError::NotExist { .. } => StorageError::not_exist(key::normalize(key)),
        other => other,
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("root", &self.root)
            .field("lock_access", &self.lock_access)
            .finish_non_exhaustive()
    }
}
