//! Object-store client seam
//!
//! The blob store and the lock manager only ever talk to the backing store
//! through [`ObjectClient`]. It needs no conditional writes or leases; plain
//! put, get, delete and list are enough.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};
use crate::key;

/// A single object as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full key of the object inside the store
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
    /// When the object was last written
    pub last_modified: DateTime<Utc>,
}

/// Primitive operations of an object store.
///
/// Keys passed in are already normalized. Implementations must be safe to
/// share between tasks.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Write `data` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Read the object under `key`.
    ///
    /// Returns [`StorageError::NotExist`] if there is no such object.
    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    /// Remove the object under `key`. Removing an absent object succeeds.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// List every object strictly below `prefix`, at any depth.
    ///
    /// The empty prefix lists the whole store. Order is unspecified.
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;

    /// Metadata for the object under `key`.
    ///
    /// The default lists the parent prefix and picks the exact match. Clients
    /// with a native metadata call should override it.
    async fn head_object(&self, key: &str) -> StorageResult<ObjectEntry> {
        let parent = match key.rfind(key::SEPARATOR) {
            Some(idx) => &key[..idx],
            None => "",
        };
        self.list_objects(parent)
            .await?
            .into_iter()
            .find(|entry| entry.key == key)
            .ok_or_else(|| StorageError::not_exist(key))
    }
}
