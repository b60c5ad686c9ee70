//! Distributed lock over a plain object store
//!
//! Object stores offer atomic put, get, delete and list on single keys, but
//! no compare-and-swap, leases or notifications. The lock here is therefore a
//! polling protocol around a *lock blob*: a small JSON document whose
//! presence means "held" and whose timestamp lets other processes detect an
//! abandoned holder.
//!
//! # Protocol
//!
//! Each acquisition attempt:
//!
//! 1. Reads the lock blob.
//! 2. If absent, writes a fresh blob carrying a new holder token and the
//!    current time, then reads it back. The lock is held only if the
//!    read-back still carries our token. The token is remembered across
//!    attempts, so a blob we wrote whose read-back failed is recognized as
//!    ours on the next pass.
//! 3. If present but older than the staleness threshold, deletes it and
//!    retries at once.
//! 4. If present and fresh, sleeps for the poll interval and retries.
//!
//! Store errors inside the loop are logged and treated like a held lock.
//! [`LockManager::lock`] never gives up on its own; bound it with
//! `tokio::time::timeout` if needed. Dropping the future mid-wait leaves
//! nothing behind, since nothing is written before step 2.
//!
//! # Guarantees
//!
//! Two callers can both see "absent" and both write. The read-back narrows
//! this to writes that land between the other caller's write and its
//! read-back, but does not remove it. There is no fairness between waiters.
//! The lock is advisory; blob operations on other keys are never blocked.
//!
//! # Layout
//!
//! Lock blobs live in a folder that [`BlobStore`] keeps out of data
//! operations and listings:
//!
//! ```text
//! locks/
//! └── acme/example.com/sites/example.com/lock.lock
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::config::LockConfig;
use crate::error::{StorageError, StorageResult};
use crate::key;

/// Top-level folder holding lock blobs
pub const LOCKS_PREFIX: &str = "locks";

/// Suffix appended to lock blob names
pub const LOCK_SUFFIX: &str = ".lock";

/// Contents of a lock blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token unique to one acquisition
    pub holder_id: String,
    /// Identifier of the lock manager that wrote the blob
    #[serde(default)]
    pub owner: Option<String>,
    /// Process id of the writer (diagnostics only)
    #[serde(default)]
    pub pid: Option<u32>,
    /// When the blob was written
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(owner: &str) -> Self {
        Self {
            holder_id: Uuid::new_v4().to_string(),
            owner: Some(owner.to_string()),
            pid: Some(std::process::id()),
            acquired_at: Utc::now(),
        }
    }

    /// Age of the lock at `now`; zero if the timestamp is in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the lock is older than `stale_after` at `now`.
    pub fn is_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > stale_after
    }
}

/// Outcome of one acquisition attempt.
#[derive(Debug)]
enum Attempt {
    /// We wrote the lock blob and the read-back confirmed it
    Acquired(LockInfo),
    /// A stale blob was removed; try again without waiting
    Reclaimed,
    /// Someone else holds a fresh lock
    Held(LockInfo),
    /// Our write was overwritten by a concurrent writer
    Lost,
}

/// Mutual exclusion across processes sharing one object store.
///
/// The manager keeps no in-process lock table; every bit of state lives in
/// the store. Two managers built over the same store (even in one process)
/// exclude each other.
#[derive(Clone)]
pub struct LockManager {
    blobs: BlobStore,
    config: LockConfig,
    owner: String,
}

impl LockManager {
    /// Create a lock manager storing lock blobs alongside `blobs`.
    pub fn new(blobs: BlobStore, config: LockConfig) -> Self {
        let owner = Uuid::new_v4().to_string();
        debug!(
            owner = %owner,
            stale_after_secs = config.stale_after().as_secs(),
            poll_interval_ms = config.poll_interval().as_millis() as u64,
            "Creating lock manager"
        );
        Self {
            blobs: blobs.with_lock_access(),
            config,
            owner,
        }
    }

    /// Identifier written into every lock blob this manager creates
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Lock timing in effect
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Blob key holding the lock for `name`.
    fn lock_key(name: &str) -> StorageResult<String> {
        let normalized = key::normalize(name);
        if normalized.is_empty() {
            return Err(StorageError::InvalidKey(name.to_string()));
        }
        Ok(format!("{}/{}{}", LOCKS_PREFIX, normalized, LOCK_SUFFIX))
    }

    /// Acquire the lock for `name`, waiting as long as it takes.
    ///
    /// Only an invalid name makes this fail; store errors are retried.
    pub async fn lock(&self, name: &str) -> StorageResult<()> {
        let lock_key = Self::lock_key(name)?;
        let mut attempts: u64 = 0;
        let mut pending = None;

        loop {
            attempts += 1;
            match self.attempt(&lock_key, &mut pending).await {
                Ok(Attempt::Acquired(info)) => {
                    info!(
                        lock = %name,
                        holder = %info.holder_id,
                        attempts = attempts,
                        "Acquired lock"
                    );
                    return Ok(());
                }
                Ok(Attempt::Reclaimed) => continue,
                Ok(Attempt::Held(current)) => {
                    trace!(
                        lock = %name,
                        holder = %current.holder_id,
                        age_secs = current.age(Utc::now()).as_secs(),
                        "Lock is held, waiting"
                    );
                }
                Ok(Attempt::Lost) => {
                    debug!(lock = %name, "Lock write was overtaken, retrying");
                }
                Err(e) => {
                    warn!(lock = %name, error = %e, "Store error while acquiring lock, retrying");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Try to acquire the lock for `name` without waiting.
    ///
    /// Returns `Ok(false)` if someone else holds it. Unlike [`lock`], store
    /// errors are returned to the caller. An error after the write may leave
    /// our lock blob behind; [`unlock`] clears it.
    ///
    /// [`lock`]: LockManager::lock
    /// [`unlock`]: LockManager::unlock
    pub async fn try_lock(&self, name: &str) -> StorageResult<bool> {
        let lock_key = Self::lock_key(name)?;
        let mut pending = None;

        let mut outcome = self.attempt(&lock_key, &mut pending).await?;
        if matches!(outcome, Attempt::Reclaimed) {
            outcome = self.attempt(&lock_key, &mut pending).await?;
        }

        match outcome {
            Attempt::Acquired(info) => {
                info!(lock = %name, holder = %info.holder_id, "Acquired lock");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Release the lock for `name`.
    ///
    /// Deletes the lock blob whoever wrote it. Releasing a lock that is not
    /// held (or was already reclaimed by someone else) succeeds.
    pub async fn unlock(&self, name: &str) -> StorageResult<()> {
        let lock_key = Self::lock_key(name)?;

        match self.blobs.delete(&lock_key).await {
            Ok(()) => {
                info!(lock = %name, "Released lock");
                Ok(())
            }
            Err(StorageError::NotExist { .. }) => {
                debug!(lock = %name, "Lock already released");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current lock blob for `name`, if any.
    pub async fn lock_info(&self, name: &str) -> StorageResult<Option<LockInfo>> {
        let lock_key = Self::lock_key(name)?;
        self.read(&lock_key).await
    }

    /// Whether `name` is currently held by a non-stale lock.
    pub async fn is_locked(&self, name: &str) -> StorageResult<bool> {
        let stale_after = self.config.stale_after();
        Ok(self
            .lock_info(name)
            .await?
            .is_some_and(|info| !info.is_stale(stale_after, Utc::now())))
    }

    /// One pass of the acquisition protocol.
    ///
    /// `pending` carries the holder token of our last write between passes.
    async fn attempt(
        &self,
        lock_key: &str,
        pending: &mut Option<String>,
    ) -> StorageResult<Attempt> {
        if let Some(current) = self.read(lock_key).await? {
            if pending.as_deref() == Some(current.holder_id.as_str()) {
                debug!(lock = %lock_key, "Found our own earlier lock write");
                return Ok(Attempt::Acquired(current));
            }

            let now = Utc::now();
            if !current.is_stale(self.config.stale_after(), now) {
                return Ok(Attempt::Held(current));
            }

            warn!(
                lock = %lock_key,
                holder = %current.holder_id,
                age_secs = current.age(now).as_secs(),
                "Reclaiming stale lock"
            );
            match self.blobs.delete(lock_key).await {
                Ok(()) | Err(StorageError::NotExist { .. }) => {}
                Err(e) => return Err(e),
            }
            return Ok(Attempt::Reclaimed);
        }

        let ours = LockInfo::new(&self.owner);
        let content = serde_json::to_vec(&ours)?;
        // Remembered before the write: a put that errors may still have landed.
        *pending = Some(ours.holder_id.clone());
        self.blobs.store(lock_key, content).await?;

        match self.read(lock_key).await? {
            Some(seen) if seen.holder_id == ours.holder_id => Ok(Attempt::Acquired(ours)),
            _ => {
                *pending = None;
                Ok(Attempt::Lost)
            }
        }
    }

    /// Read and decode the lock blob at `lock_key`.
    ///
    /// An undecodable blob still counts as a lock; its age comes from the
    /// object's modification time.
    async fn read(&self, lock_key: &str) -> StorageResult<Option<LockInfo>> {
        let content = match self.blobs.load(lock_key).await {
            Ok(content) => content,
            Err(StorageError::NotExist { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<LockInfo>(&content) {
            Ok(info) => Ok(Some(info)),
            Err(parse_err) => {
                debug!(lock = %lock_key, error = %parse_err, "Unreadable lock blob, using object timestamp");
                match self.blobs.stat(lock_key).await {
                    Ok(meta) => Ok(Some(LockInfo {
                        holder_id: "unknown".to_string(),
                        owner: None,
                        pid: None,
                        acquired_at: meta.modified,
                    })),
                    Err(StorageError::NotExist { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .field("blobs", &self.blobs)
            .finish()
    }
}
