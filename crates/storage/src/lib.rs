//! Keystash Storage
//!
//! Certificate storage on top of an object store, with a distributed lock so
//! several processes sharing one bucket do not issue or renew the same
//! certificate at the same time.
//!
//! # Architecture
//!
//! - [`ObjectClient`] - The four primitives the core needs from a store
//! - [`ObjectStoreClient`] - Adapter for S3, local directories and memory
//! - [`BlobStore`] - Key/value CRUD and prefix listing
//! - [`LockManager`] - Polling lock built only from blob operations
//! - [`CertStorage`] - The combined surface over one configured store
//!
//! # Example
//!
//! ```ignore
//! use keystash_storage::{CertStorage, StorageConfig};
//!
//! let storage = CertStorage::from_config(&StorageConfig::from_env()?)?;
//!
//! storage.lock("acme/example.com/sites/example.com/lock").await?;
//! if !storage.exists("acme/example.com/sites/example.com/example.com.crt").await {
//!     // issue the certificate, then store it
//! }
//! storage.unlock("acme/example.com/sites/example.com/lock").await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod backend;
pub mod blob;
pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use backend::{connect, ObjectStoreClient};
pub use blob::{BlobInfo, BlobStore};
pub use client::{ObjectClient, ObjectEntry};
pub use config::{BackendConfig, LockConfig, S3Config, StorageConfig};
pub use error::{ConfigError, StorageError, StorageResult};
pub use lock::{LockInfo, LockManager};
pub use storage::CertStorage;
