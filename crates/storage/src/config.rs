//! Storage configuration
//!
//! Settings can come from a config file (deserialized with serde) or from the
//! AWS-style environment variables via [`StorageConfig::from_env`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default age after which a lock is presumed abandoned (2 minutes)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Default delay between lock acquisition attempts (1 second)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Root configuration for certificate storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which object store to use
    #[serde(default)]
    pub backend: BackendConfig,

    /// Namespace prepended to every key (e.g. a folder inside the bucket)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Lock timing
    #[serde(default)]
    pub lock: LockConfig,
}

/// Object store backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process store. Only useful for tests and single-process setups.
    #[default]
    Memory,

    /// Local directory. Processes on one host can share it.
    Local {
        /// Root directory for stored objects
        path: PathBuf,
    },

    /// Amazon S3 or an S3-compatible server such as MinIO.
    S3(S3Config),
}

/// Connection settings for S3-compatible stores.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,

    /// Region, e.g. `us-east-1`
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible servers
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key; falls back to the ambient AWS credential chain
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret key; falls back to the ambient AWS credential chain
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[serde(default)]
    pub force_path_style: bool,

    /// Permit plain HTTP endpoints
    #[serde(default)]
    pub allow_http: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("has_access_key_id", &self.access_key_id.is_some())
            .field("has_secret_access_key", &self.secret_access_key.is_some())
            .field("force_path_style", &self.force_path_style)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

/// Lock timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age in seconds after which an unreleased lock may be reclaimed
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Delay in milliseconds between acquisition attempts
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    /// Staleness threshold as a duration
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check that the timings make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock.poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.stale_after() <= self.poll_interval() {
            return Err(ConfigError::InvalidValue {
                field: "lock.stale_after_secs",
                reason: format!(
                    "must exceed the poll interval ({}ms)",
                    self.poll_interval_ms
                ),
            });
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Build an S3 configuration from the environment.
    ///
    /// Reads `AWS_S3_BUCKET` (required), `AWS_REGION`, `AWS_S3_ENDPOINT`,
    /// `AWS_S3_FORCE_PATH_STYLE`, `AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY` and `KEYSTASH_PREFIX`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bucket =
            non_empty_var("AWS_S3_BUCKET").ok_or(ConfigError::MissingVar("AWS_S3_BUCKET"))?;
        let endpoint = non_empty_var("AWS_S3_ENDPOINT");
        let allow_http = endpoint
            .as_deref()
            .is_some_and(|e| e.starts_with("http://"));

        let config = Self {
            backend: BackendConfig::S3(S3Config {
                bucket,
                region: non_empty_var("AWS_REGION"),
                endpoint,
                access_key_id: non_empty_var("AWS_ACCESS_KEY_ID"),
                secret_access_key: non_empty_var("AWS_SECRET_ACCESS_KEY"),
                force_path_style: non_empty_var("AWS_S3_FORCE_PATH_STYLE")
                    .is_some_and(|v| parse_flag(&v)),
                allow_http,
            }),
            prefix: non_empty_var("KEYSTASH_PREFIX"),
            lock: LockConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BackendConfig::S3(s3) = &self.backend {
            if s3.bucket.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "backend.bucket",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        self.lock.validate()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert!(matches!(config.backend, BackendConfig::Memory));
        assert_eq!(config.lock.stale_after(), DEFAULT_STALE_AFTER);
        assert_eq!(config.lock.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_s3_backend() {
        let json = r#"{
            "backend": {
                "type": "s3",
                "bucket": "s3tlstest",
                "region": "us-east-1",
                "endpoint": "http://localhost:9000",
                "force_path_style": true
            },
            "prefix": "certs",
            "lock": { "stale_after_secs": 30 }
        }"#;

        let config: StorageConfig = serde_json::from_str(json).unwrap();
        let BackendConfig::S3(s3) = &config.backend else {
            panic!("expected s3 backend");
        };
        assert_eq!(s3.bucket, "s3tlstest");
        assert!(s3.force_path_style);
        assert!(!s3.allow_http);
        assert_eq!(config.prefix.as_deref(), Some("certs"));
        assert_eq!(config.lock.stale_after(), Duration::from_secs(30));
        assert_eq!(config.lock.poll_interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_deserialize_local_backend() {
        let json = r#"{ "backend": { "type": "local", "path": "/var/lib/keystash" } }"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.backend,
            BackendConfig::Local { ref path } if path == &PathBuf::from("/var/lib/keystash")
        ));
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let config = StorageConfig {
            backend: BackendConfig::S3(S3Config::default()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_lock_timing() {
        let zero_poll = LockConfig {
            stale_after_secs: 10,
            poll_interval_ms: 0,
        };
        assert!(zero_poll.validate().is_err());

        let stale_too_short = LockConfig {
            stale_after_secs: 1,
            poll_interval_ms: 5_000,
        };
        assert!(stale_too_short.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let s3 = S3Config {
            bucket: "b".to_string(),
            secret_access_key: Some("hunter2".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", s3);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("has_secret_access_key: true"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }
}
