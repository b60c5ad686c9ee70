//! Keystash CLI - Main entry point
//!
//! Inspect and manipulate certificate storage and its locks from the shell.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use keystash_storage::{BackendConfig, CertStorage, StorageConfig};

/// Environment prefix for configuration overrides (`KEYSTASH__LOCK__STALE_AFTER_SECS=30`)
const ENV_PREFIX: &str = "KEYSTASH";

/// Keystash - certificate storage with distributed locking
#[derive(Parser, Debug)]
#[command(name = "keystash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (JSON, TOML or YAML)
    #[arg(short = 'c', long = "config", env = "KEYSTASH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Use a local directory as the object store
    #[arg(long = "local", global = true)]
    local: Option<PathBuf>,

    /// Namespace prepended to every key
    #[arg(long = "prefix", global = true)]
    prefix: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value or file under a key
    Store {
        key: String,
        /// Literal value to store
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        value: Option<String>,
        /// Read the value from a file
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },
    /// Print the value stored under a key
    Load {
        key: String,
        /// Write to a file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Delete a key
    Delete { key: String },
    /// Report whether a key exists
    Exists { key: String },
    /// Show metadata for a key
    Stat { key: String },
    /// List keys below a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
        /// Include keys at every depth
        #[arg(short = 'r', long = "recursive")]
        recursive: bool,
    },
    /// Acquire a lock and leave it held
    Lock {
        name: String,
        /// Give up after this many seconds
        #[arg(long = "timeout")]
        timeout_secs: Option<u64>,
    },
    /// Release a lock (succeeds if not held)
    Unlock { name: String },
    /// Show who holds a lock and for how long
    LockInfo { name: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    run(&config, cli.command).await
}

/// Build the configuration: defaults, then the config file, then environment,
/// then command line overrides.
///
/// Without a config file or `--local`, the backend comes from the `AWS_*`
/// variables (see [`StorageConfig::from_env`]). The memory backend is
/// refused since nothing would survive the command.
fn load_config(cli: &Cli) -> Result<StorageConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__"),
    );

    let mut storage_config: StorageConfig = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;

    if let Some(path) = &cli.local {
        storage_config.backend = BackendConfig::Local { path: path.clone() };
    }

    let backend_given = cli.config.is_some() || cli.local.is_some();
    if !backend_given && matches!(storage_config.backend, BackendConfig::Memory) {
        info!("No config file or --local given, using AWS environment");
        let from_env = StorageConfig::from_env().context(
            "No storage configured: pass --config or --local, or set AWS_S3_BUCKET",
        )?;
        storage_config.backend = from_env.backend;
        if storage_config.prefix.is_none() {
            storage_config.prefix = from_env.prefix;
        }
    }

    if let Some(prefix) = &cli.prefix {
        storage_config.prefix = Some(prefix.clone());
    }
    if matches!(storage_config.backend, BackendConfig::Memory) {
        anyhow::bail!("The memory backend does not persist between commands; use local or s3");
    }

    storage_config
        .validate()
        .context("Configuration validation failed")?;
    debug!(config = ?storage_config, "Effective configuration");

    Ok(storage_config)
}

/// Copy of the configuration safe to print
fn redacted(config: &StorageConfig) -> StorageConfig {
    let mut config = config.clone();
    if let BackendConfig::S3(s3) = &mut config.backend {
        if s3.secret_access_key.is_some() {
            s3.secret_access_key = Some("********".to_string());
        }
    }
    config
}

async fn run(config: &StorageConfig, command: Commands) -> Result<()> {
    let open = || CertStorage::from_config(config).context("Failed to open storage");

    match command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&redacted(config))?);
        }
        Commands::Store { key, value, file } => {
            let content = match (value, file) {
                (_, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (Some(value), None) => value.into_bytes(),
                (None, None) => anyhow::bail!("nothing to store"),
            };
            open()?.store(&key, content).await?;
        }
        Commands::Load { key, output } => {
            let content = open()?.load(&key).await?;
            match output {
                Some(path) => std::fs::write(&path, &content)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => std::io::stdout().write_all(&content)?,
            }
        }
        Commands::Delete { key } => open()?.delete(&key).await?,
        Commands::Exists { key } => println!("{}", open()?.exists(&key).await),
        Commands::Stat { key } => {
            let info = open()?.stat(&key).await?;
            println!("key:       {}", info.key);
            println!("size:      {}", info.size);
            println!("modified:  {}", info.modified.to_rfc3339());
            println!("directory: {}", info.is_directory);
        }
        Commands::List { prefix, recursive } => {
            for key in open()?.list(&prefix, recursive).await? {
                println!("{}", key);
            }
        }
        Commands::Lock { name, timeout_secs } => {
            let storage = open()?;
            match timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), storage.lock(&name))
                    .await
                    .with_context(|| format!("Timed out after {}s waiting for lock", secs))??,
                None => storage.lock(&name).await?,
            }
            println!("locked {}", name);
        }
        Commands::Unlock { name } => {
            open()?.unlock(&name).await?;
            println!("unlocked {}", name);
        }
        Commands::LockInfo { name } => match open()?.lock_info(&name).await? {
            Some(lock) => {
                let stale_after = config.lock.stale_after();
                println!("holder:   {}", lock.holder_id);
                println!("owner:    {}", lock.owner.as_deref().unwrap_or("-"));
                println!("acquired: {}", lock.acquired_at.to_rfc3339());
                println!("age:      {}s", lock.age(Utc::now()).as_secs());
                println!("stale:    {}", lock.is_stale(stale_after, Utc::now()));
            }
            None => println!("{} is not locked", name),
        },
    }
    Ok(())
}
