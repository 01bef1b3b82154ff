//! Server and agent configuration.
//!
//! Each setting resolves as: command-line flag, then environment variable
//! (both handled by clap), then the JSON file named by `-c` / `CONFIG`,
//! then the built-in default.

use clap::Parser;
use ip_network::IpNetwork;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::middleware::trusted_subnet::parse_subnet;
use crate::storage::SnapshotFile;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_STORE_FILE: &str = "/tmp/metrics-db.json";
pub const DEFAULT_REAL_IP: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Keys accepted in the JSON config file, shared by both binaries.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    grpc_address: Option<String>,
    store_interval: Option<u64>,
    #[serde(alias = "file_storage_path")]
    store_file: Option<String>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    #[serde(alias = "hash")]
    hash_key: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
    poll_interval: Option<u64>,
    report_interval: Option<u64>,
    rate_limit: Option<usize>,
    real_ip: Option<String>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Empty strings count as unset, as they do for environment variables.
fn pick(flag: Option<String>, file: Option<String>) -> Option<String> {
    flag.filter(|s| !s.is_empty())
        .or(file.filter(|s| !s.is_empty()))
}

// ─── Server ──────────────────────────────────────────────────────

#[derive(Debug, Default, Parser)]
#[command(name = "metrics-server", about = "Metrics ingestion server", long_about = None)]
pub struct ServerArgs {
    /// HTTP listen address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address (disabled when unset)
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Seconds between snapshot flushes; 0 flushes on every write
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file; empty disables persistence
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub store_file: Option<String>,

    /// Load the snapshot file at startup
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// Database connection string; empty selects in-memory storage
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 key
    #[arg(short = 'k', long = "key", env = "KEY")]
    pub hash_key: Option<String>,

    /// Private key PEM for body decryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR allowed to send metrics
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    pub store_interval: Duration,
    pub store_file: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub hash_key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<IpNetwork>,
}

impl ServerConfig {
    /// Parse the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(ServerArgs::parse())
    }

    pub fn resolve(args: ServerArgs) -> Result<Self, ConfigError> {
        let file = FileConfig::load(args.config.as_deref())?;

        let trusted_subnet = pick(args.trusted_subnet, file.trusted_subnet)
            .map(|s| {
                parse_subnet(&s).map_err(|reason| ConfigError::Invalid {
                    field: "trusted subnet",
                    reason,
                })
            })
            .transpose()?;

        // An explicitly empty path disables persistence
        let store_file = match args.store_file.or(file.store_file) {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_STORE_FILE)),
        };

        Ok(Self {
            address: pick(args.address, file.address).unwrap_or_else(|| DEFAULT_ADDRESS.into()),
            grpc_address: pick(args.grpc_address, file.grpc_address),
            store_interval: Duration::from_secs(
                args.store_interval.or(file.store_interval).unwrap_or(300),
            ),
            store_file,
            restore: args.restore.or(file.restore).unwrap_or(true),
            database_dsn: pick(args.database_dsn, file.database_dsn),
            hash_key: pick(args.hash_key, file.hash_key),
            crypto_key: args.crypto_key.or(file.crypto_key),
            trusted_subnet,
        })
    }

    pub fn snapshot_file(&self) -> Option<SnapshotFile> {
        self.store_file.clone().map(SnapshotFile::new)
    }
}

// ─── Agent ───────────────────────────────────────────────────────

#[derive(Debug, Default, Parser)]
#[command(name = "metrics-agent", about = "Metrics collecting agent", long_about = None)]
pub struct AgentArgs {
    /// Server HTTP address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Server gRPC address; when set, records are sent over gRPC
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Seconds between samples
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(long = "ri", env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Concurrent senders and queue capacity
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// HMAC-SHA256 key
    #[arg(short = 'k', long = "key", env = "KEY")]
    pub hash_key: Option<String>,

    /// Public key PEM for body encryption
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Origin address declared to the server
    #[arg(long, env = "REAL_IP")]
    pub real_ip: Option<String>,

    /// JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
    pub hash_key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub real_ip: String,
}

impl AgentConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(AgentArgs::parse())
    }

    pub fn resolve(args: AgentArgs) -> Result<Self, ConfigError> {
        let file = FileConfig::load(args.config.as_deref())?;

        let seconds = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1 second".into(),
                })
            } else {
                Ok(Duration::from_secs(value))
            }
        };

        let rate_limit = args.rate_limit.or(file.rate_limit).unwrap_or(5);
        if rate_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "rate limit",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            address: pick(args.address, file.address).unwrap_or_else(|| DEFAULT_ADDRESS.into()),
            grpc_address: pick(args.grpc_address, file.grpc_address),
            poll_interval: seconds(
                "poll interval",
                args.poll_interval.or(file.poll_interval).unwrap_or(2),
            )?,
            report_interval: seconds(
                "report interval",
                args.report_interval.or(file.report_interval).unwrap_or(10),
            )?,
            rate_limit,
            hash_key: pick(args.hash_key, file.hash_key),
            crypto_key: args.crypto_key.or(file.crypto_key),
            real_ip: pick(args.real_ip, file.real_ip).unwrap_or_else(|| DEFAULT_REAL_IP.into()),
        })
    }
}
