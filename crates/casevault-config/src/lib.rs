//! Configuration management system for CaseVault
//!
//! Engine settings are loaded in layers: built-in defaults, then the first
//! configuration file found (YAML, TOML or JSON), then `CASEVAULT__*`
//! environment variables.
//!
//! # Examples
//!
//! ```rust
//! use casevault_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("casevault.yaml")
//!     .add_env_prefix("CASEVAULT")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! assert_eq!(config.engine.chunk_size, 8192);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Default sensitive-keyword pattern
pub const DEFAULT_SENSITIVE_KEYWORDS: &str = "强奸|杀人|抢劫";

/// Default free-space floor per disk: 50 GiB
pub const DEFAULT_MIGRATION_THRESHOLD: u64 = 50 * 1024 * 1024 * 1024;

/// Main configuration structure for CaseVault
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Defaults for the persisted policy keys
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Local storage layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote share settings
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Transfer engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes copied per chunk; an offset is persisted after each chunk
    pub chunk_size: usize,
    /// Bytes between progress events for one copy
    pub progress_interval_bytes: u64,
    /// Housekeeping poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Backup runs allowed at once
    pub max_concurrent_tasks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            progress_interval_bytes: 100 * 1024 * 1024,
            poll_interval_ms: 1000,
            max_concurrent_tasks: 4,
        }
    }
}

impl EngineConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults used when a policy key is first read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Regex matched against file names
    pub sensitive_keywords: String,
    /// Free bytes every disk must keep
    pub migration_threshold: u64,
    /// Age in days after which a file is cold
    pub cold_age_days: i64,
    /// Start a backup when classification finds cold data
    pub auto_backup_cold_data: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            sensitive_keywords: DEFAULT_SENSITIVE_KEYWORDS.to_string(),
            migration_threshold: DEFAULT_MIGRATION_THRESHOLD,
            cold_age_days: 365,
            auto_backup_cold_data: true,
        }
    }
}

/// Local storage layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory under which initialized local disks are mounted
    pub local_mount_root: PathBuf,
    /// Where audit indexes are written; defaults to the task's target root
    pub index_dir: Option<PathBuf>,
    /// Snapshot file the command-line front end persists state to
    pub state_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_mount_root: PathBuf::from("/backup"),
            index_dir: None,
            state_file: PathBuf::from("casevault-state.json"),
        }
    }
}

/// Remote share settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `smbclient` executable
    pub smbclient_path: PathBuf,
    /// Seconds before a capacity query is abandoned
    pub query_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            smbclient_path: PathBuf::from("smbclient"),
            query_timeout_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            colored_output: true,
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base64 AES-256 key sealing remote share passwords
    pub credential_key: Option<String>,
}
