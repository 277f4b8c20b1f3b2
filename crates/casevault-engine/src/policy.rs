//! Classification policy stored as key/value configuration
//!
//! Three keys drive the engine: the sensitive-keyword pattern, the migration
//! threshold in bytes and the cold-data cutoff timestamp. Each key is seeded
//! with its default the first time it is read.

use casevault_config::PolicyConfig;
use casevault_store::SharedStore;
use casevault_types::{ConfigEntry, Error, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Format of the cold-data cutoff value
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Policy keys with built-in defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKey {
    /// Regex matched against file names
    SensitiveKeywords,
    /// Free bytes a disk must keep after a write
    MigrationThreshold,
    /// Files last modified before this local timestamp are cold
    ColdDataThreshold,
}

impl PolicyKey {
    /// Every known key
    pub const ALL: [PolicyKey; 3] = [
        PolicyKey::SensitiveKeywords,
        PolicyKey::MigrationThreshold,
        PolicyKey::ColdDataThreshold,
    ];

    /// Stored key name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SensitiveKeywords => "sensitive_keywords",
            Self::MigrationThreshold => "migration_threshold",
            Self::ColdDataThreshold => "last_file_access_time",
        }
    }

    /// Human-readable description stored next to the value
    pub const fn description(self) -> &'static str {
        match self {
            Self::SensitiveKeywords => "Regex of file-name keywords that mark a file as sensitive",
            Self::MigrationThreshold => {
                "Free bytes a disk must keep; below this it needs migration"
            }
            Self::ColdDataThreshold => "Files last modified before this time are cold data",
        }
    }

    /// Check a candidate value
    pub fn validate(self, value: &str) -> Result<()> {
        match self {
            Self::SensitiveKeywords => compile_keywords(value).map(|_| ()),
            Self::MigrationThreshold => parse_threshold(value).map(|_| ()),
            Self::ColdDataThreshold => parse_timestamp(value).map(|_| ()),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| Error::validation(format!("unknown policy key: {}", s)))
    }
}

fn compile_keywords(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::validation(format!("invalid sensitive keyword pattern: {}", e)))
}

fn parse_threshold(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::validation(format!("migration threshold must be a byte count: {}", e)))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map_err(|e| {
        Error::validation(format!(
            "cold data threshold must look like 2024-01-31 23:59:59: {}",
            e
        ))
    })
}

/// Resolved policy values for one classification pass
#[derive(Debug, Clone)]
pub struct Policy {
    sensitive: Regex,
    /// Free bytes a disk must keep after a write
    pub migration_threshold: u64,
    /// Local cutoff; files modified earlier are cold
    pub cold_before: NaiveDateTime,
}

impl Policy {
    /// Build from raw values
    pub fn new(
        keywords: &str,
        migration_threshold: u64,
        cold_before: NaiveDateTime,
    ) -> Result<Self> {
        Ok(Self {
            sensitive: compile_keywords(keywords)?,
            migration_threshold,
            cold_before,
        })
    }

    /// Case-insensitive keyword search against a file name
    pub fn is_sensitive(&self, file_name: &str) -> bool {
        self.sensitive.is_match(file_name)
    }

    /// Whether a local modification time is older than the cutoff
    pub fn is_cold(&self, modified: NaiveDateTime) -> bool {
        modified < self.cold_before
    }

    /// Keyword pattern in use
    pub fn keywords(&self) -> &str {
        self.sensitive.as_str()
    }
}

/// Reads and writes policy keys, seeding defaults lazily
pub struct PolicyStore {
    store: SharedStore,
    defaults: PolicyConfig,
    seed_lock: Mutex<()>,
}

impl fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyStore")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl PolicyStore {
    /// Policy over `store` with defaults from the engine configuration
    pub fn new(store: SharedStore, defaults: PolicyConfig) -> Self {
        Self {
            store,
            defaults,
            seed_lock: Mutex::new(()),
        }
    }

    fn default_value(&self, key: &str) -> String {
        match key.parse::<PolicyKey>() {
            Ok(PolicyKey::SensitiveKeywords) => self.defaults.sensitive_keywords.clone(),
            Ok(PolicyKey::MigrationThreshold) => self.defaults.migration_threshold.to_string(),
            Ok(PolicyKey::ColdDataThreshold) => {
                let cutoff = Local::now().naive_local()
                    - ChronoDuration::days(self.defaults.cold_age_days);
                cutoff.format(TIMESTAMP_FORMAT).to_string()
            }
            Err(_) => String::new(),
        }
    }

    /// Entry for `key`, storing the default first if the key was never set
    pub async fn get(&self, key: &str) -> Result<ConfigEntry> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation("config key must not be empty"));
        }
        if let Some(entry) = self.store.get_config(key).await? {
            return Ok(entry);
        }

        let _seed = self.seed_lock.lock().await;
        if let Some(entry) = self.store.get_config(key).await? {
            return Ok(entry);
        }
        let description = key
            .parse::<PolicyKey>()
            .map(PolicyKey::description)
            .unwrap_or_default();
        let entry = ConfigEntry::new(key, self.default_value(key), description);
        self.store.put_config(&entry).await?;
        debug!("Seeded config {} = {}", key, entry.value);
        Ok(entry)
    }

    /// Values for several keys
    pub async fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for key in keys {
            let entry = self.get(key.as_ref()).await?;
            values.insert(entry.key, entry.value);
        }
        Ok(values)
    }

    /// Set a key; known policy keys are validated first
    pub async fn update(&self, key: &str, value: &str) -> Result<ConfigEntry> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation("config key must not be empty"));
        }
        let known = key.parse::<PolicyKey>().ok();
        if let Some(policy_key) = known {
            policy_key.validate(value)?;
        }

        let mut entry = match self.store.get_config(key).await? {
            Some(entry) => entry,
            None => ConfigEntry::new(
                key,
                "",
                known.map(PolicyKey::description).unwrap_or_default(),
            ),
        };
        entry.value = value.trim().to_string();
        entry.updated_at = chrono::Utc::now();
        self.store.put_config(&entry).await?;
        info!("Config {} updated", key);
        Ok(entry)
    }

    /// Current migration threshold in bytes
    pub async fn migration_threshold(&self) -> Result<u64> {
        let entry = self.get(PolicyKey::MigrationThreshold.as_str()).await?;
        parse_threshold(&entry.value).map_err(|e| Error::config(e.to_string()))
    }

    /// Resolve all three keys
    pub async fn load(&self) -> Result<Policy> {
        let keywords = self.get(PolicyKey::SensitiveKeywords.as_str()).await?;
        let threshold = self.migration_threshold().await?;
        let cold = self.get(PolicyKey::ColdDataThreshold.as_str()).await?;
        let cold_before = parse_timestamp(&cold.value).map_err(|e| Error::config(e.to_string()))?;
        Policy::new(&keywords.value, threshold, cold_before)
            .map_err(|e| Error::config(e.to_string()))
    }
}
