//! Unified test utilities for CaseVault integration tests

use async_trait::async_trait;
use casevault_config::Config;
use casevault_device::CredentialCipher;
use casevault_engine::NotificationSink;
use casevault_store::{SharedStore, TaskStore};
use casevault_types::{BackupEvent, Result};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// A name the default keyword pattern treats as sensitive
pub const SENSITIVE_NAME: &str = "杀人_statement.txt";

/// Days back that make a file cold under the default policy
pub const COLD_AGE_DAYS: u64 = 400;

/// Deterministic, non-repeating bytes
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i * 7 + 13) % 251) as u8).collect()
}

/// Write `size` bytes of test data to `dir/name`
pub fn create_test_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, generate_test_data(size)).expect("Failed to write test file");
    path
}

/// Set a file's mtime `days` into the past
pub fn age_file(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 86_400);
    filetime::set_file_mtime(path, FileTime::from_system_time(when))
        .expect("Failed to set mtime");
}

/// Write a cold file
pub fn create_cold_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = create_test_file(dir, name, size);
    age_file(&path, COLD_AGE_DAYS);
    path
}

/// Layout of [`create_case_dir`]
#[derive(Debug, Clone)]
pub struct CaseDir {
    /// Case root
    pub root: PathBuf,
    /// Sensitive file, two copies
    pub sensitive: PathBuf,
    /// Cold file, one copy
    pub cold: PathBuf,
    /// Recent file, no copy
    pub fresh: PathBuf,
}

impl CaseDir {
    /// Bytes a full backup of the case writes
    pub fn planned_bytes(&self) -> u64 {
        let len = |p: &Path| fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        len(&self.sensitive) * 2 + len(&self.cold)
    }
}

/// `case/<sensitive>` (3000 bytes), `case/archive/old.log` (cold, 1200 bytes) and `case/fresh.txt`
pub fn create_case_dir(parent: &Path) -> CaseDir {
    let root = parent.join("case");
    CaseDir {
        sensitive: create_test_file(&root, SENSITIVE_NAME, 3000),
        cold: create_cold_file(&root, "archive/old.log", 1200),
        fresh: create_test_file(&root, "fresh.txt", 64),
        root,
    }
}

/// Engine configuration rooted in a scratch directory
pub fn test_config(scratch: &Path) -> Config {
    let mut config = Config::default();
    config.storage.local_mount_root = scratch.join("mnt");
    config.storage.state_file = scratch.join("state.json");
    config.engine.poll_interval_ms = 10;
    config.engine.chunk_size = 1024;
    config.policy.auto_backup_cold_data = false;
    config.security.credential_key = Some(CredentialCipher::generate_key());
    config
}

/// Sink that pauses a task once, the first time a copy reports `at` bytes or more
pub struct PauseAtOffset {
    store: SharedStore,
    at: u64,
    fired: AtomicBool,
}

impl PauseAtOffset {
    /// Pause through `store` once a progress event reaches `at`
    pub fn new(store: SharedStore, at: u64) -> Self {
        Self {
            store,
            at,
            fired: AtomicBool::new(false),
        }
    }

    /// Whether the pause was requested
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for PauseAtOffset {
    async fn publish(&self, event: &BackupEvent) -> Result<()> {
        let BackupEvent::Progress(log) = event else {
            return Ok(());
        };
        if log.transfer_offset < self.at || self.fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut task) = self.store.get_task(log.task_id).await? {
            task.paused = true;
            self.store.update_task(&task).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_test_data() {
        let data = generate_test_data(1024);
        assert_eq!(data.len(), 1024);
        assert_ne!(data[0], data[1]);
        assert_eq!(data, generate_test_data(1024));
    }

    #[test]
    fn test_case_dir_layout() {
        let temp_dir = TempDir::new().unwrap();
        let case = create_case_dir(temp_dir.path());
        assert!(case.sensitive.exists());
        assert!(case.cold.exists());
        assert!(case.fresh.exists());
        assert_eq!(case.planned_bytes(), 3000 * 2 + 1200);
    }
}
