//! In-memory store with JSON snapshots

use async_trait::async_trait;
use casevault_types::{
    BackupLog, BackupTask, ConfigEntry, Error, HardDisk, LogId, LogStatus, Result, TaskId,
    TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::traits::{ConfigStore, DiskStore, LogStore, TaskStore};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    tasks: BTreeMap<TaskId, BackupTask>,
    #[serde(default)]
    logs: BTreeMap<LogId, BackupLog>,
    #[serde(default)]
    disks: BTreeMap<Uuid, HardDisk>,
    #[serde(default)]
    config: BTreeMap<String, ConfigEntry>,
}

/// Store holding every record in memory
///
/// The whole state can be written to and restored from a JSON file, which lets
/// a later process resume tasks paused by an earlier one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot; a missing file yields an empty store
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(Error::from_io_at(&e, path)),
        };

        let state: StoreState = serde_json::from_slice(&bytes).map_err(|e| {
            Error::store(format!("corrupt snapshot {}: {}", path.display(), e))
        })?;
        info!(
            "Loaded snapshot {} ({} tasks, {} logs, {} disks)",
            path.display(),
            state.tasks.len(),
            state.logs.len(),
            state.disks.len()
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write the whole state to `path`, replacing it atomically
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)
                .map_err(|e| Error::store(format!("cannot encode snapshot: {}", e)))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io_at(&e, parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::from_io_at(&e, &tmp))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::from_io_at(&e, path))?;
        debug!("Saved snapshot {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &BackupTask) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(Error::store(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &BackupTask) -> Result<()> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(Error::not_found("task", task.id.to_string())),
        }
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<BackupTask>> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        let mut tasks: Vec<_> = self.state.read().await.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<BackupTask>> {
        Ok(self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_log(&self, log: &BackupLog) -> Result<()> {
        let mut state = self.state.write().await;
        if state.logs.contains_key(&log.id) {
            return Err(Error::store(format!("log {} already exists", log.id)));
        }
        state.logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn update_log(&self, log: &BackupLog) -> Result<()> {
        let mut state = self.state.write().await;
        match state.logs.get_mut(&log.id) {
            Some(slot) => {
                *slot = log.clone();
                Ok(())
            }
            None => Err(Error::not_found("log", log.id.to_string())),
        }
    }

    async fn get_log(&self, id: LogId) -> Result<Option<BackupLog>> {
        Ok(self.state.read().await.logs.get(&id).cloned())
    }

    async fn find_logs_by_task(&self, task_id: TaskId) -> Result<Vec<BackupLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<_> = state
            .logs
            .values()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.backup_time);
        Ok(logs)
    }

    async fn find_success_by_checksum(&self, checksum: &str) -> Result<Option<BackupLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .values()
            .filter(|l| l.status == LogStatus::Success && l.checksum == checksum)
            .min_by_key(|l| l.backup_time)
            .cloned())
    }

    async fn find_logs_by_disk(&self, disk_id: &str) -> Result<Vec<BackupLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .values()
            .filter(|l| l.disk_id == disk_id)
            .cloned()
            .collect())
    }

    async fn search_logs(&self, keyword: &str) -> Result<Vec<BackupLog>> {
        let state = self.state.read().await;
        let mut hits: Vec<_> = state
            .logs
            .values()
            .filter(|l| {
                l.filename.contains(keyword)
                    || l.target_path.to_string_lossy().contains(keyword)
            })
            .cloned()
            .collect();
        hits.sort_by_key(|l| l.backup_time);
        Ok(hits)
    }
}

#[async_trait]
impl DiskStore for MemoryStore {
    async fn insert_disk(&self, disk: &HardDisk) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .disks
            .values()
            .any(|d| d.serial_number == disk.serial_number)
        {
            return Err(Error::store(format!(
                "disk with serial number {} already exists",
                disk.serial_number
            )));
        }
        if state.disks.values().any(|d| d.disk_id == disk.disk_id) {
            return Err(Error::store(format!(
                "disk id {} already exists",
                disk.disk_id
            )));
        }
        state.disks.insert(disk.id, disk.clone());
        Ok(())
    }

    async fn update_disk(&self, disk: &HardDisk) -> Result<()> {
        let mut state = self.state.write().await;
        match state.disks.get_mut(&disk.id) {
            Some(slot) => {
                *slot = disk.clone();
                Ok(())
            }
            None => Err(Error::not_found("disk", disk.disk_id.clone())),
        }
    }

    async fn find_disk_by_disk_id(&self, disk_id: &str) -> Result<Option<HardDisk>> {
        let state = self.state.read().await;
        Ok(state.disks.values().find(|d| d.disk_id == disk_id).cloned())
    }

    async fn find_disk_by_serial(&self, serial_number: &str) -> Result<Option<HardDisk>> {
        let state = self.state.read().await;
        Ok(state
            .disks
            .values()
            .find(|d| d.serial_number == serial_number)
            .cloned())
    }

    async fn list_disks(&self) -> Result<Vec<HardDisk>> {
        let mut disks: Vec<_> = self.state.read().await.disks.values().cloned().collect();
        disks.sort_by(|a, b| a.disk_id.cmp(&b.disk_id));
        Ok(disks)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>> {
        Ok(self.state.read().await.config.get(key).cloned())
    }

    async fn put_config(&self, entry: &ConfigEntry) -> Result<()> {
        self.state
            .write()
            .await
            .config
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casevault_types::BackupMode;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn log_for(task: &BackupTask, name: &str, checksum: &str) -> BackupLog {
        BackupLog::new(
            task.id,
            &PathBuf::from("/case").join(name),
            "202401A001",
            PathBuf::from("/backup/202401A001/cases").join(name),
            1,
            10,
            checksum,
        )
    }

    #[tokio::test]
    async fn test_task_roundtrip() {
        let store = MemoryStore::new();
        let mut task = BackupTask::new("/case", "202401A001", "cases", BackupMode::Copy);
        store.insert_task(&task).await.unwrap();

        task.set_status(TaskStatus::Running);
        store.update_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(
            store
                .find_tasks_by_status(TaskStatus::Running)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let store = MemoryStore::new();
        let task = BackupTask::new("/case", "d", "", BackupMode::Copy);
        let err = store.update_task(&task).await.unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_success_by_checksum_ignores_other_states() {
        let store = MemoryStore::new();
        let task = BackupTask::new("/case", "d", "", BackupMode::Copy);

        let mut running = log_for(&task, "a.txt", "abc");
        store.insert_log(&running).await.unwrap();
        assert!(store
            .find_success_by_checksum("abc")
            .await
            .unwrap()
            .is_none());

        running.status = LogStatus::Success;
        store.update_log(&running).await.unwrap();
        let hit = store.find_success_by_checksum("abc").await.unwrap().unwrap();
        assert_eq!(hit.id, running.id);
    }

    #[tokio::test]
    async fn test_search_matches_filename_and_target() {
        let store = MemoryStore::new();
        let task = BackupTask::new("/case", "d", "", BackupMode::Copy);
        store
            .insert_log(&log_for(&task, "witness.mp4", "1"))
            .await
            .unwrap();
        store
            .insert_log(&log_for(&task, "photo.jpg", "2"))
            .await
            .unwrap();

        assert_eq!(store.search_logs("witness").await.unwrap().len(), 1);
        assert_eq!(store.search_logs("202401A001").await.unwrap().len(), 2);
        assert!(store.search_logs("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_serial_unique() {
        let store = MemoryStore::new();
        let disk = HardDisk::local("202401A001", "SN1", "/backup/a", 100, 100);
        store.insert_disk(&disk).await.unwrap();

        let duplicate = HardDisk::local("202401A002", "SN1", "/backup/b", 100, 100);
        assert!(store.insert_disk(&duplicate).await.is_err());
        assert!(store.find_disk_by_serial("SN1").await.unwrap().is_some());
        assert!(store.find_disk_by_serial("SN2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("vault.json");

        let store = MemoryStore::new();
        let task = BackupTask::new("/case", "202401A001", "cases", BackupMode::Move);
        store.insert_task(&task).await.unwrap();
        store
            .insert_disk(&HardDisk::local("202401A001", "SN1", "/backup/a", 100, 50))
            .await
            .unwrap();
        store
            .put_config(&ConfigEntry::new("migration_threshold", "10", "floor"))
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let restored = MemoryStore::load(&path).await.unwrap();
        assert_eq!(restored.get_task(task.id).await.unwrap().unwrap(), task);
        assert_eq!(restored.list_disks().await.unwrap().len(), 1);
        assert_eq!(
            restored
                .get_config("migration_threshold")
                .await
                .unwrap()
                .unwrap()
                .value,
            "10"
        );
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::load(temp_dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(store.list_tasks().await.unwrap().is_empty());
    }
}
