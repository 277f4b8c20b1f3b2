//! Audit index written after a task finishes

use async_trait::async_trait;
use casevault_types::{
    BackupLog, BackupTask, Error, FileSize, LogStatus, Result, TaskId, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes an index of a task's copies
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Write the index and return where it landed
    ///
    /// `target_root` is the task's directory on the target disk.
    async fn write_index(
        &self,
        task: &BackupTask,
        logs: &[BackupLog],
        target_root: &Path,
    ) -> Result<PathBuf>;
}

/// One row of the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// File name
    pub filename: String,
    /// Source path
    pub source_path: PathBuf,
    /// Disk holding the copy
    pub disk_id: String,
    /// Copy location
    pub target_path: PathBuf,
    /// Copy number
    pub copy_index: u32,
    /// Bytes
    pub size: FileSize,
    /// SHA-256 of the content
    pub checksum: String,
    /// Copy outcome
    pub status: LogStatus,
    /// Completion time
    pub backup_time: DateTime<Utc>,
}

impl From<&BackupLog> for IndexEntry {
    fn from(log: &BackupLog) -> Self {
        Self {
            filename: log.filename.clone(),
            source_path: log.source_path.clone(),
            disk_id: log.disk_id.clone(),
            target_path: log.target_path.clone(),
            copy_index: log.copy_index,
            size: log.size,
            checksum: log.checksum.clone(),
            status: log.status,
            backup_time: log.backup_time,
        }
    }
}

/// Index document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIndex {
    /// Task
    pub task_id: TaskId,
    /// Source of the task
    pub source_path: PathBuf,
    /// Final task status
    pub status: TaskStatus,
    /// When the index was written
    pub generated_at: DateTime<Utc>,
    /// One entry per copy
    pub entries: Vec<IndexEntry>,
}

/// JSON index, written next to the copies or into a fixed directory
#[derive(Debug, Clone, Default)]
pub struct JsonIndexWriter {
    dir: Option<PathBuf>,
}

impl JsonIndexWriter {
    /// Index into each task's target root
    pub fn new() -> Self {
        Self::default()
    }

    /// Index into `dir` instead
    pub fn with_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl IndexSink for JsonIndexWriter {
    async fn write_index(
        &self,
        task: &BackupTask,
        logs: &[BackupLog],
        target_root: &Path,
    ) -> Result<PathBuf> {
        let dir = self.dir.as_deref().unwrap_or(target_root);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::from_io_at(&e, dir))?;

        let index = TaskIndex {
            task_id: task.id,
            source_path: task.source_path.clone(),
            status: task.status,
            generated_at: Utc::now(),
            entries: logs.iter().map(IndexEntry::from).collect(),
        };
        let json = serde_json::to_vec_pretty(&index)
            .map_err(|e| Error::other(format!("cannot serialize index: {}", e)))?;

        let path = dir.join(format!("index_{}.json", task.id));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::from_io_at(&e, &path))?;
        debug!("Wrote index {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casevault_types::BackupMode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_index_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let mut task = BackupTask::new("/case/9", "202401A001", "cases", BackupMode::Copy);
        task.status = TaskStatus::Completed;
        let mut log = BackupLog::new(
            task.id,
            Path::new("/case/9/a.txt"),
            "202401A001",
            temp_dir.path().join("a.txt"),
            1,
            3,
            "abc",
        );
        log.status = LogStatus::Success;

        let path = JsonIndexWriter::new()
            .write_index(&task, &[log.clone()], temp_dir.path())
            .await
            .unwrap();
        assert!(path.starts_with(temp_dir.path()));

        let index: TaskIndex = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(index.task_id, task.id);
        assert_eq!(index.entries, vec![IndexEntry::from(&log)]);
    }

    #[tokio::test]
    async fn test_fixed_index_dir() {
        let temp_dir = TempDir::new().unwrap();
        let index_dir = temp_dir.path().join("indexes");
        let task = BackupTask::new("/case/9", "202401A001", "cases", BackupMode::Copy);

        let path = JsonIndexWriter::with_dir(&index_dir)
            .write_index(&task, &[], temp_dir.path())
            .await
            .unwrap();
        assert_eq!(path.parent().unwrap(), index_dir);
    }
}
