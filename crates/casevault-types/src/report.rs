//! Events pushed to observers and reports returned to operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{BackupLog, BackupTask};
use crate::types::{FileSize, TaskId, TaskStatus};

/// Event delivered to a notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BackupEvent {
    /// A copy log was created or changed
    Breakpoint(BackupLog),
    /// Periodic transfer progress for a copy in flight
    Progress(BackupLog),
    /// A task changed status
    Task(BackupTask),
}

impl BackupEvent {
    /// Task the event belongs to
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Breakpoint(log) | Self::Progress(log) => log.task_id,
            Self::Task(task) => task.id,
        }
    }

    /// Log snapshot carried by the event, if any
    pub fn log(&self) -> Option<&BackupLog> {
        match self {
            Self::Breakpoint(log) | Self::Progress(log) => Some(log),
            Self::Task(_) => None,
        }
    }
}

/// Progress of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Task identifier
    pub task_id: TaskId,
    /// Completion percentage
    pub percent: f64,
    /// Current status
    pub status: TaskStatus,
    /// Bytes confirmed
    pub completed_size: FileSize,
    /// Bytes planned
    pub total_size: FileSize,
}

impl From<&BackupTask> for TaskProgress {
    fn from(task: &BackupTask) -> Self {
        Self {
            task_id: task.id,
            percent: task.progress_percent(),
            status: task.status,
            completed_size: task.completed_size,
            total_size: task.total_size,
        }
    }
}

/// Aggregate classification of a source path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Classified path
    pub path: PathBuf,
    /// At least one file matched the sensitive pattern
    pub sensitive: bool,
    /// At least one file is cold
    pub cold: bool,
    /// Highest per-file copy count
    pub copy_count: u32,
    /// Files that need at least one copy
    pub file_count: usize,
    /// Files inspected
    pub scanned_files: usize,
    /// `Σ size × copies`
    pub planned_bytes: FileSize,
    /// Task started by the cold-data trigger
    pub auto_backup_task: Option<TaskId>,
    /// Why no automatic backup was started, when one was wanted
    pub auto_backup_note: Option<String>,
}

/// A file left behind by a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    /// Path on the source disk
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of moving one disk's data onto another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Retired disk
    pub source_disk_id: String,
    /// Receiving disk
    pub target_disk_id: String,
    /// Files copied and verified
    pub files_copied: u64,
    /// Bytes copied and verified
    pub bytes_copied: FileSize,
    /// Files that did not verify or could not be read
    pub skipped: Vec<SkippedFile>,
    /// Logs repointed at the target disk
    pub logs_relocated: u64,
    /// Completion time
    pub finished_at: DateTime<Utc>,
}
