//! Persisted entities: tasks, copy logs, storage targets and policy entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::types::{
    BackupMode, DiskProtocol, DiskStatus, FileSize, LogId, LogStatus, MigrationStatus, TaskId,
    TaskStatus,
};

/// One backup request against one source path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTask {
    /// Task identifier
    pub id: TaskId,
    /// File or directory being backed up
    pub source_path: PathBuf,
    /// Destination directory relative to the disk's mount point
    pub target_path: String,
    /// Copy or move
    pub backup_mode: BackupMode,
    /// Lifecycle state
    pub status: TaskStatus,
    /// At least one planned file matched the sensitive pattern
    pub sensitive: bool,
    /// Planned copy operations across all files
    pub backup_count: u32,
    /// Operator asked the worker to stop
    pub paused: bool,
    /// Human-readable id of the destination disk
    pub target_disk_id: String,
    /// Bytes planned
    pub total_size: FileSize,
    /// Bytes confirmed so far
    pub completed_size: FileSize,
    /// Bytes of this task already deducted from the disk's available capacity
    #[serde(default)]
    pub committed_size: FileSize,
    /// Optional cron-like schedule, carried but not interpreted
    pub schedule: Option<String>,
    /// Last failure message surfaced to the operator
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl BackupTask {
    /// Create a new PENDING task
    pub fn new<P: Into<PathBuf>>(
        source_path: P,
        target_disk_id: impl Into<String>,
        target_path: impl Into<String>,
        backup_mode: BackupMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            source_path: source_path.into(),
            target_path: target_path.into(),
            backup_mode,
            status: TaskStatus::Pending,
            sensitive: false,
            backup_count: 0,
            paused: false,
            target_disk_id: target_disk_id.into(),
            total_size: 0,
            completed_size: 0,
            committed_size: 0,
            schedule: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Completion percentage in `[0, 100]`
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            if self.status == TaskStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.completed_size.min(self.total_size) as f64 / self.total_size as f64) * 100.0
        }
    }

    /// Bytes still to be confirmed
    pub fn remaining_size(&self) -> FileSize {
        self.total_size.saturating_sub(self.completed_size)
    }

    /// Move to a new status and stamp the update time
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    /// Stamp the update time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One physical copy of one file belonging to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupLog {
    /// Log identifier
    pub id: LogId,
    /// Owning task
    pub task_id: TaskId,
    /// File name of the source
    pub filename: String,
    /// Full source path
    pub source_path: PathBuf,
    /// Human-readable id of the disk holding the copy
    pub disk_id: String,
    /// Where the copy is written
    pub target_path: PathBuf,
    /// 1-based copy number
    pub copy_index: u32,
    /// Source size in bytes
    pub size: FileSize,
    /// When the copy started
    pub backup_time: DateTime<Utc>,
    /// Hex SHA-256 of the source content
    pub checksum: String,
    /// Copy state
    pub status: LogStatus,
    /// Bytes already written to `target_path`
    pub transfer_offset: FileSize,
    /// Audit index this copy is listed in
    pub index_path: Option<PathBuf>,
}

impl BackupLog {
    /// Create a RUNNING log at offset zero
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        source_path: &Path,
        disk_id: impl Into<String>,
        target_path: PathBuf,
        copy_index: u32,
        size: FileSize,
        checksum: impl Into<String>,
    ) -> Self {
        let filename = source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: LogId::new(),
            task_id,
            filename,
            source_path: source_path.to_path_buf(),
            disk_id: disk_id.into(),
            target_path,
            copy_index,
            size,
            backup_time: Utc::now(),
            checksum: checksum.into(),
            status: LogStatus::Running,
            transfer_offset: 0,
            index_path: None,
        }
    }
}

/// One storage target, a local volume or an SMB share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardDisk {
    /// Internal identifier
    pub id: Uuid,
    /// Human-readable id, `YYYYMM<group><seq>`
    pub disk_id: String,
    /// Natural key used to reconcile rescans
    pub serial_number: String,
    /// Capacity in bytes
    pub total_capacity: FileSize,
    /// Free bytes
    pub available_capacity: FileSize,
    /// Operational state
    pub status: DiskStatus,
    /// Local mount point, for LOCAL disks
    pub mount_point: Option<PathBuf>,
    /// Migration marker
    pub migration_status: Option<MigrationStatus>,
    /// Disk id data is being moved to
    pub migration_target: Option<String>,
    /// How the disk is reached
    pub protocol: DiskProtocol,
    /// Share URL, for SMB disks
    pub remote_url: Option<String>,
    /// Share user, for SMB disks
    pub remote_username: Option<String>,
    /// Sealed share password
    pub remote_password_encrypted: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl HardDisk {
    /// Create an ACTIVE local disk record
    pub fn local(
        disk_id: impl Into<String>,
        serial_number: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        total_capacity: FileSize,
        available_capacity: FileSize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            disk_id: disk_id.into(),
            serial_number: serial_number.into(),
            total_capacity,
            available_capacity: available_capacity.min(total_capacity),
            status: DiskStatus::Active,
            mount_point: Some(mount_point.into()),
            migration_status: None,
            migration_target: None,
            protocol: DiskProtocol::Local,
            remote_url: None,
            remote_username: None,
            remote_password_encrypted: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an ACTIVE SMB disk record
    pub fn smb(
        disk_id: impl Into<String>,
        serial_number: impl Into<String>,
        remote_url: impl Into<String>,
        remote_username: impl Into<String>,
        remote_password_encrypted: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            disk_id: disk_id.into(),
            serial_number: serial_number.into(),
            total_capacity: 0,
            available_capacity: 0,
            status: DiskStatus::Active,
            mount_point: None,
            migration_status: None,
            migration_target: None,
            protocol: DiskProtocol::Smb,
            remote_url: Some(remote_url.into()),
            remote_username: Some(remote_username.into()),
            remote_password_encrypted: Some(remote_password_encrypted.into()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bytes in use
    pub fn used_capacity(&self) -> FileSize {
        self.total_capacity.saturating_sub(self.available_capacity)
    }

    /// Set both capacities, keeping `available <= total`
    pub fn set_capacity(&mut self, total: FileSize, available: FileSize) {
        self.total_capacity = total;
        self.available_capacity = available.min(total);
        self.touch();
    }

    /// Stamp the update time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One policy key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Policy key
    pub key: String,
    /// Stored value
    pub value: String,
    /// What the key controls
    pub description: String,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl ConfigEntry {
    /// Create an entry stamped now
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: description.into(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = BackupTask::new("/case/001", "202401A001", "cases", BackupMode::Copy);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.paused);
        assert_eq!(task.completed_size, 0);
    }

    #[test]
    fn test_progress_percent() {
        let mut task = BackupTask::new("/case/001", "d", "", BackupMode::Copy);
        assert_eq!(task.progress_percent(), 0.0);

        task.total_size = 200;
        task.completed_size = 50;
        assert_eq!(task.progress_percent(), 25.0);

        task.total_size = 0;
        task.set_status(TaskStatus::Completed);
        assert_eq!(task.progress_percent(), 100.0);
    }

    #[test]
    fn test_log_takes_filename_from_source() {
        let log = BackupLog::new(
            TaskId::new(),
            Path::new("/case/001/evidence.jpg"),
            "202401A001",
            PathBuf::from("/backup/evidence.jpg"),
            1,
            42,
            "abc",
        );
        assert_eq!(log.filename, "evidence.jpg");
        assert_eq!(log.status, LogStatus::Running);
        assert_eq!(log.transfer_offset, 0);
    }

    #[test]
    fn test_disk_capacity_clamped() {
        let mut disk = HardDisk::local("202401A001", "SN1", "/backup/202401A001", 100, 500);
        assert_eq!(disk.available_capacity, 100);

        disk.set_capacity(1000, 400);
        assert_eq!(disk.used_capacity(), 600);
    }
}
