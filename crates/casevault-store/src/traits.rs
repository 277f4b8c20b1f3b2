//! Persistence interfaces consumed by the backup core
//!
//! Lookups that may miss return `Option`; updates of a missing record fail with
//! [`Error::NotFound`](casevault_types::Error::NotFound).

use async_trait::async_trait;
use casevault_types::{
    BackupLog, BackupTask, ConfigEntry, HardDisk, LogId, Result, TaskId, TaskStatus,
};

/// Storage for backup tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task
    async fn insert_task(&self, task: &BackupTask) -> Result<()>;

    /// Replace an existing task
    async fn update_task(&self, task: &BackupTask) -> Result<()>;

    /// Load a task by id
    async fn get_task(&self, id: TaskId) -> Result<Option<BackupTask>>;

    /// All tasks, oldest first
    async fn list_tasks(&self) -> Result<Vec<BackupTask>>;

    /// Tasks in a given status
    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<BackupTask>>;
}

/// Storage for copy logs
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert a new log
    async fn insert_log(&self, log: &BackupLog) -> Result<()>;

    /// Replace an existing log
    async fn update_log(&self, log: &BackupLog) -> Result<()>;

    /// Load a log by id
    async fn get_log(&self, id: LogId) -> Result<Option<BackupLog>>;

    /// Logs of one task, oldest first
    async fn find_logs_by_task(&self, task_id: TaskId) -> Result<Vec<BackupLog>>;

    /// A SUCCESS log whose content has the given checksum
    async fn find_success_by_checksum(&self, checksum: &str) -> Result<Option<BackupLog>>;

    /// Logs whose copy lives on the given disk
    async fn find_logs_by_disk(&self, disk_id: &str) -> Result<Vec<BackupLog>>;

    /// Logs whose filename or target path contains `keyword`
    async fn search_logs(&self, keyword: &str) -> Result<Vec<BackupLog>>;
}

/// Storage for disks
#[async_trait]
pub trait DiskStore: Send + Sync {
    /// Insert a new disk; the serial number must be unused
    async fn insert_disk(&self, disk: &HardDisk) -> Result<()>;

    /// Replace an existing disk, matched by internal id
    async fn update_disk(&self, disk: &HardDisk) -> Result<()>;

    /// Load a disk by its human-readable id
    async fn find_disk_by_disk_id(&self, disk_id: &str) -> Result<Option<HardDisk>>;

    /// Load a disk by serial number
    async fn find_disk_by_serial(&self, serial_number: &str) -> Result<Option<HardDisk>>;

    /// All disks
    async fn list_disks(&self) -> Result<Vec<HardDisk>>;
}

/// Storage for policy entries
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load an entry by key
    async fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>>;

    /// Insert or replace an entry
    async fn put_config(&self, entry: &ConfigEntry) -> Result<()>;
}

/// Everything the backup core persists
pub trait BackupStore: TaskStore + LogStore + DiskStore + ConfigStore {}

impl<T> BackupStore for T where T: TaskStore + LogStore + DiskStore + ConfigStore {}
