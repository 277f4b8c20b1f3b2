//! Operator facade over the backup engine

use casevault_config::{Config, ConfigLoader};
use casevault_device::{
    CredentialCipher, DiskCapacityManager, RemoteShareProbe, SmbClientProbe, VolumeSource,
};
use casevault_io::ChecksumRegistry;
use casevault_store::{MemoryStore, SharedStore};
use casevault_types::{
    BackupLog, BackupMode, BackupTask, ClassificationReport, ConfigEntry, Error, HardDisk,
    MigrationReport, Result, TaskId, TaskProgress, TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classify::plan_source;
use crate::controller::TaskController;
use crate::executor::TaskExecutor;
use crate::index::{IndexSink, JsonIndexWriter};
use crate::notify::{SharedSink, TracingSink};
use crate::policy::PolicyStore;
use crate::transfer::TransferEngine;

/// Target directory of backups started by the cold-data trigger
pub const AUTO_BACKUP_TARGET: &str = "auto-backup";

/// Outcome of an operator call in a transport-neutral shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Payload on success
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    /// Successful response
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Failed response
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Wrap a result, using the error text as the failure message
    pub fn from_result(result: Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::fail(e.to_string()),
        }
    }
}

/// Entry point for everything an operator can do
pub struct BackupService {
    store: SharedStore,
    controller: Arc<TaskController>,
    executor: TaskExecutor,
    poll_interval: Duration,
    auto_backup_cold_data: bool,
}

impl fmt::Debug for BackupService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupService")
            .field("controller", &self.controller)
            .field("executor", &self.executor)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl BackupService {
    /// Service over `store` with the given configuration and default sinks
    pub fn new(config: Config, store: SharedStore) -> Result<Self> {
        ServiceBuilder::new()
            .with_config(config)
            .with_store(store)
            .build()
    }

    /// Backing store
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Task controller shared with workers
    pub fn controller(&self) -> &Arc<TaskController> {
        &self.controller
    }

    /// Create a task and start a worker for it
    pub async fn start_backup(
        &self,
        source: &Path,
        disk_id: &str,
        target_path: &str,
        mode: BackupMode,
    ) -> Result<TaskId> {
        let task = self
            .controller
            .create_task(source, disk_id, target_path, mode)
            .await?;
        self.executor
            .spawn(task.id, Arc::clone(&self.controller))
            .await?;
        Ok(task.id)
    }

    /// Load a task
    pub async fn get_task(&self, task_id: TaskId) -> Result<BackupTask> {
        self.controller.get_task(task_id).await
    }

    /// Every known task
    pub async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        let mut tasks = self.store.list_tasks().await?;
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    /// Percent done and status of a task
    pub async fn get_progress(&self, task_id: TaskId) -> Result<TaskProgress> {
        Ok(TaskProgress::from(&self.get_task(task_id).await?))
    }

    /// Copy logs of a task
    pub async fn task_logs(&self, task_id: TaskId) -> Result<Vec<BackupLog>> {
        self.get_task(task_id).await?;
        self.store.find_logs_by_task(task_id).await
    }

    /// Ask a PENDING or RUNNING task to stop at the next chunk
    pub async fn pause(&self, task_id: TaskId) -> Result<BackupTask> {
        let task = self.controller.request_pause(task_id).await?;
        info!("Pause requested for task {}", task_id);
        Ok(task)
    }

    /// Start a new worker for a PAUSED task
    ///
    /// A task whose pause is still being honored is waited for first.
    pub async fn resume(&self, task_id: TaskId) -> Result<BackupTask> {
        let task = self.get_task(task_id).await?;
        if task.status != TaskStatus::Paused && !task.paused {
            return Err(Error::invalid_state(format!(
                "task {} is {}; only paused tasks can be resumed",
                task_id, task.status
            )));
        }
        self.executor.wait(task_id).await;

        let task = self.controller.prepare_resume(task_id).await?;
        self.executor
            .spawn(task_id, Arc::clone(&self.controller))
            .await?;
        info!("Task {} resumed", task_id);
        Ok(task)
    }

    /// Stop a task, delete its copies and mark it CANCELED
    pub async fn cancel(&self, task_id: TaskId) -> Result<BackupTask> {
        self.controller.request_cancel(task_id).await?;
        self.executor.wait(task_id).await;
        self.controller.cancel_cleanup(task_id).await
    }

    /// Mark RUNNING tasks without a live worker as PAUSED
    ///
    /// A process that stopped mid-backup leaves its tasks RUNNING; after this
    /// they can be resumed from their persisted offsets.
    pub async fn recover_interrupted(&self) -> Result<Vec<TaskId>> {
        let mut recovered = Vec::new();
        for task in self.store.find_tasks_by_status(TaskStatus::Running).await? {
            if self.executor.is_running(task.id).await {
                continue;
            }
            self.controller
                .update_task(task.id, |t| {
                    if t.status == TaskStatus::Running {
                        t.status = TaskStatus::Paused;
                        t.paused = true;
                    }
                    Ok(())
                })
                .await?;
            warn!("Task {} was left running by an earlier process; now paused", task.id);
            recovered.push(task.id);
        }
        Ok(recovered)
    }

    /// Wait until a task is finished or paused
    pub async fn wait_for_task(&self, task_id: TaskId, timeout: Duration) -> Result<BackupTask> {
        tokio::time::timeout(timeout, self.settle(task_id))
            .await
            .map_err(|_| Error::Timeout {
                seconds: timeout.as_secs(),
            })?
    }

    async fn settle(&self, task_id: TaskId) -> Result<BackupTask> {
        self.executor.wait(task_id).await;
        loop {
            let task = self.get_task(task_id).await?;
            if task.status.is_terminal() || task.status == TaskStatus::Paused {
                return Ok(task);
            }
            debug!("Task {} is {}, polling again", task_id, task.status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Classify a file or directory, starting a backup for cold data when enabled
    pub async fn classify(&self, source: &Path) -> Result<ClassificationReport> {
        let policy = self.controller.policy().load().await?;
        let plan = plan_source(source, &policy).await?;
        let mut report = ClassificationReport {
            path: source.to_path_buf(),
            sensitive: plan.sensitive,
            cold: plan.cold,
            copy_count: plan.max_copy_count(),
            file_count: plan.files.len(),
            scanned_files: plan.scanned_files,
            planned_bytes: plan.total_size(),
            auto_backup_task: None,
            auto_backup_note: None,
        };

        if plan.cold && self.auto_backup_cold_data {
            let disk = self
                .controller
                .disks()
                .select_backup_disk(report.planned_bytes, policy.migration_threshold)
                .await?;
            match disk {
                Some(disk) => {
                    let task_id = self
                        .start_backup(source, &disk.disk_id, AUTO_BACKUP_TARGET, BackupMode::Copy)
                        .await?;
                    info!(
                        "Cold data in {} queued for backup as task {} on {}",
                        source.display(),
                        task_id,
                        disk.disk_id
                    );
                    report.auto_backup_task = Some(task_id);
                }
                None => {
                    report.auto_backup_note = Some(format!(
                        "no active local disk has {} bytes free above the migration threshold",
                        report.planned_bytes
                    ));
                }
            }
        }
        Ok(report)
    }

    /// Register an operator-provisioned local disk
    pub async fn initialize_local_disk(
        &self,
        serial_number: &str,
        total_capacity: u64,
    ) -> Result<HardDisk> {
        self.controller
            .disks()
            .initialize_local_disk(serial_number, total_capacity)
            .await
    }

    /// Register an SMB share
    pub async fn initialize_remote_disk(
        &self,
        url: &str,
        username: &str,
        password: &str,
        serial_number: &str,
    ) -> Result<HardDisk> {
        self.controller
            .disks()
            .initialize_remote_disk(url, username, password, serial_number)
            .await
    }

    /// Reconcile local volumes and refresh SMB shares
    pub async fn scan_disks(&self) -> Result<Vec<HardDisk>> {
        self.controller.disks().scan_disks().await
    }

    /// Every known disk
    pub async fn list_disks(&self) -> Result<Vec<HardDisk>> {
        self.controller.disks().list_disks().await
    }

    /// Flag disks below the migration threshold
    pub async fn check_disks(&self) -> Result<Vec<HardDisk>> {
        let threshold = self.controller.policy().migration_threshold().await?;
        self.controller.disks().check_thresholds(threshold).await
    }

    /// Move a disk's data onto another and archive it
    pub async fn migrate(
        &self,
        source_disk_id: &str,
        target_disk_id: &str,
    ) -> Result<MigrationReport> {
        self.controller
            .disks()
            .migrate(source_disk_id, target_disk_id)
            .await
    }

    /// Logs whose file name or target path contains `keyword`
    pub async fn search(&self, keyword: &str) -> Result<Vec<BackupLog>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::validation("search keyword must not be empty"));
        }
        self.store.search_logs(keyword).await
    }

    /// Values of policy keys, seeding defaults
    pub async fn get_config<S: AsRef<str>>(&self, keys: &[S]) -> Result<BTreeMap<String, String>> {
        self.controller.policy().get_many(keys).await
    }

    /// Set a policy key
    pub async fn update_config(&self, key: &str, value: &str) -> Result<ConfigEntry> {
        self.controller.policy().update(key, value).await
    }
}

/// Builder for a [`BackupService`]
#[derive(Default)]
pub struct ServiceBuilder {
    config: Option<Config>,
    store: Option<SharedStore>,
    sink: Option<SharedSink>,
    index: Option<Arc<dyn IndexSink>>,
    probe: Option<Arc<dyn RemoteShareProbe>>,
    volumes: Option<Arc<dyn VolumeSource>>,
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServiceBuilder {
    /// Create a new service builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the backing store
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set where events go
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the audit index writer
    pub fn with_index_sink(mut self, index: Arc<dyn IndexSink>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the SMB capacity probe
    pub fn with_probe(mut self, probe: Arc<dyn RemoteShareProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the local volume source
    pub fn with_volume_source(mut self, volumes: Arc<dyn VolumeSource>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    /// Build the service
    pub fn build(self) -> Result<BackupService> {
        let config = match self.config {
            Some(config) => config,
            None => ConfigLoader::load_default()?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as SharedStore);
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink) as SharedSink);
        let index = self.index.unwrap_or_else(|| match &config.storage.index_dir {
            Some(dir) => Arc::new(JsonIndexWriter::with_dir(dir)) as Arc<dyn IndexSink>,
            None => Arc::new(JsonIndexWriter::new()),
        });

        let cipher = CredentialCipher::from_config(config.security.credential_key.as_deref())?;
        let probe = self.probe.unwrap_or_else(|| {
            Arc::new(SmbClientProbe::new(
                config.remote.smbclient_path.clone(),
                Duration::from_secs(config.remote.query_timeout_secs),
            )) as Arc<dyn RemoteShareProbe>
        });
        let mut disks = DiskCapacityManager::new(Arc::clone(&store), cipher)
            .with_probe(probe)
            .with_local_mount_root(config.storage.local_mount_root.clone());
        if let Some(volumes) = self.volumes {
            disks = disks.with_volume_source(volumes);
        }

        let registry = Arc::new(ChecksumRegistry::new());
        let transfer = TransferEngine::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            Arc::clone(&registry),
        )
        .with_chunk_size(config.engine.chunk_size)
        .with_progress_interval(config.engine.progress_interval_bytes);
        let policy = Arc::new(PolicyStore::new(Arc::clone(&store), config.policy.clone()));
        let controller = Arc::new(TaskController::new(
            Arc::clone(&store),
            Arc::new(disks),
            policy,
            registry,
            transfer,
            sink,
            index,
        ));

        info!(
            "Backup service ready, {} concurrent tasks",
            config.engine.max_concurrent_tasks
        );
        Ok(BackupService {
            store,
            controller,
            executor: TaskExecutor::new(config.engine.max_concurrent_tasks),
            poll_interval: config.engine.poll_interval(),
            auto_backup_cold_data: config.policy.auto_backup_cold_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BroadcastSink;
    use casevault_types::{BackupEvent, ErrorKind};
    use filetime::FileTime;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(30);

    fn test_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.local_mount_root = temp.path().join("mnt");
        config.engine.poll_interval_ms = 10;
        config.engine.chunk_size = 1024;
        config.security.credential_key = Some(CredentialCipher::generate_key());
        config
    }

    async fn service(temp: &TempDir) -> BackupService {
        let service = BackupService::new(test_config(temp), Arc::new(MemoryStore::new())).unwrap();
        service.update_config("migration_threshold", "0").await.unwrap();
        service
    }

    fn cold_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![5u8; len]).unwrap();
        let when = SystemTime::now() - Duration::from_secs(400 * 86_400);
        filetime::set_file_mtime(&path, FileTime::from_system_time(when)).unwrap();
        path
    }

    #[test]
    fn test_service_response_from_result() {
        let ok = ServiceResponse::from_result(Ok(3), "done");
        assert!(ok.success);
        assert_eq!(ok.data, Some(3));

        let failed: ServiceResponse<u32> =
            ServiceResponse::from_result(Err(Error::validation("bad path")), "done");
        assert!(!failed.success);
        assert!(failed.message.contains("bad path"));
        assert!(failed.data.is_none());
    }

    #[tokio::test]
    async fn test_backup_runs_to_completion() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let disk = service.initialize_local_disk("WD-1", 1 << 20).await.unwrap();
        let source = cold_file(temp.path(), "ledger.xlsx", 5000);

        let task_id = service
            .start_backup(&source, &disk.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();
        let task = service.wait_for_task(task_id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let progress = service.get_progress(task_id).await.unwrap();
        assert_eq!(progress.percent, 100.0);
        assert_eq!(progress.completed_size, 5000);

        let found = service.search("ledger").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target_path, disk.mount_point.unwrap().join("cases/ledger.xlsx"));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let temp = TempDir::new().unwrap();
        let broadcast = BroadcastSink::new(256);
        let mut rx = broadcast.subscribe();
        let service = ServiceBuilder::new()
            .with_config(test_config(&temp))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(Arc::new(broadcast))
            .build()
            .unwrap();
        service.update_config("migration_threshold", "0").await.unwrap();
        let disk = service.initialize_local_disk("WD-2", 1 << 20).await.unwrap();
        let source = cold_file(temp.path(), "old.log", 10);

        let task_id = service
            .start_backup(&source, &disk.disk_id, "", BackupMode::Copy)
            .await
            .unwrap();
        service.wait_for_task(task_id, WAIT).await.unwrap();

        let mut saw_success = false;
        while let Ok(event) = rx.try_recv() {
            if let BackupEvent::Breakpoint(log) = event {
                saw_success |= log.status == casevault_types::LogStatus::Success;
            }
        }
        assert!(saw_success);
    }

    #[tokio::test]
    async fn test_pause_rejected_for_finished_task() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let disk = service.initialize_local_disk("WD-3", 1 << 20).await.unwrap();
        let source = cold_file(temp.path(), "old.log", 10);
        let task_id = service
            .start_backup(&source, &disk.disk_id, "", BackupMode::Copy)
            .await
            .unwrap();
        service.wait_for_task(task_id, WAIT).await.unwrap();

        assert_eq!(
            service.pause(task_id).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            service.resume(task_id).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[tokio::test]
    async fn test_classify_starts_cold_backup() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let disk = service.initialize_local_disk("WD-4", 1 << 20).await.unwrap();
        let case = temp.path().join("case");
        std::fs::create_dir_all(&case).unwrap();
        cold_file(&case, "archive.zip", 300);

        let report = service.classify(&case).await.unwrap();
        assert!(report.cold);
        assert!(!report.sensitive);
        assert_eq!(report.copy_count, 1);
        assert_eq!(report.planned_bytes, 300);

        let task_id = report.auto_backup_task.unwrap();
        let task = service.wait_for_task(task_id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.target_disk_id, disk.disk_id);
        assert_eq!(task.target_path, AUTO_BACKUP_TARGET);
    }

    #[tokio::test]
    async fn test_classify_without_disk_reports_note() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let source = cold_file(temp.path(), "archive.zip", 300);

        let report = service.classify(&source).await.unwrap();
        assert!(report.auto_backup_task.is_none());
        assert!(report.auto_backup_note.is_some());
    }

    #[tokio::test]
    async fn test_search_requires_keyword() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        assert_eq!(
            service.search("  ").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        service
            .update_config("sensitive_keywords", "murder|arson")
            .await
            .unwrap();
        let values = service
            .get_config(&["sensitive_keywords", "migration_threshold"])
            .await
            .unwrap();
        assert_eq!(values["sensitive_keywords"], "murder|arson");
        assert_eq!(values["migration_threshold"], "0");
    }

    #[tokio::test]
    async fn test_recover_interrupted_pauses_orphans() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let mut orphan = BackupTask::new(temp.path(), "202401A001", "cases", BackupMode::Copy);
        orphan.status = TaskStatus::Running;
        service.store().insert_task(&orphan).await.unwrap();

        assert_eq!(service.recover_interrupted().await.unwrap(), vec![orphan.id]);
        let task = service.get_task(orphan.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(service.recover_interrupted().await.unwrap().is_empty());
    }
}
