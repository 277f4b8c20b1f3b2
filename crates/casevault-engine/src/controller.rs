//! Drives one backup task from plan to verified copies
//!
//! A run plans the source, reserves capacity on the target disk and then
//! copies file by file. Every copy is tracked by a [`BackupLog`] whose offset
//! survives pauses, so the next run continues where the last one stopped.
//! Task records are only ever changed through [`TaskController::update_task`],
//! which reloads the record under a lock before saving it.

use casevault_device::{local_mount, DiskCapacityManager};
use casevault_io::ChecksumRegistry;
use casevault_store::SharedStore;
use casevault_types::{
    BackupEvent, BackupLog, BackupMode, BackupTask, DiskStatus, Error, FileSize, LogStatus,
    Result, TaskId, TaskStatus,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::classify::{plan_source, precheck_source, CopyPlan, PlannedFile};
use crate::index::IndexSink;
use crate::notify::{deliver, SharedSink};
use crate::policy::PolicyStore;
use crate::transfer::{record_log, stop_requested, TransferEngine, TransferOutcome};

/// Reject target paths that would escape the disk mount point
pub fn validate_target_path(target_path: &str) -> Result<()> {
    for component in Path::new(target_path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::validation(format!(
                    "target path must be relative and stay below the mount point: {}",
                    target_path
                )))
            }
        }
    }
    Ok(())
}

/// Where copy `copy_index` of a planned file lands
///
/// The first copy keeps the file name; later copies get a `_copy<n>` suffix
/// ahead of the extension.
pub fn copy_target(root: &Path, relative: &Path, copy_index: u32) -> PathBuf {
    let path = root.join(relative);
    if copy_index <= 1 {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_copy{}.{}", stem, copy_index, ext.to_string_lossy()),
        None => format!("{}_copy{}", stem, copy_index),
    };
    path.with_file_name(name)
}

enum RunState {
    Paused,
    Finished {
        failures: Vec<String>,
        dedup_bytes: FileSize,
    },
}

fn log_rank(status: LogStatus) -> u8 {
    match status {
        LogStatus::Success => 2,
        LogStatus::Running | LogStatus::Paused | LogStatus::Interrupted => 1,
        LogStatus::Failed | LogStatus::Canceled => 0,
    }
}

/// Most useful log per `(source, copy)` pair
fn latest_logs(logs: Vec<BackupLog>) -> HashMap<(PathBuf, u32), BackupLog> {
    let mut by_copy: HashMap<(PathBuf, u32), BackupLog> = HashMap::new();
    for log in logs {
        let key = (log.source_path.clone(), log.copy_index);
        match by_copy.get(&key) {
            Some(current) if log_rank(current.status) >= log_rank(log.status) => {}
            _ => {
                by_copy.insert(key, log);
            }
        }
    }
    by_copy
}

/// Bytes a task's copies currently occupy on the target disk
///
/// Verified copies count in full, unfinished ones up to their offset.
fn landed_bytes<'a, I>(logs: I) -> FileSize
where
    I: IntoIterator<Item = &'a BackupLog>,
{
    logs.into_iter()
        .map(|log| match log.status {
            LogStatus::Success => log.size,
            LogStatus::Running | LogStatus::Paused | LogStatus::Interrupted => {
                log.transfer_offset.min(log.size)
            }
            LogStatus::Failed | LogStatus::Canceled => 0,
        })
        .fold(0, FileSize::saturating_add)
}

/// Runs, pauses and cancels backup tasks
pub struct TaskController {
    store: SharedStore,
    disks: Arc<DiskCapacityManager>,
    policy: Arc<PolicyStore>,
    registry: Arc<ChecksumRegistry>,
    transfer: TransferEngine,
    sink: SharedSink,
    index: Arc<dyn IndexSink>,
    record_lock: Mutex<()>,
}

impl fmt::Debug for TaskController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("transfer", &self.transfer)
            .finish_non_exhaustive()
    }
}

impl TaskController {
    /// Controller over shared engine parts
    pub fn new(
        store: SharedStore,
        disks: Arc<DiskCapacityManager>,
        policy: Arc<PolicyStore>,
        registry: Arc<ChecksumRegistry>,
        transfer: TransferEngine,
        sink: SharedSink,
        index: Arc<dyn IndexSink>,
    ) -> Self {
        Self {
            store,
            disks,
            policy,
            registry,
            transfer,
            sink,
            index,
            record_lock: Mutex::new(()),
        }
    }

    /// Backing store
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Storage inventory
    pub fn disks(&self) -> &Arc<DiskCapacityManager> {
        &self.disks
    }

    /// Policy keys
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Load a task
    pub async fn get_task(&self, task_id: TaskId) -> Result<BackupTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task", task_id.to_string()))
    }

    /// Reload, change and save a task record, then push it to observers
    ///
    /// An error from `change` leaves the record untouched.
    pub async fn update_task<F>(&self, task_id: TaskId, change: F) -> Result<BackupTask>
    where
        F: FnOnce(&mut BackupTask) -> Result<()> + Send,
    {
        let task = {
            let _record = self.record_lock.lock().await;
            let mut task = self.get_task(task_id).await?;
            change(&mut task)?;
            task.touch();
            self.store.update_task(&task).await?;
            task
        };
        deliver(self.sink.as_ref(), BackupEvent::Task(task.clone())).await;
        Ok(task)
    }

    /// Validate a request and store a PENDING task
    pub async fn create_task(
        &self,
        source: &Path,
        disk_id: &str,
        target_path: &str,
        mode: BackupMode,
    ) -> Result<BackupTask> {
        precheck_source(source).await?;
        validate_target_path(target_path)?;

        let disk = self.disks.get_disk(disk_id).await?;
        local_mount(&disk)?;
        if disk.status == DiskStatus::Archived {
            return Err(Error::validation(format!(
                "disk {} is archived and takes no new backups",
                disk_id
            )));
        }

        let task = BackupTask::new(source, disk_id, target_path, mode);
        self.store.insert_task(&task).await?;
        info!(
            "Created task {} for {} on {}",
            task.id,
            source.display(),
            disk_id
        );
        deliver(self.sink.as_ref(), BackupEvent::Task(task.clone())).await;
        Ok(task)
    }

    /// Ask the worker to stop at the next chunk boundary
    pub async fn request_pause(&self, task_id: TaskId) -> Result<BackupTask> {
        self.update_task(task_id, |task| match task.status {
            TaskStatus::Pending | TaskStatus::Running => {
                task.paused = true;
                Ok(())
            }
            status => Err(Error::invalid_state(format!(
                "task {} is {} and cannot be paused",
                task.id, status
            ))),
        })
        .await
    }

    /// Clear the pause flag of a PAUSED task so it can run again
    pub async fn prepare_resume(&self, task_id: TaskId) -> Result<BackupTask> {
        self.update_task(task_id, |task| {
            if task.status != TaskStatus::Paused {
                return Err(Error::invalid_state(format!(
                    "task {} is {}; only paused tasks can be resumed",
                    task.id, task.status
                )));
            }
            task.paused = false;
            Ok(())
        })
        .await
    }

    /// Stop the worker ahead of a cancel
    pub async fn request_cancel(&self, task_id: TaskId) -> Result<BackupTask> {
        self.update_task(task_id, |task| match task.status {
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused => {
                task.paused = true;
                Ok(())
            }
            status => Err(Error::invalid_state(format!(
                "task {} is {} and cannot be canceled",
                task.id, status
            ))),
        })
        .await
    }

    /// Remove every copy a stopped task wrote and mark it CANCELED
    ///
    /// Under MOVE a verified copy whose source is already gone is kept, since
    /// it is the only remaining copy of the data.
    pub async fn cancel_cleanup(&self, task_id: TaskId) -> Result<BackupTask> {
        let task = self.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "task {} is already {}",
                task_id, task.status
            )));
        }

        let mut removed = 0usize;
        let mut kept: FileSize = 0;
        for mut log in self.store.find_logs_by_task(task_id).await? {
            if log.status == LogStatus::Canceled {
                continue;
            }
            let moved_away = task.backup_mode == BackupMode::Move
                && log.status == LogStatus::Success
                && !tokio::fs::try_exists(&log.source_path)
                    .await
                    .unwrap_or(true);
            if moved_away {
                kept = kept.saturating_add(log.size);
                warn!(
                    "Keeping {}: its source {} was already moved",
                    log.target_path.display(),
                    log.source_path.display()
                );
            } else {
                match tokio::fs::remove_file(&log.target_path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        "Failed to remove {}: {}",
                        log.target_path.display(),
                        e
                    ),
                }
            }
            log.status = LogStatus::Canceled;
            record_log(&self.store, &self.sink, &log).await;
        }

        self.settle(task_id, &task.target_disk_id, 0, kept).await?;
        info!("Task {} canceled, {} copies removed", task_id, removed);
        self.update_task(task_id, |task| {
            task.status = TaskStatus::Canceled;
            task.paused = false;
            Ok(())
        })
        .await
    }

    /// Run a task until it finishes or is paused
    ///
    /// Failures of the backup itself end up in the task record; `Err` is only
    /// returned when the record cannot be read or written.
    pub async fn run(&self, task_id: TaskId) -> Result<BackupTask> {
        let task = self.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "task {} is already {}",
                task_id, task.status
            )));
        }
        if task.paused {
            info!("Task {} was paused before its worker started", task_id);
            return self
                .update_task(task_id, |t| {
                    t.status = TaskStatus::Paused;
                    Ok(())
                })
                .await;
        }
        // totals are planned once; resumed runs keep them
        let first_run = task.backup_count == 0;

        let policy = match self.policy.load().await {
            Ok(policy) => policy,
            Err(e) => return self.fail(task_id, &e).await,
        };
        let plan = match plan_source(&task.source_path, &policy).await {
            Ok(plan) => plan,
            Err(e) => return self.fail(task_id, &e).await,
        };
        let root = match self.disks.get_disk(&task.target_disk_id).await {
            Ok(disk) => match local_mount(&disk) {
                Ok(mount) => mount.join(&task.target_path),
                Err(e) => return self.fail(task_id, &e).await,
            },
            Err(e) => return self.fail(task_id, &e).await,
        };

        if first_run && plan.is_empty() {
            info!(
                "Nothing below {} needs a backup",
                task.source_path.display()
            );
            let sensitive = plan.sensitive;
            return self
                .update_task(task_id, move |t| {
                    t.sensitive = sensitive;
                    t.total_size = 0;
                    t.completed_size = 0;
                    t.backup_count = 0;
                    t.status = TaskStatus::Completed;
                    Ok(())
                })
                .await;
        }

        let task = self
            .update_task(task_id, |t| {
                if first_run {
                    t.total_size = plan.total_size();
                    t.backup_count = plan.backup_count();
                    t.sensitive = plan.sensitive;
                }
                t.status = TaskStatus::Running;
                t.last_error = None;
                Ok(())
            })
            .await?;
        info!(
            "Task {} running: {} files, {} copies, {} bytes",
            task_id,
            plan.files.len(),
            task.backup_count,
            task.total_size
        );

        // bytes left by earlier runs are already on the disk; reserve the rest
        let task = self.settle_run(&task, 0).await?;
        let reserved = task.total_size.saturating_sub(task.committed_size);
        if let Err(e) = self
            .disks
            .reserve(&task.target_disk_id, reserved, policy.migration_threshold)
            .await
        {
            return self.fail(task_id, &e).await;
        }

        let state = match self.execute_plan(&task, &plan, &root).await {
            Ok(state) => state,
            Err(e) => {
                self.settle_run(&task, reserved).await?;
                return self.fail(task_id, &e).await;
            }
        };

        match state {
            RunState::Paused => {
                self.settle_run(&task, reserved).await?;
                info!("Task {} paused", task_id);
                self.update_task(task_id, |t| {
                    if !t.status.is_terminal() {
                        t.status = TaskStatus::Paused;
                    }
                    Ok(())
                })
                .await
            }
            RunState::Finished {
                failures,
                dedup_bytes,
            } => {
                self.finish(&task, reserved, &root, failures, dedup_bytes)
                    .await
            }
        }
    }

    /// Charge the disk for what a stopped run left behind and drop its reservation
    async fn settle_run(&self, task: &BackupTask, reserved: FileSize) -> Result<BackupTask> {
        let logs = self.store.find_logs_by_task(task.id).await?;
        let landed = landed_bytes(latest_logs(logs).values());
        self.settle(task.id, &task.target_disk_id, reserved, landed)
            .await
    }

    /// Bring the disk charge of a task to `landed` bytes and release `reserved`
    ///
    /// `committed_size` remembers what was charged before, so a task that is
    /// paused and resumed is never charged twice for the same bytes.
    async fn settle(
        &self,
        task_id: TaskId,
        disk_id: &str,
        reserved: FileSize,
        landed: FileSize,
    ) -> Result<BackupTask> {
        let committed = self.get_task(task_id).await?.committed_size;
        let charged = if landed > committed {
            self.disks
                .commit(disk_id, reserved, landed - committed)
                .await
                .map(|_| ())
        } else {
            self.disks.release(disk_id, reserved).await;
            if landed < committed {
                self.disks
                    .refund(disk_id, committed - landed)
                    .await
                    .map(|_| ())
            } else {
                Ok(())
            }
        };

        match charged {
            Ok(()) if landed != committed => {
                debug!(
                    "Task {} holds {} bytes on {} (was {})",
                    task_id, landed, disk_id, committed
                );
                self.update_task(task_id, move |t| {
                    t.committed_size = landed;
                    Ok(())
                })
                .await
            }
            Ok(()) => self.get_task(task_id).await,
            Err(e) => {
                error!(
                    "Failed to record {} bytes of task {} on {}: {}",
                    landed, task_id, disk_id, e
                );
                self.get_task(task_id).await
            }
        }
    }

    async fn execute_plan(
        &self,
        task: &BackupTask,
        plan: &CopyPlan,
        root: &Path,
    ) -> Result<RunState> {
        let mut logs = latest_logs(self.store.find_logs_by_task(task.id).await?);
        let mut confirmed: FileSize = logs
            .values()
            .filter(|log| log.status == LogStatus::Success)
            .map(|log| log.size)
            .sum();
        let mut dedup_bytes: FileSize = 0;
        let mut failures = Vec::new();

        for file in &plan.files {
            let mut checksum: Option<String> = None;
            let mut file_done = true;

            for copy_index in 1..=file.class.copy_count {
                if stop_requested(&self.store, task.id).await {
                    return Ok(RunState::Paused);
                }
                let key = (file.path.clone(), copy_index);
                if logs
                    .get(&key)
                    .is_some_and(|log| log.status == LogStatus::Success)
                {
                    debug!("Copy {} of {} already verified", copy_index, file.path.display());
                    continue;
                }

                let expected = match checksum.clone() {
                    Some(expected) => expected,
                    None => match self.registry.checksum(&file.path).await {
                        Ok(expected) => {
                            checksum = Some(expected.clone());
                            expected
                        }
                        Err(e) => {
                            error!("Cannot fingerprint {}: {}", file.path.display(), e);
                            self.report_unreadable(task, file, copy_index, root).await;
                            failures.push(format!("{}: {}", file.path.display(), e));
                            file_done = false;
                            break;
                        }
                    },
                };

                // single-copy content already held elsewhere is not written again
                let claim = if file.class.copy_count == 1 {
                    Some(self.registry.claim(&expected).await)
                } else {
                    None
                };
                if claim.is_some() {
                    if let Some(prior) = self.existing_copy(&expected).await? {
                        info!(
                            "Skipping {}: identical content is already at {}",
                            file.path.display(),
                            prior.target_path.display()
                        );
                        if let Some(stale) = logs.remove(&key) {
                            if stale.status.is_resumable()
                                && stale.target_path != prior.target_path
                            {
                                self.discard_partial(stale).await;
                            }
                        }
                        dedup_bytes = dedup_bytes.saturating_add(file.size);
                        confirmed = confirmed.saturating_add(file.size);
                        self.advance(task.id, confirmed).await?;
                        continue;
                    }
                }

                let mut log = match logs.remove(&key) {
                    Some(mut log) if log.status.is_resumable() => {
                        if log.checksum != expected || log.size != file.size {
                            warn!(
                                "{} changed since copy {} started; restarting it",
                                file.path.display(),
                                copy_index
                            );
                            log.checksum = expected.clone();
                            log.size = file.size;
                            log.transfer_offset = 0;
                        }
                        log.status = LogStatus::Running;
                        record_log(&self.store, &self.sink, &log).await;
                        log
                    }
                    _ => {
                        let log = BackupLog::new(
                            task.id,
                            &file.path,
                            &task.target_disk_id,
                            copy_target(root, &file.relative, copy_index),
                            copy_index,
                            file.size,
                            expected.clone(),
                        );
                        self.store.insert_log(&log).await?;
                        deliver(self.sink.as_ref(), BackupEvent::Breakpoint(log.clone())).await;
                        log
                    }
                };

                match self.transfer.transfer(&mut log, &file.path).await {
                    Ok(TransferOutcome::Completed { .. }) => {
                        confirmed = confirmed.saturating_add(file.size);
                        self.advance(task.id, confirmed).await?;
                    }
                    Ok(TransferOutcome::Paused { .. }) => return Ok(RunState::Paused),
                    Err(e) => {
                        error!(
                            "Copy {} of {} failed: {}",
                            copy_index,
                            file.path.display(),
                            e
                        );
                        failures.push(format!(
                            "{} (copy {}): {}",
                            file.path.display(),
                            copy_index,
                            e
                        ));
                        file_done = false;
                    }
                }
            }

            if file_done && task.backup_mode == BackupMode::Move {
                self.remove_source(&file.path).await;
            }
        }

        Ok(RunState::Finished {
            failures,
            dedup_bytes,
        })
    }

    /// Verified copy of `checksum` whose target still exists
    async fn existing_copy(&self, checksum: &str) -> Result<Option<BackupLog>> {
        match self.store.find_success_by_checksum(checksum).await? {
            Some(prior) => {
                if tokio::fs::try_exists(&prior.target_path)
                    .await
                    .unwrap_or(false)
                {
                    Ok(Some(prior))
                } else {
                    warn!(
                        "Recorded copy {} is missing; writing the content again",
                        prior.target_path.display()
                    );
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Drop an unfinished copy that will not be continued
    async fn discard_partial(&self, mut log: BackupLog) {
        match tokio::fs::remove_file(&log.target_path).await {
            Ok(()) => debug!("Removed partial copy {}", log.target_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial copy {}: {}",
                log.target_path.display(),
                e
            ),
        }
        log.status = LogStatus::Canceled;
        record_log(&self.store, &self.sink, &log).await;
    }

    /// Raise `completed_size` to `confirmed`, never lowering it
    async fn advance(&self, task_id: TaskId, confirmed: FileSize) -> Result<()> {
        self.update_task(task_id, move |t| {
            let value = confirmed.min(t.total_size);
            if value > t.completed_size {
                t.completed_size = value;
            }
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn report_unreadable(
        &self,
        task: &BackupTask,
        file: &PlannedFile,
        copy_index: u32,
        root: &Path,
    ) {
        let mut log = BackupLog::new(
            task.id,
            &file.path,
            &task.target_disk_id,
            copy_target(root, &file.relative, copy_index),
            copy_index,
            file.size,
            "",
        );
        log.status = LogStatus::Failed;
        deliver(self.sink.as_ref(), BackupEvent::Breakpoint(log)).await;
    }

    async fn remove_source(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Moved {}", path.display()),
            Err(e) => warn!("Failed to remove moved source {}: {}", path.display(), e),
        }
        self.registry.invalidate(path).await;
    }

    async fn finish(
        &self,
        task: &BackupTask,
        reserved: FileSize,
        root: &Path,
        failures: Vec<String>,
        dedup_bytes: FileSize,
    ) -> Result<BackupTask> {
        let mut logs = self.store.find_logs_by_task(task.id).await?;
        let verified = logs.iter().filter(|log| log.status == LogStatus::Success);
        let landed = verified.clone().next().is_some() || dedup_bytes > 0;
        let written: FileSize = verified.map(|log| log.size).sum();

        let on_disk = landed_bytes(latest_logs(logs.clone()).values());
        self.settle(task.id, &task.target_disk_id, reserved, on_disk)
            .await?;

        let status = if failures.is_empty() {
            TaskStatus::Completed
        } else if landed {
            TaskStatus::PartiallyFailed
        } else {
            TaskStatus::Failed
        };

        if !logs.is_empty() {
            let mut snapshot = task.clone();
            snapshot.status = status;
            match self.index.write_index(&snapshot, &logs, root).await {
                Ok(path) => {
                    for log in &mut logs {
                        log.index_path = Some(path.clone());
                        if let Err(e) = self.store.update_log(log).await {
                            warn!("Failed to link log {} to its index: {}", log.id, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to write index for task {}: {}", task.id, e),
            }
        }

        let confirmed = written.saturating_add(dedup_bytes);
        let last_error = (!failures.is_empty()).then(|| failures.join("; "));
        let task = self
            .update_task(task.id, move |t| {
                t.completed_size = if status == TaskStatus::Completed {
                    t.total_size
                } else {
                    t.completed_size.max(confirmed.min(t.total_size))
                };
                t.status = status;
                t.paused = false;
                t.last_error = last_error;
                Ok(())
            })
            .await?;

        if status == TaskStatus::Completed {
            info!("Task {} completed, {} bytes", task.id, task.total_size);
        } else {
            warn!(
                "Task {} finished {}: {}",
                task.id,
                status,
                task.last_error.as_deref().unwrap_or_default()
            );
        }
        Ok(task)
    }

    async fn fail(&self, task_id: TaskId, error: &Error) -> Result<BackupTask> {
        error!("Task {} failed: {}", task_id, error);
        let message = error.to_string();
        self.update_task(task_id, move |t| {
            t.status = TaskStatus::Failed;
            t.paused = false;
            t.last_error = Some(message);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::JsonIndexWriter;
    use crate::notify::NullSink;
    use casevault_config::PolicyConfig;
    use casevault_device::CredentialCipher;
    use casevault_store::MemoryStore;
    use casevault_types::ErrorKind;
    use filetime::FileTime;
    use rstest::rstest;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        store: SharedStore,
        controller: TaskController,
        disk_id: String,
    }

    async fn fixture(capacity: u64) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let disks = Arc::new(
            DiskCapacityManager::new(store.clone(), CredentialCipher::ephemeral())
                .with_local_mount_root(temp.path().join("mnt")),
        );
        let disk = disks
            .initialize_local_disk("WD-TEST-1", capacity)
            .await
            .unwrap();
        let policy = Arc::new(PolicyStore::new(store.clone(), PolicyConfig::default()));
        policy.update("migration_threshold", "0").await.unwrap();

        let registry = Arc::new(ChecksumRegistry::new());
        let sink: SharedSink = Arc::new(NullSink);
        let transfer = TransferEngine::new(store.clone(), sink.clone(), registry.clone())
            .with_chunk_size(1024);
        let controller = TaskController::new(
            store.clone(),
            disks,
            policy,
            registry,
            transfer,
            sink,
            Arc::new(JsonIndexWriter::new()),
        );
        Fixture {
            temp,
            store,
            controller,
            disk_id: disk.disk_id,
        }
    }

    fn age_file(path: &Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * 86_400);
        filetime::set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
    }

    /// `case/杀人_statement.txt` (sensitive, 3000 bytes) and `case/old.log` (cold, 500 bytes)
    fn case_dir(temp: &TempDir) -> PathBuf {
        let case = temp.path().join("case");
        std::fs::create_dir_all(&case).unwrap();
        std::fs::write(case.join("杀人_statement.txt"), vec![7u8; 3000]).unwrap();
        let cold = case.join("old.log");
        std::fs::write(&cold, vec![9u8; 500]).unwrap();
        age_file(&cold, 400);
        std::fs::write(case.join("fresh.txt"), b"not backed up").unwrap();
        case
    }

    #[rstest]
    #[case("a/report.docx", 1, "a/report.docx")]
    #[case("a/report.docx", 2, "a/report_copy2.docx")]
    #[case("a/README", 3, "a/README_copy3")]
    fn test_copy_target(#[case] relative: &str, #[case] copy: u32, #[case] expected: &str) {
        let root = Path::new("/mnt/202401A001/cases");
        assert_eq!(
            copy_target(root, Path::new(relative), copy),
            root.join(expected)
        );
    }

    #[rstest]
    #[case("../escape")]
    #[case("/absolute")]
    #[case("cases/../../x")]
    fn test_target_path_must_stay_below_mount(#[case] target: &str) {
        assert_eq!(
            validate_target_path(target).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_target_path_accepts_relative() {
        validate_target_path("cases/2024").unwrap();
        validate_target_path("").unwrap();
    }

    #[tokio::test]
    async fn test_run_copies_and_verifies() {
        let fx = fixture(1024 * 1024).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.total_size, 3000 * 2 + 500);
        assert_eq!(done.completed_size, done.total_size);
        assert_eq!(done.backup_count, 3);
        assert!(done.sensitive);

        let logs = fx.store.find_logs_by_task(task.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        for log in &logs {
            assert_eq!(log.status, LogStatus::Success);
            assert!(log.target_path.exists());
            assert!(log.index_path.as_ref().unwrap().exists());
        }
        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        assert_eq!(disk.available_capacity, 1024 * 1024 - done.total_size);
        assert_eq!(fx.controller.disks().reserved_bytes(&fx.disk_id).await, 0);
    }

    #[tokio::test]
    async fn test_move_removes_sources_after_verify() {
        let fx = fixture(1024 * 1024).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "moved", BackupMode::Move)
            .await
            .unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(!case.join("杀人_statement.txt").exists());
        assert!(!case.join("old.log").exists());
        assert!(case.join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn test_nothing_to_copy_completes_empty() {
        let fx = fixture(1024).await;
        let source = fx.temp.path().join("fresh.txt");
        std::fs::write(&source, b"new").unwrap();
        let task = fx
            .controller
            .create_task(&source, &fx.disk_id, "", BackupMode::Copy)
            .await
            .unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.total_size, 0);
        assert!(fx.store.find_logs_by_task(task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_shortfall_fails_without_logs() {
        let fx = fixture(1000).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.last_error.is_some());
        assert!(fx.store.find_logs_by_task(task.id).await.unwrap().is_empty());
        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        assert_eq!(disk.available_capacity, 1000);
    }

    #[tokio::test]
    async fn test_pause_before_start_then_resume() {
        let fx = fixture(1024 * 1024).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();

        fx.controller.request_pause(task.id).await.unwrap();
        let paused = fx.controller.run(task.id).await.unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert!(paused.paused);

        fx.controller.prepare_resume(task.id).await.unwrap();
        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(!done.paused);
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let fx = fixture(1024 * 1024).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();

        let err = fx.controller.prepare_resume(task.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_identical_cold_content_written_once() {
        let fx = fixture(1024 * 1024).await;
        let first = fx.temp.path().join("a.bin");
        let second = fx.temp.path().join("b.bin");
        for path in [&first, &second] {
            std::fs::write(path, vec![3u8; 2048]).unwrap();
            age_file(path, 500);
        }

        let one = fx
            .controller
            .create_task(&first, &fx.disk_id, "one", BackupMode::Copy)
            .await
            .unwrap();
        fx.controller.run(one.id).await.unwrap();

        let two = fx
            .controller
            .create_task(&second, &fx.disk_id, "two", BackupMode::Copy)
            .await
            .unwrap();
        let done = fx.controller.run(two.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completed_size, done.total_size);
        assert!(fx.store.find_logs_by_task(two.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_skip_cancels_unfinished_copy() {
        let fx = fixture(1024 * 1024).await;
        let first = fx.temp.path().join("a.bin");
        let second = fx.temp.path().join("b.bin");
        for path in [&first, &second] {
            std::fs::write(path, vec![3u8; 2048]).unwrap();
            age_file(path, 500);
        }

        let one = fx
            .controller
            .create_task(&first, &fx.disk_id, "one", BackupMode::Copy)
            .await
            .unwrap();
        fx.controller.run(one.id).await.unwrap();

        // half of b.bin landed before its task was paused
        let two = fx
            .controller
            .create_task(&second, &fx.disk_id, "two", BackupMode::Copy)
            .await
            .unwrap();
        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        let partial = local_mount(&disk).unwrap().join("two").join("b.bin");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, vec![3u8; 1024]).unwrap();
        let mut stale = BackupLog::new(
            two.id,
            &second,
            &fx.disk_id,
            partial.clone(),
            1,
            2048,
            "stale",
        );
        stale.status = LogStatus::Paused;
        stale.transfer_offset = 1024;
        fx.store.insert_log(&stale).await.unwrap();

        let done = fx.controller.run(two.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(!partial.exists());

        let logs = fx.store.find_logs_by_task(two.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Canceled);

        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        assert_eq!(disk.available_capacity, 1024 * 1024 - 2048);
        assert_eq!(done.committed_size, 0);
    }

    #[tokio::test]
    async fn test_resume_charges_partial_copy_once() {
        let fx = fixture(8 * 1024).await;
        let first = fx.temp.path().join("first.bin");
        std::fs::write(&first, vec![1u8; 6 * 1024]).unwrap();
        age_file(&first, 500);
        let task = fx
            .controller
            .create_task(&first, &fx.disk_id, "a", BackupMode::Copy)
            .await
            .unwrap();

        // a previous run stopped after 4 KiB
        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        let partial = local_mount(&disk).unwrap().join("a").join("first.bin");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, vec![1u8; 4 * 1024]).unwrap();
        let expected = casevault_io::sha256_file(&first).await.unwrap();
        let mut log = BackupLog::new(
            task.id,
            &first,
            &fx.disk_id,
            partial.clone(),
            1,
            6 * 1024,
            expected,
        );
        log.status = LogStatus::Paused;
        log.transfer_offset = 4 * 1024;
        fx.store.insert_log(&log).await.unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.committed_size, 6 * 1024);
        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        assert_eq!(disk.available_capacity, 2 * 1024);
        assert_eq!(fx.controller.disks().reserved_bytes(&fx.disk_id).await, 0);
    }

    #[tokio::test]
    async fn test_run_with_nothing_landed_fails() {
        let fx = fixture(1024 * 1024).await;
        let source = fx.temp.path().join("only.bin");
        std::fs::write(&source, vec![5u8; 2048]).unwrap();
        age_file(&source, 500);

        let disk = fx.controller.disks().get_disk(&fx.disk_id).await.unwrap();
        std::fs::create_dir_all(local_mount(&disk).unwrap().join("x").join("only.bin")).unwrap();
        let task = fx
            .controller
            .create_task(&source, &fx.disk_id, "x", BackupMode::Copy)
            .await
            .unwrap();

        let done = fx.controller.run(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.last_error.unwrap().contains("only.bin"));
        let logs = fx.store.find_logs_by_task(task.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_cancel_cleanup_removes_copies() {
        let fx = fixture(1024 * 1024).await;
        let case = case_dir(&fx.temp);
        let task = fx
            .controller
            .create_task(&case, &fx.disk_id, "cases", BackupMode::Copy)
            .await
            .unwrap();
        fx.controller.run(task.id).await.unwrap();

        // finished tasks are no longer cancelable
        let err = fx.controller.cancel_cleanup(task.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let other = fx
            .controller
            .create_task(&case, &fx.disk_id, "again", BackupMode::Copy)
            .await
            .unwrap();
        fx.controller.request_cancel(other.id).await.unwrap();
        let canceled = fx.controller.cancel_cleanup(other.id).await.unwrap();
        assert_eq!(canceled.status, TaskStatus::Canceled);
        assert!(!canceled.paused);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_source() {
        let fx = fixture(1024).await;
        let err = fx
            .controller
            .create_task(
                Path::new("/no/such/case"),
                &fx.disk_id,
                "cases",
                BackupMode::Copy,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_disk() {
        let fx = fixture(1024).await;
        let err = fx
            .controller
            .create_task(fx.temp.path(), "209912A999", "cases", BackupMode::Copy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
