//! Resumable, verified copy of one file to one target
//!
//! Every chunk advances and persists the log's `transfer_offset`; progress is
//! pushed every `progress_interval` bytes. Between chunks the persisted task
//! record is read back, so a pause requested from anywhere stops the copy at
//! the next chunk boundary.

use async_trait::async_trait;
use casevault_io::{
    ChecksumRegistry, ChunkControl, ChunkObserver, ChunkProgress, CopyOutcome, ResumableCopier,
    DEFAULT_CHUNK_SIZE,
};
use casevault_store::SharedStore;
use casevault_types::{BackupEvent, BackupLog, Error, LogStatus, Result, TaskId, TaskStatus};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::notify::{deliver, SharedSink};

/// Default bytes between progress pushes: 100 MiB
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100 * 1024 * 1024;

/// How a transfer call ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Target verified against the source checksum
    Completed {
        /// Bytes written by this call
        bytes_written: u64,
    },
    /// Stopped at a chunk boundary because the task was paused
    Paused {
        /// Bytes written by this call
        bytes_written: u64,
    },
}

impl TransferOutcome {
    /// Bytes written by this call
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Completed { bytes_written } | Self::Paused { bytes_written } => *bytes_written,
        }
    }
}

/// Persist a log and push it as a breakpoint; failures are logged only
pub(crate) async fn record_log(store: &SharedStore, sink: &SharedSink, log: &BackupLog) {
    if let Err(e) = store.update_log(log).await {
        error!("Failed to persist log {}: {}", log.id, e);
    }
    deliver(sink.as_ref(), BackupEvent::Breakpoint(log.clone())).await;
}

/// Whether the persisted task asks running work to stop
pub(crate) async fn stop_requested(store: &SharedStore, task_id: TaskId) -> bool {
    match store.get_task(task_id).await {
        Ok(Some(task)) => {
            task.paused || task.status == TaskStatus::Paused || task.status.is_terminal()
        }
        Ok(None) => false,
        Err(e) => {
            warn!("Cannot read task {} between chunks: {}", task_id, e);
            false
        }
    }
}

struct LogObserver<'a> {
    store: &'a SharedStore,
    sink: &'a SharedSink,
    log: &'a mut BackupLog,
    progress_interval: u64,
    since_push: u64,
}

#[async_trait]
impl<'a> ChunkObserver for LogObserver<'a> {
    async fn on_chunk(&mut self, progress: ChunkProgress) -> Result<ChunkControl> {
        self.log.transfer_offset = progress.offset;
        if let Err(e) = self.store.update_log(&*self.log).await {
            warn!("Failed to persist offset of log {}: {}", self.log.id, e);
        }

        self.since_push += progress.chunk_len as u64;
        if self.since_push >= self.progress_interval {
            self.since_push = 0;
            deliver(self.sink.as_ref(), BackupEvent::Progress(self.log.clone())).await;
        }

        if stop_requested(self.store, self.log.task_id).await {
            debug!(
                "Pause observed for {} at byte {}",
                self.log.filename, progress.offset
            );
            return Ok(ChunkControl::Stop);
        }
        Ok(ChunkControl::Continue)
    }
}

/// Copies one file per call, resuming from the log's persisted offset
pub struct TransferEngine {
    store: SharedStore,
    sink: SharedSink,
    registry: Arc<ChecksumRegistry>,
    copier: ResumableCopier,
    progress_interval: u64,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("chunk_size", &self.copier.chunk_size())
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    /// Engine with 8 KiB chunks and 100 MiB progress pushes
    pub fn new(store: SharedStore, sink: SharedSink, registry: Arc<ChecksumRegistry>) -> Self {
        Self {
            store,
            sink,
            registry,
            copier: ResumableCopier::new(DEFAULT_CHUNK_SIZE),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the chunk size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.copier = ResumableCopier::new(chunk_size);
        self
    }

    /// Set the bytes between progress pushes
    #[must_use]
    pub fn with_progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }

    /// Copy `source` into `log.target_path` from `log.transfer_offset`
    ///
    /// `log.checksum` is the expected source fingerprint. On success the log is
    /// SUCCESS; on pause it is PAUSED and the call returns normally. An I/O
    /// failure leaves the log INTERRUPTED and a checksum mismatch leaves it
    /// FAILED with the bad target removed; both return the error.
    pub async fn transfer(&self, log: &mut BackupLog, source: &Path) -> Result<TransferOutcome> {
        if tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::from_io_at(&e, source))?
            .is_dir()
        {
            return Err(Error::validation(format!(
                "{} is a directory; copies are per file",
                source.display()
            )));
        }

        let target = log.target_path.clone();
        let resume_offset = log.transfer_offset;
        let outcome = {
            let mut observer = LogObserver {
                store: &self.store,
                sink: &self.sink,
                log: &mut *log,
                progress_interval: self.progress_interval,
                since_push: 0,
            };
            self.copier
                .copy(source, &target, resume_offset, &mut observer)
                .await
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Copy of {} interrupted: {}", source.display(), e);
                log.status = LogStatus::Interrupted;
                record_log(&self.store, &self.sink, log).await;
                return Err(e);
            }
        };

        match outcome {
            CopyOutcome::Stopped {
                bytes_written,
                offset,
            } => {
                log.transfer_offset = offset;
                log.status = LogStatus::Paused;
                record_log(&self.store, &self.sink, log).await;
                Ok(TransferOutcome::Paused { bytes_written })
            }
            CopyOutcome::Completed {
                bytes_written,
                offset,
            } => {
                log.transfer_offset = offset;
                self.verify(log).await?;
                Ok(TransferOutcome::Completed { bytes_written })
            }
        }
    }

    async fn verify(&self, log: &mut BackupLog) -> Result<()> {
        let actual = match self.registry.compute(&log.target_path).await {
            Ok(actual) => actual,
            Err(e) => {
                log.status = LogStatus::Interrupted;
                record_log(&self.store, &self.sink, log).await;
                return Err(e);
            }
        };

        if actual != log.checksum {
            error!(
                "Checksum mismatch for {}: expected {}, got {}",
                log.target_path.display(),
                log.checksum,
                actual
            );
            if let Err(e) = tokio::fs::remove_file(&log.target_path).await {
                warn!(
                    "Failed to remove unverified copy {}: {}",
                    log.target_path.display(),
                    e
                );
            }
            log.status = LogStatus::Failed;
            log.transfer_offset = 0;
            record_log(&self.store, &self.sink, log).await;
            return Err(Error::integrity(&log.target_path, &log.checksum, actual));
        }

        log.status = LogStatus::Success;
        log.backup_time = Utc::now();
        record_log(&self.store, &self.sink, log).await;
        Ok(())
    }
}
