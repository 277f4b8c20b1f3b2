//! Live progress for a running backup

use casevault_types::{BackupEvent, BackupTask, LogStatus, TaskId, TaskStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Progress bar fed from the engine's event channel
pub struct TaskProgressBar {
    progress_bar: Option<ProgressBar>,
}

impl TaskProgressBar {
    /// Create a bar; quiet mode shows nothing
    pub fn new(quiet: bool) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(bar_style) = ProgressStyle::default_bar().template(
                "{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(bar_style.progress_chars("█▉▊▋▌▍▎▏  "));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };
        Self { progress_bar }
    }

    /// Follow events of `task_id` until the channel closes or the handle is aborted
    pub fn watch(
        &self,
        task_id: TaskId,
        mut events: broadcast::Receiver<BackupEvent>,
    ) -> Option<JoinHandle<()>> {
        let pb = self.progress_bar.clone()?;
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.task_id() == task_id => apply(&pb, &event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Progress display skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Show the final state of the task
    pub fn finish(&self, task: &BackupTask) {
        if let Some(pb) = &self.progress_bar {
            pb.set_length(task.total_size);
            pb.set_position(task.completed_size.min(task.total_size));
            let message = match task.status {
                TaskStatus::Completed => style("Backup completed").green().to_string(),
                TaskStatus::Paused => style("Backup paused").yellow().to_string(),
                status => style(format!("Backup {}", status)).red().to_string(),
            };
            pb.finish_with_message(message);
        }
    }
}

fn apply(pb: &ProgressBar, event: &BackupEvent) {
    match event {
        BackupEvent::Task(task) => {
            pb.set_length(task.total_size);
            pb.set_position(task.completed_size.min(task.total_size));
        }
        BackupEvent::Progress(log) => {
            pb.set_message(format!(
                "{} {:.0}%",
                log.filename,
                percent(log.transfer_offset, log.size)
            ));
        }
        BackupEvent::Breakpoint(log) => match log.status {
            LogStatus::Running => pb.set_message(format!("Copying {}", log.filename)),
            LogStatus::Failed | LogStatus::Interrupted => pb.println(format!(
                "  {} {} (copy {}) {}",
                style("✗").red(),
                log.filename,
                log.copy_index,
                log.status
            )),
            _ => {}
        },
    }
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}
