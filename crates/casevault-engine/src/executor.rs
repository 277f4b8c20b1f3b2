//! Background workers for backup tasks

use casevault_types::{Error, Result, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::controller::TaskController;

/// Default number of tasks copying at the same time
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Runs tasks on the tokio runtime, a bounded number at a time
///
/// At most one worker exists per task. Workers queue on a semaphore, so a
/// spawned task may sit PENDING until a permit frees up.
#[derive(Debug)]
pub struct TaskExecutor {
    semaphore: Arc<Semaphore>,
    workers: RwLock<HashMap<TaskId, JoinHandle<()>>>,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}

impl TaskExecutor {
    /// Executor running up to `max_concurrent` tasks
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a worker that runs `task_id` to completion or pause
    pub async fn spawn(&self, task_id: TaskId, controller: Arc<TaskController>) -> Result<()> {
        let mut workers = self.workers.write().await;
        workers.retain(|_, handle| !handle.is_finished());
        if workers.contains_key(&task_id) {
            return Err(Error::invalid_state(format!(
                "task {} already has a running worker",
                task_id
            )));
        }

        let semaphore = Arc::clone(&self.semaphore);
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker for task {} got no permit: {}", task_id, e);
                    return;
                }
            };
            debug!("Worker for task {} started", task_id);
            match controller.run(task_id).await {
                Ok(task) => info!("Worker for task {} stopped with {}", task_id, task.status),
                Err(e) => error!("Worker for task {} failed: {}", task_id, e),
            }
        });
        workers.insert(task_id, handle);
        Ok(())
    }

    /// Wait for the worker of `task_id`, if there is one
    pub async fn wait(&self, task_id: TaskId) {
        let handle = self.workers.write().await.remove(&task_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Worker for task {} panicked: {}", task_id, e);
            }
        }
    }

    /// Whether a worker for `task_id` is still alive
    pub async fn is_running(&self, task_id: TaskId) -> bool {
        self.workers
            .read()
            .await
            .get(&task_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live workers
    pub async fn active_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}
