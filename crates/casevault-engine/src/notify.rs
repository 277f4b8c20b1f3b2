//! Breakpoint and progress delivery to observers
//!
//! Delivery is fire-and-forget: a failing sink is logged and the backup carries on.

use async_trait::async_trait;
use casevault_types::{BackupEvent, Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Receives backup events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one event
    async fn publish(&self, event: &BackupEvent) -> Result<()>;
}

/// Shared sink handle
pub type SharedSink = Arc<dyn NotificationSink>;

/// Publish and swallow failures
pub async fn deliver(sink: &dyn NotificationSink, event: BackupEvent) {
    if let Err(e) = sink.publish(&event).await {
        warn!("Failed to deliver event for task {}: {}", event.task_id(), e);
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn publish(&self, _event: &BackupEvent) -> Result<()> {
        Ok(())
    }
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, event: &BackupEvent) -> Result<()> {
        match event {
            BackupEvent::Breakpoint(log) => info!(
                "Breakpoint {} copy {} -> {}: {} at offset {}",
                log.filename,
                log.copy_index,
                log.target_path.display(),
                log.status,
                log.transfer_offset
            ),
            BackupEvent::Progress(log) => debug!(
                "Progress {}: {}/{} bytes",
                log.filename, log.transfer_offset, log.size
            ),
            BackupEvent::Task(task) => info!(
                "Task {} is {} ({}/{} bytes)",
                task.id, task.status, task.completed_size, task.total_size
            ),
        }
        Ok(())
    }
}

/// In-process channel that any number of observers can subscribe to
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<BackupEvent>,
}

impl BroadcastSink {
    /// Channel keeping up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver for events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, event: &BackupEvent) -> Result<()> {
        if self.sender.send(event.clone()).is_err() {
            debug!("No subscribers for task {} event", event.task_id());
        }
        Ok(())
    }
}

/// Forwards each event to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn publish(&self, event: &BackupEvent) -> Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.publish(event))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::other(format!(
                "{} sink(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casevault_types::{BackupMode, BackupTask};

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn publish(&self, _event: &BackupEvent) -> Result<()> {
            Err(Error::other("socket closed"))
        }
    }

    fn task_event() -> BackupEvent {
        BackupEvent::Task(BackupTask::new("/case", "202401A001", "cases", BackupMode::Copy))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let event = task_event();
        sink.publish(&event).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        BroadcastSink::default().publish(&task_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_fanout_reports_failures_but_still_delivers() {
        let broadcast = BroadcastSink::new(8);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new()
            .with(Arc::new(FailingSink))
            .with(Arc::new(broadcast.clone()));

        assert!(fanout.publish(&task_event()).await.is_err());
        assert!(rx.try_recv().is_ok());

        // deliver() never fails the caller
        deliver(&fanout, task_event()).await;
    }
}
