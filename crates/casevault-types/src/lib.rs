//! Core type system and error handling for CaseVault
//!
//! This crate provides the foundational types shared by every CaseVault crate:
//!
//! - **Error handling**: one error enum with coarse kinds
//! - **Identifiers and statuses**: task, log and disk lifecycle enums
//! - **Model**: the persisted `BackupTask`, `BackupLog`, `HardDisk` and `ConfigEntry`
//! - **Reports**: events for observers and operator-facing summaries
//!
//! # Examples
//!
//! ```rust
//! use casevault_types::{BackupMode, BackupTask, Result, TaskStatus};
//!
//! fn example() -> Result<BackupTask> {
//!     let task = BackupTask::new("/cases/2024-001", "202401A001", "cases", BackupMode::Copy);
//!     assert_eq!(task.status, TaskStatus::Pending);
//!     Ok(task)
//! }
//! # example().unwrap();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod model;
pub mod report;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorKind};
pub use model::{BackupLog, BackupTask, ConfigEntry, HardDisk};
pub use report::{BackupEvent, ClassificationReport, MigrationReport, SkippedFile, TaskProgress};
pub use result::Result;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_kind() {
        let config_error = Error::config("invalid config");
        assert_eq!(config_error.kind(), ErrorKind::Config);
        assert!(config_error.to_string().contains("invalid config"));
    }

    #[test]
    fn test_task_progress_from_task() {
        let mut task = BackupTask::new("/case", "d", "", BackupMode::Copy);
        task.total_size = 10;
        task.completed_size = 5;
        let progress = TaskProgress::from(&task);
        assert_eq!(progress.percent, 50.0);
        assert_eq!(progress.status, TaskStatus::Pending);
    }
}
