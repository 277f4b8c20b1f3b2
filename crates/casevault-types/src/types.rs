//! Identifiers and lifecycle enums shared across CaseVault crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// File size in bytes
pub type FileSize = u64;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| Error::validation(format!("invalid id '{}': {}", s, e)))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a backup task
    TaskId
);

uuid_id!(
    /// Unique identifier for a backup log (one physical copy)
    LogId
);

/// Whether the source is kept after a verified copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupMode {
    /// Keep the source
    #[default]
    Copy,
    /// Delete the source after its last copy verifies
    Move,
}

impl FromStr for BackupMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COPY" => Ok(Self::Copy),
            "MOVE" => Ok(Self::Move),
            other => Err(Error::validation(format!("unknown backup mode '{}'", other))),
        }
    }
}

/// Lifecycle state of a backup task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet started
    Pending,
    /// A worker is copying files
    Running,
    /// Stopped on operator request; resumable
    Paused,
    /// Every planned copy verified
    Completed,
    /// Pre-flight or capacity failure
    Failed,
    /// Finished with at least one failed file
    PartiallyFailed,
    /// Stopped by the operator and cleaned up
    Canceled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyFailed | Self::Canceled
        )
    }

    /// Check if the task is active (running or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::PartiallyFailed => "PARTIALLY_FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single copy operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    /// Bytes are being written
    Running,
    /// Stopped after a chunk on pause
    Paused,
    /// Written and verified
    Success,
    /// Verification failed
    Failed,
    /// I/O error mid-copy; resumable
    Interrupted,
    /// Removed by a task cancel
    Canceled,
}

impl LogStatus {
    /// Check if the copy reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    /// Check if the copy can continue from its offset
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Interrupted)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational state of a storage target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiskStatus {
    /// Accepts new backups
    Active,
    /// Fully migrated out
    Archived,
    /// Last capacity query failed
    Error,
}

impl fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
            Self::Error => "ERROR",
        })
    }
}

/// Migration marker on a storage target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    /// Below the capacity threshold, awaiting an operator
    Pending,
    /// Data is being moved off this disk
    Running,
}

/// How a storage target is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiskProtocol {
    /// Locally mounted volume
    Local,
    /// SMB network share
    Smb,
}

impl fmt::Display for DiskProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "LOCAL",
            Self::Smb => "SMB",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Pending, false, false)]
    #[case(TaskStatus::Running, false, true)]
    #[case(TaskStatus::Paused, false, true)]
    #[case(TaskStatus::Completed, true, false)]
    #[case(TaskStatus::Failed, true, false)]
    #[case(TaskStatus::PartiallyFailed, true, false)]
    #[case(TaskStatus::Canceled, true, false)]
    fn test_task_status_classes(
        #[case] status: TaskStatus,
        #[case] terminal: bool,
        #[case] active: bool,
    ) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_active(), active);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::PartiallyFailed).unwrap();
        assert_eq!(json, "\"PARTIALLY_FAILED\"");
        assert_eq!(TaskStatus::PartiallyFailed.to_string(), "PARTIALLY_FAILED");

        let json = serde_json::to_string(&LogStatus::Interrupted).unwrap();
        assert_eq!(json, "\"INTERRUPTED\"");
    }

    #[test]
    fn test_log_status_resumable() {
        assert!(LogStatus::Paused.is_resumable());
        assert!(LogStatus::Interrupted.is_resumable());
        assert!(!LogStatus::Success.is_resumable());
        assert!(LogStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[rstest]
    #[case("copy", BackupMode::Copy)]
    #[case("MOVE", BackupMode::Move)]
    fn test_backup_mode_parse(#[case] input: &str, #[case] expected: BackupMode) {
        assert_eq!(input.parse::<BackupMode>().unwrap(), expected);
    }
}
