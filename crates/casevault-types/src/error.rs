//! Error types and handling for CaseVault
//!
//! Every fallible operation in the workspace returns [`Error`]. Variants follow the
//! failure classes of a backup run: validation and state errors are rejected before
//! anything is mutated, capacity errors fail a task up front, and I/O or integrity
//! errors are collected per file.

use std::path::PathBuf;

/// Main error type for CaseVault operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// File not found
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found
        path: PathBuf,
    },

    /// Permission denied
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// Path to the file with permission issues
        path: PathBuf,
    },

    /// Request rejected before any state was touched
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the invalid input
        message: String,
    },

    /// A persisted entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "task" or "disk"
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Not enough space on a storage target
    #[error("Insufficient capacity: {message}")]
    Capacity {
        /// Description of the shortfall
        message: String,
    },

    /// Content fingerprint mismatch after a write
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        /// File whose content did not verify
        path: PathBuf,
        /// Fingerprint of the source
        expected: String,
        /// Fingerprint of the written target
        actual: String,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the state conflict
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Remote share query failed
    #[error("Remote share error: {message}")]
    Remote {
        /// Error message describing the remote issue
        message: String,
    },

    /// Credential sealing or unsealing failed
    #[error("Credential error: {message}")]
    Credential {
        /// Error message describing the credential issue
        message: String,
    },

    /// Persistence layer failure
    #[error("Store error: {message}")]
    Store {
        /// Error message describing the store issue
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {seconds} seconds")]
    Timeout {
        /// Number of seconds after which the operation timed out
        seconds: u64,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Invalid input
    Validation,
    /// Missing entity
    NotFound,
    /// Capacity shortfall
    Capacity,
    /// Checksum mismatch
    Integrity,
    /// Lifecycle conflict
    InvalidState,
    /// Configuration errors
    Config,
    /// Remote share errors
    Remote,
    /// Credential errors
    Credential,
    /// Persistence errors
    Store,
    /// Timeout
    Timeout,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::FileNotFound { .. } | Self::PermissionDenied { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Capacity { .. } => ErrorKind::Capacity,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Config { .. } => ErrorKind::Config,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Credential { .. } => ErrorKind::Credential,
            Self::Store { .. } => ErrorKind::Store,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(entity: &'static str, id: S) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a new capacity error
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }

    /// Create a new integrity error
    pub fn integrity<P, S1, S2>(path: P, expected: S1, actual: S2) -> Self
    where
        P: Into<PathBuf>,
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::Integrity {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new remote share error
    pub fn remote<S: Into<String>>(message: S) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create a new credential error
    pub fn credential<S: Into<String>>(message: S) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Map an I/O error for a known path, keeping not-found and permission cases distinct
    pub fn from_io_at<P: Into<PathBuf>>(error: &std::io::Error, path: P) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path: path.into() },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path.into() },
            _ => Self::Io {
                message: format!("{}: {}", path.into().display(), error),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
