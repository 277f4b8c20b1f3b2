//! Persistence interfaces and reference store for CaseVault
//!
//! The backup core talks to storage only through the traits in [`traits`]:
//! create, read and update by id, plus the handful of field queries the
//! controller needs (by status, checksum, task, disk and serial number).
//! [`MemoryStore`] implements all of them and can snapshot itself to JSON.
//!
//! # Examples
//!
//! ```rust
//! use casevault_store::{MemoryStore, TaskStore};
//! use casevault_types::{BackupMode, BackupTask};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let task = BackupTask::new("/cases/001", "202401A001", "cases", BackupMode::Copy);
//! store.insert_task(&task).await.unwrap();
//! assert!(store.get_task(task.id).await.unwrap().is_some());
//! # });
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{BackupStore, ConfigStore, DiskStore, LogStore, TaskStore};

/// Store handle shared between the engine components
pub type SharedStore = std::sync::Arc<dyn BackupStore>;
