//! Backup engine for CaseVault
//!
//! This crate ties the CaseVault components together into resumable, verified
//! backups of case files.
//!
//! # Features
//!
//! - **Classification**: per-file copy counts from a keyword pattern and a cold-data cutoff
//! - **Resumable transfer**: chunked positional copies with persisted offsets
//! - **Verification**: SHA-256 of every copy checked against its source
//! - **Deduplication**: single-copy content already held elsewhere is not written again
//! - **Task control**: pause, resume and cancel through the persisted task record
//! - **Notifications**: breakpoint and progress events to pluggable sinks
//!
//! # Examples
//!
//! ```rust
//! use casevault_config::Config;
//! use casevault_device::CredentialCipher;
//! use casevault_engine::BackupService;
//! use casevault_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let root = tempfile::tempdir()?;
//! let mut config = Config::default();
//! config.storage.local_mount_root = root.path().join("disks");
//! config.security.credential_key = Some(CredentialCipher::generate_key());
//!
//! let service = BackupService::new(config, Arc::new(MemoryStore::new()))?;
//! let disk = service.initialize_local_disk("WD-0001", 1 << 30).await?;
//! assert_eq!(service.list_disks().await?, vec![disk]);
//!
//! let report = service.classify(root.path()).await?;
//! assert_eq!(report.file_count, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod controller;
pub mod executor;
pub mod index;
pub mod notify;
pub mod policy;
pub mod service;
pub mod transfer;

pub use classify::{classify_file, plan_source, CopyPlan, FileClass, PlannedFile};
pub use controller::{copy_target, TaskController};
pub use executor::TaskExecutor;
pub use index::{IndexEntry, IndexSink, JsonIndexWriter, TaskIndex};
pub use notify::{BroadcastSink, FanoutSink, NotificationSink, NullSink, SharedSink, TracingSink};
pub use policy::{Policy, PolicyKey, PolicyStore};
pub use service::{BackupService, ServiceBuilder, ServiceResponse, AUTO_BACKUP_TARGET};
pub use transfer::{TransferEngine, TransferOutcome};
