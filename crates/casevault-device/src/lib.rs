//! Storage target management for CaseVault
//!
//! This crate owns everything CaseVault knows about the disks it writes to:
//!
//! - **Discovery**: local volumes from the running host, SMB shares via a probe
//! - **Inventory**: disks reconciled by serial number, with `YYYYMM<group><seq>` ids
//! - **Capacity**: reserve/commit accounting under a per-disk lock
//! - **Migration**: verified copy of a disk's content onto another disk
//!
//! # Examples
//!
//! ```rust
//! use casevault_device::{CredentialCipher, DiskCapacityManager};
//! use casevault_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let root = tempfile::tempdir()?;
//! let store = Arc::new(MemoryStore::new());
//! let manager = DiskCapacityManager::new(store, CredentialCipher::ephemeral())
//!     .with_local_mount_root(root.path());
//!
//! let disk = manager.initialize_local_disk("WD-0001", 1 << 30).await?;
//! manager.reserve(&disk.disk_id, 1 << 20, 0).await?;
//! let disk = manager.commit(&disk.disk_id, 1 << 20, 4096).await?;
//! assert_eq!(disk.available_capacity, (1 << 30) - 4096);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod capacity;
pub mod credentials;
pub mod disk_id;
pub mod migration;
pub mod scanner;
pub mod smb;

#[cfg(unix)]
pub mod unix;

pub use capacity::{local_mount, DiskCapacityManager, DEFAULT_LOCAL_MOUNT_ROOT};
pub use credentials::CredentialCipher;
pub use disk_id::{next_disk_id, DiskGroup};
pub use migration::has_migration_margin;
pub use scanner::{StaticVolumes, SystemVolumes, VolumeInfo, VolumeSource, MIN_VOLUME_SIZE};
pub use smb::{RemoteShareProbe, ShareSpace, SmbClientProbe};
