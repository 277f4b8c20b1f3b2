//! Checksum registry and resumable positional copy for CaseVault
//!
//! - **Checksums**: SHA-256 fingerprints with a metadata-keyed cache and
//!   per-fingerprint claims for dedup under concurrent writers
//! - **Resumable copy**: fixed-size chunks written at absolute offsets, with an
//!   observer hook after every chunk
//!
//! # Examples
//!
//! ```rust,no_run
//! use casevault_io::{ResumableCopier, RunToEnd};
//! use std::path::Path;
//!
//! # async fn example() -> casevault_types::Result<()> {
//! let copier = ResumableCopier::default();
//! let outcome = copier
//!     .copy(Path::new("evidence.bin"), Path::new("/backup/evidence.bin"), 0, &mut RunToEnd)
//!     .await?;
//! println!("Copied {} bytes", outcome.bytes_written());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod checksum;
pub mod copy;

pub use checksum::{sha256_bytes, sha256_file, ChecksumClaim, ChecksumRegistry};
pub use copy::{
    ChunkControl, ChunkObserver, ChunkProgress, CopyOutcome, ResumableCopier, RunToEnd,
    DEFAULT_CHUNK_SIZE,
};
