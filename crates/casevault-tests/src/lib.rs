//! CaseVault integration testing support
//!
//! Shared fixtures for the end-to-end tests under `tests/`: service
//! configuration, case directory builders and deterministic file content.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Common helpers used across the integration tests.
pub mod test_utils;
