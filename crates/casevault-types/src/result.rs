//! Result type alias for CaseVault operations

use crate::Error;

/// Result type alias for CaseVault operations
pub type Result<T> = std::result::Result<T, Error>;
