//! Error types for aimi-import
//!
//! Component errors (`ScanError`, `StoreError`, `ResolveError`, `TagError`)
//! stay local to one file's import. [`ImportError`] is what ends a whole run.

use crate::models::RunSummary;
use crate::services::fingerprint_store::StoreError;
use crate::services::metadata_resolver::ResolveError;
use crate::services::file_scanner::ScanError;
use thiserror::Error;

/// Exit code for a run that completed
pub const EXIT_OK: i32 = 0;
/// Exit code for an aborted run or a configuration error
pub const EXIT_ABORTED: i32 = 1;
/// Exit code for a missing source directory or a declined confirmation
pub const EXIT_REFUSED: i32 = 2;

/// Run-level error
#[derive(Debug, Error)]
pub enum ImportError {
    /// Source directory missing or not a directory
    #[error("Source directory unavailable: {0}")]
    Source(#[from] ScanError),

    /// Store failed repeatedly; the run stopped early
    #[error("Run aborted after {consecutive} consecutive store errors: {source}")]
    Aborted {
        consecutive: u32,
        /// Counts up to the point of abort
        summary: Box<RunSummary>,
        #[source]
        source: StoreError,
    },

    /// Store could not be opened
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Resolver setup failed: {0}")]
    Resolver(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] aimi_common::Error),

    /// Operator declined an interactive confirmation
    #[error("Cancelled by user")]
    Declined,
}

impl ImportError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ImportError::Source(_) | ImportError::Declined => EXIT_REFUSED,
            _ => EXIT_ABORTED,
        }
    }

    /// Partial summary of an aborted run
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            ImportError::Aborted { summary, .. } => Some(&**summary),
            _ => None,
        }
    }
}
