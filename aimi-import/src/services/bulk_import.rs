//! Bulk import: adopt an existing collection without resolving it
//!
//! Every scanned identity without a record gets a `BulkSkipped` one. Existing
//! records are never touched, so a second run over the same tree writes
//! nothing.

use crate::error::ImportError;
use crate::models::{ImportRecord, RunSummary};
use crate::services::file_scanner::FileScanner;
use crate::services::fingerprint_store::FingerprintStore;
use crate::services::import_driver::StoreErrorBudget;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};

const SCAN_BUFFER: usize = 256;

/// Seed the store with `BulkSkipped` records for every file under `root`
pub async fn bulk_import(
    store: &dyn FingerprintStore,
    scanner: &FileScanner,
    root: &Path,
    max_consecutive_store_errors: u32,
) -> Result<RunSummary, ImportError> {
    info!(source = %root.display(), "Starting bulk import");

    let mut rx = scanner.spawn(root, SCAN_BUFFER)?;
    let mut summary = RunSummary::default();
    let mut budget = StoreErrorBudget::new(max_consecutive_store_errors);

    while let Some(item) = rx.recv().await {
        let Ok(file) = item else {
            summary.scan_errors += 1;
            continue;
        };
        summary.scanned += 1;

        let record = ImportRecord::bulk_skipped(file.identity.clone(), &file.path, Utc::now());
        match store.put_if_absent(&record).await {
            Ok(true) => {
                budget.success();
                summary.bulk_skipped += 1;
                debug!(
                    path = %file.path.display(),
                    identity = %file.identity.short(),
                    "Marked as bulk skipped"
                );
            }
            Ok(false) => {
                budget.success();
                summary.skipped += 1;
            }
            Err(e) => budget.failure(&file.path, e, &mut summary)?,
        }
    }

    summary.log();
    Ok(summary)
}
