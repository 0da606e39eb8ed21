//! Per-run outcome counters

use serde::Serialize;
use std::fmt;

/// Counts reported at the end of every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Candidate files produced by the scanner
    pub scanned: usize,
    /// Resolved by the AI and placed in the library
    pub resolved: usize,
    /// Committed as duplicates of an existing library track without an AI call
    pub linked: usize,
    /// Failed this run; eligible for a later retry
    pub failed: usize,
    /// Failed this run (or found abandoned) with the retry cap reached
    pub permanently_failed: usize,
    /// Already handled by an earlier run
    pub skipped: usize,
    /// Claimed by a concurrent run that is still working on it
    pub in_flight_elsewhere: usize,
    /// Files excluded because they could not be read
    pub scan_errors: usize,
    /// Store writes that failed; the file was left for the next pass
    pub store_errors: usize,
    /// Records seeded by bulk import
    pub bulk_skipped: usize,
    /// Dry run: files that would be sent to resolution
    pub would_process: usize,
}

impl RunSummary {
    /// Emit the summary as one structured log line
    pub fn log(&self) {
        tracing::info!(
            scanned = self.scanned,
            resolved = self.resolved,
            linked = self.linked,
            failed = self.failed,
            permanently_failed = self.permanently_failed,
            skipped = self.skipped,
            in_flight_elsewhere = self.in_flight_elsewhere,
            scan_errors = self.scan_errors,
            store_errors = self.store_errors,
            bulk_skipped = self.bulk_skipped,
            would_process = self.would_process,
            "Run summary"
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scanned:             {}", self.scanned)?;
        writeln!(f, "resolved:            {}", self.resolved)?;
        writeln!(f, "linked duplicates:   {}", self.linked)?;
        writeln!(f, "failed (retryable):  {}", self.failed)?;
        writeln!(f, "permanently failed:  {}", self.permanently_failed)?;
        writeln!(f, "skipped (seen):      {}", self.skipped)?;
        writeln!(f, "in flight elsewhere: {}", self.in_flight_elsewhere)?;
        writeln!(f, "scan errors:         {}", self.scan_errors)?;
        writeln!(f, "store errors:        {}", self.store_errors)?;
        writeln!(f, "bulk skipped:        {}", self.bulk_skipped)?;
        write!(f, "would process:       {}", self.would_process)
    }
}
