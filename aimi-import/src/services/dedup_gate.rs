//! Dedup Gate
//!
//! Decides whether a file identity still needs resolution. `Pending` records
//! left behind by an interrupted run are `New`, so they get re-evaluated by
//! the driver's claim instead of being skipped forever.

use crate::models::{FileIdentity, ImportRecord};
use crate::services::fingerprint_store::{FingerprintStore, StoreError};

/// Gate decision for one file identity
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Already handled; carries the record that made the decision
    Skip(ImportRecord),
    /// Needs (re)processing; carries the existing record if any
    New(Option<ImportRecord>),
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Decision::Skip(_))
    }
}

/// Dedup Gate over a fingerprint store
pub struct DedupGate<'a> {
    store: &'a dyn FingerprintStore,
    max_attempts: u32,
}

impl<'a> DedupGate<'a> {
    pub fn new(store: &'a dyn FingerprintStore, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Classify `identity` against the stored record
    pub async fn classify(&self, identity: &FileIdentity) -> Result<Decision, StoreError> {
        let record = self.store.get(identity).await?;
        Ok(decide(record, self.max_attempts))
    }
}

/// Pure gate policy
pub fn decide(record: Option<ImportRecord>, max_attempts: u32) -> Decision {
    match record {
        None => Decision::New(None),
        Some(record) if record.is_terminal(max_attempts) => Decision::Skip(record),
        Some(record) => Decision::New(Some(record)),
    }
}
