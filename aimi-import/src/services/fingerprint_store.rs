//! Fingerprint Store
//!
//! Durable mapping from [`FileIdentity`] to [`ImportRecord`]. The store is the
//! only component that mutates records and the only synchronisation point
//! between concurrent importer runs: `put_if_absent` must be atomic across
//! every caller, and `update` must apply its transition to the record as it is
//! stored at that moment (compare-and-swap).
//!
//! [`crate::db::imports::SqliteStore`] is the production backend;
//! [`MemoryStore`] backs tests.

use crate::models::{FileIdentity, ImportRecord, ImportStatus, Transition, TransitionError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Fingerprint store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence layer failed; nothing was written
    #[error("Store backend error: {0}")]
    Backend(#[from] aimi_common::Error),

    /// `update` on an identity with no record
    #[error("No record for {0}")]
    NotFound(FileIdentity),

    /// The record changed between read and write
    #[error("Concurrent modification of {0}")]
    Conflict(FileIdentity),

    /// The requested transition is not allowed from the stored state
    #[error("Rejected transition: {0}")]
    Transition(#[from] TransitionError),

    /// Stored row cannot be decoded
    #[error("Corrupt record {identity}: {reason}")]
    Corrupt { identity: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(aimi_common::Error::Database(err))
    }
}

impl StoreError {
    /// True for failures of the persistence layer itself (as opposed to
    /// state-machine refusals, which are expected under concurrency)
    pub fn is_backend(&self) -> bool {
        matches!(self, StoreError::Backend(_) | StoreError::Corrupt { .. })
    }
}

/// Durable record of every file identity the importer has seen
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Fetch the record for `identity`
    async fn get(&self, identity: &FileIdentity) -> Result<Option<ImportRecord>, StoreError>;

    /// Insert `record` unless its identity is already present
    ///
    /// Returns `true` if this call inserted the record. Durable on return.
    async fn put_if_absent(&self, record: &ImportRecord) -> Result<bool, StoreError>;

    /// Apply `transition` to the stored record and persist the result
    ///
    /// Fails with [`StoreError::Conflict`] if another writer changed the record
    /// concurrently and with [`StoreError::Transition`] if the stored state does
    /// not allow the transition. Returns the record as written.
    async fn update(
        &self,
        identity: &FileIdentity,
        transition: Transition,
    ) -> Result<ImportRecord, StoreError>;

    async fn exists(&self, identity: &FileIdentity) -> Result<bool, StoreError> {
        Ok(self.get(identity).await?.is_some())
    }

    /// Every `Resolved` record (library duplicate linking)
    async fn resolved(&self) -> Result<Vec<ImportRecord>, StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory store
///
/// Atomic within one process; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<FileIdentity, ImportRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, ordered by identity
    pub async fn records(&self) -> Vec<ImportRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Replace a record wholesale (test setup for crash scenarios)
    pub async fn insert_raw(&self, record: ImportRecord) {
        self.records
            .lock()
            .await
            .insert(record.identity.clone(), record);
    }
}

#[async_trait]
impl FingerprintStore for MemoryStore {
    async fn get(&self, identity: &FileIdentity) -> Result<Option<ImportRecord>, StoreError> {
        Ok(self.records.lock().await.get(identity).cloned())
    }

    async fn put_if_absent(&self, record: &ImportRecord) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.identity) {
            return Ok(false);
        }
        records.insert(record.identity.clone(), record.clone());
        Ok(true)
    }

    async fn update(
        &self,
        identity: &FileIdentity,
        transition: Transition,
    ) -> Result<ImportRecord, StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;

        let mut next = stored.clone();
        next.apply(transition)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn resolved(&self) -> Result<Vec<ImportRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.status == ImportStatus::Resolved)
            .cloned()
            .collect())
    }
}
