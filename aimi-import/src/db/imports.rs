//! SQLite-backed fingerprint store

use crate::models::{FileIdentity, ImportRecord, ImportStatus, TrackMetadata, Transition};
use crate::services::fingerprint_store::{FingerprintStore, StoreError};
use aimi_common::db::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// Maximum time spent retrying a write while SQLite reports a lock
const MAX_LOCK_WAIT_MS: u64 = 5000;

const SELECT_COLUMNS: &str = "SELECT identity, status, original_name, source_path, title, artist, \
     artists, album, year, storage_path, last_error, attempt_count, first_seen_at, \
     last_attempt_at FROM imports";

/// One `imports` row
#[derive(Debug, Clone, sqlx::FromRow)]
struct ImportRow {
    identity: String,
    status: String,
    original_name: String,
    source_path: String,
    title: Option<String>,
    artist: Option<String>,
    artists: Option<String>,
    album: Option<String>,
    year: Option<i64>,
    storage_path: Option<String>,
    last_error: Option<String>,
    attempt_count: i64,
    first_seen_at: i64,
    last_attempt_at: i64,
}

impl ImportRow {
    fn from_record(record: &ImportRecord) -> Self {
        let meta = record.metadata.as_ref();
        Self {
            identity: record.identity.to_string(),
            status: record.status.as_str().to_string(),
            original_name: record.original_name.clone(),
            source_path: record.source_path.to_string_lossy().to_string(),
            title: meta.map(|m| m.title.clone()),
            artist: meta.map(|m| m.artist.clone()),
            artists: meta.and_then(|m| serde_json::to_string(&m.artists).ok()),
            album: meta.and_then(|m| m.album.clone()),
            year: meta.and_then(|m| m.year).map(i64::from),
            storage_path: record
                .storage_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            last_error: record.last_error.clone(),
            attempt_count: i64::from(record.attempt_count),
            first_seen_at: record.first_seen_at.timestamp_millis(),
            last_attempt_at: record.last_attempt_at.timestamp_millis(),
        }
    }

    fn into_record(self) -> Result<ImportRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            identity: self.identity.clone(),
            reason,
        };

        let identity: FileIdentity = self.identity.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let status: ImportStatus = self.status.parse().map_err(corrupt)?;

        let metadata = match (status, &self.title, &self.artist) {
            (ImportStatus::Resolved, Some(title), Some(artist)) => {
                let artists = match &self.artists {
                    Some(json) => serde_json::from_str(json)
                        .map_err(|e| corrupt(format!("artists column: {}", e)))?,
                    None => vec![artist.clone()],
                };
                Some(TrackMetadata {
                    title: title.clone(),
                    artist: artist.clone(),
                    artists,
                    album: self.album.clone(),
                    year: self.year.and_then(|y| u32::try_from(y).ok()),
                })
            }
            (ImportStatus::Resolved, _, _) => {
                return Err(corrupt("resolved record without title/artist".to_string()))
            }
            _ => None,
        };

        Ok(ImportRecord {
            identity,
            status,
            original_name: self.original_name,
            source_path: PathBuf::from(self.source_path),
            metadata,
            storage_path: self.storage_path.map(PathBuf::from),
            last_error: self.last_error,
            attempt_count: u32::try_from(self.attempt_count).unwrap_or(0),
            first_seen_at: millis_to_datetime(self.first_seen_at),
            last_attempt_at: millis_to_datetime(self.last_attempt_at),
        })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Make `term` match literally inside a `LIKE ... ESCAPE '\'` pattern
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Fingerprint store persisted in the `imports` table
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let pool = aimi_common::db::init_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(db: SqlitePool) -> Result<Self, StoreError> {
        crate::db::init_tables(&db).await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // ------------------------------------------------------------------------
    // Operator queries
    // ------------------------------------------------------------------------

    /// All records, optionally filtered by status, oldest first
    pub async fn list(&self, status: Option<ImportStatus>) -> Result<Vec<ImportRecord>, StoreError> {
        let rows: Vec<ImportRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "{} WHERE status = ? ORDER BY first_seen_at, identity",
                    SELECT_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{} ORDER BY first_seen_at, identity", SELECT_COLUMNS))
                    .fetch_all(&self.db)
                    .await?
            }
        };

        rows.into_iter().map(ImportRow::into_record).collect()
    }

    /// Records whose artist, title or original file name contains `term`
    pub async fn search(&self, term: &str) -> Result<Vec<ImportRecord>, StoreError> {
        let pattern = format!("%{}%", escape_like(term));
        let rows: Vec<ImportRow> = sqlx::query_as(&format!(
            "{} WHERE artist LIKE ?1 ESCAPE '\\' OR title LIKE ?1 ESCAPE '\\' \
             OR original_name LIKE ?1 ESCAPE '\\' \
             ORDER BY first_seen_at, identity",
            SELECT_COLUMNS
        ))
        .bind(&pattern)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ImportRow::into_record).collect()
    }

    /// Remove one record so the file is processed again on the next run
    pub async fn delete(&self, identity: &FileIdentity) -> Result<bool, StoreError> {
        let affected = retry_on_lock("imports delete", MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query("DELETE FROM imports WHERE identity = ?")
                .bind(identity.as_str())
                .execute(&self.db)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    /// Remove every bulk-import record
    pub async fn purge_bulk(&self) -> Result<u64, StoreError> {
        let affected = retry_on_lock("imports purge bulk", MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query("DELETE FROM imports WHERE status = ?")
                .bind(ImportStatus::BulkSkipped.as_str())
                .execute(&self.db)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        tracing::info!(deleted = affected, "Purged bulk import records");
        Ok(affected)
    }

    /// Record count per status (statuses with no records are omitted)
    pub async fn count_by_status(&self) -> Result<Vec<(ImportStatus, i64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM imports GROUP BY status ORDER BY status")
                .fetch_all(&self.db)
                .await?;

        rows.into_iter()
            .map(|(status, count)| {
                status
                    .parse::<ImportStatus>()
                    .map(|s| (s, count))
                    .map_err(|reason| StoreError::Corrupt {
                        identity: "*".to_string(),
                        reason,
                    })
            })
            .collect()
    }
}

#[async_trait]
impl FingerprintStore for SqliteStore {
    async fn get(&self, identity: &FileIdentity) -> Result<Option<ImportRecord>, StoreError> {
        let row: Option<ImportRow> =
            sqlx::query_as(&format!("{} WHERE identity = ?", SELECT_COLUMNS))
                .bind(identity.as_str())
                .fetch_optional(&self.db)
                .await?;

        row.map(ImportRow::into_record).transpose()
    }

    async fn put_if_absent(&self, record: &ImportRecord) -> Result<bool, StoreError> {
        let row = ImportRow::from_record(record);

        let affected = retry_on_lock("imports put_if_absent", MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO imports (
                    identity, status, original_name, source_path, title, artist, artists,
                    album, year, storage_path, last_error, attempt_count, first_seen_at,
                    last_attempt_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(identity) DO NOTHING
                "#,
            )
            .bind(&row.identity)
            .bind(&row.status)
            .bind(&row.original_name)
            .bind(&row.source_path)
            .bind(&row.title)
            .bind(&row.artist)
            .bind(&row.artists)
            .bind(&row.album)
            .bind(row.year)
            .bind(&row.storage_path)
            .bind(&row.last_error)
            .bind(row.attempt_count)
            .bind(row.first_seen_at)
            .bind(row.last_attempt_at)
            .execute(&self.db)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    async fn update(
        &self,
        identity: &FileIdentity,
        transition: Transition,
    ) -> Result<ImportRecord, StoreError> {
        let current = self
            .get(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        let expected = ImportRow::from_record(&current);

        let mut next = current;
        next.apply(transition)?;
        let row = ImportRow::from_record(&next);

        // Compare-and-swap on the columns every transition changes
        let affected = retry_on_lock("imports update", MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                r#"
                UPDATE imports
                SET status = ?,
                    title = ?,
                    artist = ?,
                    artists = ?,
                    album = ?,
                    year = ?,
                    storage_path = ?,
                    last_error = ?,
                    attempt_count = ?,
                    last_attempt_at = ?
                WHERE identity = ?
                  AND status = ?
                  AND attempt_count = ?
                  AND last_attempt_at = ?
                "#,
            )
            .bind(&row.status)
            .bind(&row.title)
            .bind(&row.artist)
            .bind(&row.artists)
            .bind(&row.album)
            .bind(row.year)
            .bind(&row.storage_path)
            .bind(&row.last_error)
            .bind(row.attempt_count)
            .bind(row.last_attempt_at)
            .bind(&expected.identity)
            .bind(&expected.status)
            .bind(expected.attempt_count)
            .bind(expected.last_attempt_at)
            .execute(&self.db)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            tracing::debug!(identity = %identity.short(), "Update lost compare-and-swap race");
            return Err(StoreError::Conflict(identity.clone()));
        }

        row.into_record()
    }

    async fn resolved(&self) -> Result<Vec<ImportRecord>, StoreError> {
        self.list(Some(ImportStatus::Resolved)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn memory_store() -> SqliteStore {
        let pool = aimi_common::db::init_memory_pool().await.unwrap();
        SqliteStore::from_pool(pool).await.unwrap()
    }

    fn pending(seed: &[u8]) -> ImportRecord {
        ImportRecord::pending(
            FileIdentity::of_bytes(seed),
            Path::new("/downloads/Artist - Song.opus"),
            Utc::now(),
        )
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let store = memory_store().await;
        for name in ["100% Pure.mp3", "1000 Pure.mp3", "a_b.mp3", "axb.mp3"] {
            let record = ImportRecord::pending(
                FileIdentity::of_bytes(name.as_bytes()),
                &Path::new("/downloads").join(name),
                Utc::now(),
            );
            store.put_if_absent(&record).await.unwrap();
        }

        let names = |records: Vec<ImportRecord>| {
            records
                .into_iter()
                .map(|r| r.original_name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(store.search("100%").await.unwrap()), vec!["100% Pure.mp3"]);
        assert_eq!(names(store.search("a_b").await.unwrap()), vec!["a_b.mp3"]);
        assert_eq!(store.search("pure").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_put_if_absent_and_get() {
        let store = memory_store().await;
        let record = pending(b"one");

        assert!(store.put_if_absent(&record).await.unwrap());
        assert!(!store.put_if_absent(&record).await.unwrap());

        let stored = store.get(&record.identity).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Pending);
        assert_eq!(stored.original_name, "Artist - Song.opus");
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(
            stored.last_attempt_at.timestamp_millis(),
            record.last_attempt_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_resolve_persists_metadata() {
        let store = memory_store().await;
        let record = pending(b"two");
        store.put_if_absent(&record).await.unwrap();

        let mut metadata = TrackMetadata::new("SubSoul", "Do It To It");
        metadata.artists = vec!["SubSoul".into(), "ACRAZE".into(), "Cherish".into()];
        metadata.year = Some(2021);

        store
            .update(
                &record.identity,
                Transition::Resolve {
                    metadata: metadata.clone(),
                    storage_path: PathBuf::from("/music/SubSoul/Do It To It.opus"),
                    now: Utc::now(),
                },
            )
            .await
            .unwrap();

        let stored = store.get(&record.identity).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Resolved);
        assert_eq!(stored.metadata, Some(metadata));
        assert_eq!(
            stored.storage_path,
            Some(PathBuf::from("/music/SubSoul/Do It To It.opus"))
        );
        assert_eq!(store.resolved().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_record_rejects_updates() {
        let store = memory_store().await;
        let record = pending(b"three");
        store.put_if_absent(&record).await.unwrap();
        store
            .update(
                &record.identity,
                Transition::Resolve {
                    metadata: TrackMetadata::new("A", "B"),
                    storage_path: PathBuf::from("/music/A/B.mp3"),
                    now: Utc::now(),
                },
            )
            .await
            .unwrap();

        let result = store
            .update(
                &record.identity,
                Transition::Claim {
                    now: Utc::now(),
                    lease: Duration::seconds(0),
                    max_attempts: 5,
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Transition(_))));
    }

    #[tokio::test]
    async fn test_update_applies_to_current_row_state() {
        let store = memory_store().await;
        let record = pending(b"four");
        store.put_if_absent(&record).await.unwrap();

        // Another writer moves the row on behind our back
        sqlx::query("UPDATE imports SET attempt_count = 7 WHERE identity = ?")
            .bind(record.identity.as_str())
            .execute(store.pool())
            .await
            .unwrap();

        let current = store.get(&record.identity).await.unwrap().unwrap();
        assert_eq!(current.attempt_count, 7);

        // The transition is applied to the row as stored, not a cached copy
        store
            .update(
                &record.identity,
                Transition::Fail {
                    error: "boom".into(),
                    now: Utc::now(),
                },
            )
            .await
            .unwrap();

        let stored = store.get(&record.identity).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_operator_queries() {
        let store = memory_store().await;
        let bulk = ImportRecord::bulk_skipped(
            FileIdentity::of_bytes(b"bulk"),
            Path::new("/old/library/track.flac"),
            Utc::now(),
        );
        let active = pending(b"active");
        store.put_if_absent(&bulk).await.unwrap();
        store.put_if_absent(&active).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        assert_eq!(
            store.list(Some(ImportStatus::BulkSkipped)).await.unwrap().len(),
            1
        );
        assert_eq!(store.search("Song").await.unwrap().len(), 1);

        let counts = store.count_by_status().await.unwrap();
        assert!(counts.contains(&(ImportStatus::BulkSkipped, 1)));
        assert!(counts.contains(&(ImportStatus::Pending, 1)));

        assert_eq!(store.purge_bulk().await.unwrap(), 1);
        assert!(!store.exists(&bulk.identity).await.unwrap());

        assert!(store.delete(&active.identity).await.unwrap());
        assert!(!store.delete(&active.identity).await.unwrap());
        assert!(store.list(None).await.unwrap().is_empty());
    }
}
