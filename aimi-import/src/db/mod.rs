//! SQLite persistence for the fingerprint store

pub mod imports;

pub use imports::SqliteStore;

use aimi_common::Result;
use sqlx::SqlitePool;

/// Create the `imports` table and its indexes if they don't exist
///
/// Column set mirrors [`crate::models::ImportRecord`]; timestamps are Unix ms.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imports (
            identity TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'bulk_skipped', 'resolved', 'failed')),
            original_name TEXT NOT NULL,
            source_path TEXT NOT NULL,
            title TEXT,
            artist TEXT,
            artists TEXT,
            album TEXT,
            year INTEGER,
            storage_path TEXT,
            last_error TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            first_seen_at INTEGER NOT NULL,
            last_attempt_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_imports_status ON imports(status)")
        .execute(pool)
        .await?;

    tracing::debug!("Database tables initialized (imports)");

    Ok(())
}
