//! Schema for the SQLite store.
//!
//! Every statement is idempotent, so migrations run both from `wordchunk
//! init` and whenever a [`SqliteStore`](crate::store::sqlite::SqliteStore)
//! is opened.

use sqlx::SqlitePool;

use crate::error::{Error, Result};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk record; `words_json` holds the [{word, cnt}] array.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            instance_id TEXT,
            chunk_index INTEGER NOT NULL,
            chunk_capacity INTEGER NOT NULL,
            words_json TEXT NOT NULL,
            imported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(Error::StoreUnavailable)?;

    // Aggregated collections. Pipeline output fills `total_int`,
    // map-reduce output fills `total_real`.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregated_results (
            collection TEXT NOT NULL,
            word TEXT NOT NULL,
            total_int INTEGER,
            total_real REAL,
            PRIMARY KEY (collection, word)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(Error::StoreUnavailable)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_records_stream \
         ON chunk_records(collection, source, instance_id, chunk_index)",
    )
    .execute(pool)
    .await
    .map_err(Error::StoreUnavailable)?;

    Ok(())
}
