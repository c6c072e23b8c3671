//! SQLite lifecycle and queries for the response cache.

use crate::error::CacheError;
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{CacheEntry, Fingerprint};

/// Open the cache file, creating it and its parent directory if needed
pub(super) async fn open(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::Cache(CacheError::OpenFailed(format!(
                "Failed to create cache directory: {}",
                e
            )))
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| {
            Error::Cache(CacheError::OpenFailed(format!(
                "Failed to parse cache path: {}",
                e
            )))
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePool::connect_with(options).await.map_err(|e| {
        Error::Cache(CacheError::OpenFailed(format!(
            "Failed to open cache database: {}",
            e
        )))
    })?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Open a single-connection in-memory database
pub(super) async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
        Error::Cache(CacheError::OpenFailed(format!(
            "Failed to build in-memory options: {}",
            e
        )))
    })?;

    // Every in-memory connection is its own database, so keep exactly one
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| {
            Error::Cache(CacheError::OpenFailed(format!(
                "Failed to open in-memory cache: {}",
                e
            )))
        })?;

    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS responses (
            fingerprint TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            stored_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        Error::Cache(CacheError::SchemaFailed(format!(
            "Failed to create responses table: {}",
            e
        )))
    })?;

    Ok(())
}

/// Fetch one entry
pub(super) async fn get(pool: &SqlitePool, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
    let row: Option<(String, i64)> = sqlx::query_as(
        r#"
        SELECT payload, stored_at FROM responses WHERE fingerprint = ?
        "#,
    )
    .bind(fingerprint.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        Error::Cache(CacheError::QueryFailed(format!(
            "Failed to read cache entry: {}",
            e
        )))
    })?;

    let Some((payload, stored_at)) = row else {
        return Ok(None);
    };

    let payload: Value = serde_json::from_str(&payload).map_err(|e| {
        Error::Cache(CacheError::Corrupt {
            fingerprint: fingerprint.to_string(),
            reason: e.to_string(),
        })
    })?;

    Ok(Some(CacheEntry {
        fingerprint: fingerprint.clone(),
        payload,
        stored_at: Utc
            .timestamp_opt(stored_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }))
}

/// Store an entry unless one already exists.
///
/// The losing writer of a race for the same fingerprint is a no-op.
pub(super) async fn insert(pool: &SqlitePool, fingerprint: &Fingerprint, payload: &Value) -> Result<()> {
    write(
        pool,
        r#"
        INSERT OR IGNORE INTO responses (fingerprint, payload, stored_at)
        VALUES (?, ?, ?)
        "#,
        fingerprint,
        payload,
    )
    .await
}

/// Store an entry, overwriting any existing one
pub(super) async fn replace(pool: &SqlitePool, fingerprint: &Fingerprint, payload: &Value) -> Result<()> {
    write(
        pool,
        r#"
        INSERT OR REPLACE INTO responses (fingerprint, payload, stored_at)
        VALUES (?, ?, ?)
        "#,
        fingerprint,
        payload,
    )
    .await
}

async fn write(
    pool: &SqlitePool,
    sql: &str,
    fingerprint: &Fingerprint,
    payload: &Value,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(sql)
        .bind(fingerprint.as_str())
        .bind(payload.to_string())
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| {
            Error::Cache(CacheError::QueryFailed(format!(
                "Failed to write cache entry: {}",
                e
            )))
        })?;

    Ok(())
}

/// Number of stored entries
pub(super) async fn count(pool: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses")
        .fetch_one(pool)
        .await
        .map_err(|e| {
            Error::Cache(CacheError::QueryFailed(format!(
                "Failed to count cache entries: {}",
                e
            )))
        })?;

    Ok(count as u64)
}
