//! Persistent response cache for catalog metadata.
//!
//! Responses are keyed by a [`Fingerprint`] of the outbound request and stored in
//! a small SQLite file. The cache is advisory: a stale entry can only yield stale
//! titles or artwork, never a different track identity. Entries are never expired
//! by the library; deleting the file is the only supported eviction.
//!
//! ## Submodules
//!
//! - [`store`] - SQLite lifecycle and queries

use crate::error::Result;
use crate::session::{ApiRequest, ApiResponse};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

mod store;


/// Stable hash of a request's method, endpoint, parameters and body
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an outbound request
    pub fn of(request: &ApiRequest) -> Self {
        let digest = Sha256::digest(request.canonical().as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// Request fingerprint
    pub fingerprint: Fingerprint,
    /// Raw JSON payload
    pub payload: Value,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
}

/// Hit/miss counters for one cache instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from the cache
    pub hits: u64,
    /// Requests that went to the network
    pub misses: u64,
}

type InflightMap = HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>;

/// Persistent key-value cache of successful catalog responses
///
/// Concurrent requests for the same fingerprint are collapsed: the first caller
/// fetches, later callers wait and then read the stored payload.
pub struct ResponseCache {
    pool: Option<SqlitePool>,
    inflight: std::sync::Mutex<InflightMap>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Open (or create) the cache file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = store::open(path).await?;
        Ok(Self::with_pool(Some(pool)))
    }

    /// Open a private in-memory cache that lives as long as this instance
    pub async fn open_in_memory() -> Result<Self> {
        let pool = store::open_in_memory().await?;
        Ok(Self::with_pool(Some(pool)))
    }

    /// A cache that stores nothing; every request goes to the network
    pub fn disabled() -> Self {
        Self::with_pool(None)
    }

    fn with_pool(pool: Option<SqlitePool>) -> Self {
        Self {
            pool,
            inflight: std::sync::Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether responses are persisted
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Look up a stored entry
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        match &self.pool {
            Some(pool) => store::get(pool, fingerprint).await,
            None => Ok(None),
        }
    }

    /// Number of stored entries
    pub async fn len(&self) -> Result<u64> {
        match &self.pool {
            Some(pool) => store::count(pool).await,
            None => Ok(0),
        }
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Hit/miss counters since this instance was opened
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the cached payload for `request`, or call `fetch` and store its result.
    ///
    /// Only 2xx responses are stored, so an authentication failure is always
    /// returned to the caller and re-checked on the next call. The cache is
    /// advisory: a database that cannot be read or written is logged and the
    /// fetched response is returned regardless.
    pub async fn get_or_fetch<F, Fut>(&self, request: &ApiRequest, fetch: F) -> Result<ApiResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse>>,
    {
        let Some(pool) = &self.pool else {
            return fetch().await;
        };
        let fingerprint = Fingerprint::of(request);

        if let Some(entry) = self.lookup(pool, &fingerprint).await {
            return Ok(self.hit(request, entry));
        }

        let key_lock = self.key_lock(&fingerprint);
        let _guard = key_lock.lock().await;

        // Another caller may have filled the entry while we waited for the key
        if let Some(entry) = self.lookup(pool, &fingerprint).await {
            self.release_key(&fingerprint);
            return Ok(self.hit(request, entry));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %request.endpoint, fingerprint = %fingerprint, "Cache miss");

        let response = fetch().await;
        if let Ok(resp) = &response
            && resp.is_success()
            && let Err(e) = store::insert(pool, &fingerprint, &resp.body).await
        {
            tracing::warn!(endpoint = %request.endpoint, error = %e, "Failed to store response in cache");
        }

        self.release_key(&fingerprint);
        response
    }

    /// Bypass any stored entry: fetch, and replace the entry on success.
    pub async fn refresh<F, Fut>(&self, request: &ApiRequest, fetch: F) -> Result<ApiResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse>>,
    {
        let response = fetch().await?;
        if let Some(pool) = &self.pool
            && response.is_success()
            && let Err(e) = store::replace(pool, &Fingerprint::of(request), &response.body).await
        {
            tracing::warn!(endpoint = %request.endpoint, error = %e, "Failed to refresh cached response");
        }
        Ok(response)
    }

    /// Stored entry for `fingerprint`; a read failure counts as a miss
    async fn lookup(&self, pool: &SqlitePool, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match store::get(pool, fingerprint).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache read failed, fetching");
                None
            }
        }
    }

    /// Flush and close the underlying database
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            let stats = self.stats();
            tracing::debug!(hits = stats.hits, misses = stats.misses, "Closing response cache");
            pool.close().await;
        }
    }

    fn hit(&self, request: &ApiRequest, entry: CacheEntry) -> ApiResponse {
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %request.endpoint, stored_at = %entry.stored_at, "Cache hit");
        ApiResponse {
            status: 200,
            body: entry.payload,
        }
    }

    fn key_lock(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key(&self, fingerprint: &Fingerprint) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.remove(fingerprint);
    }
}
