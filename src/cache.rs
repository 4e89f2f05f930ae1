//! Result memoization for read queries.
//!
//! [`CachedReader`] sits in front of the executor and consults a
//! [`Memoizer`] keyed by a digest of the SQL text, the params and any
//! role/warehouse override. Failures are never stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::connection::Overrides;
use crate::db::{Params, QueryResult};
use crate::error::Result;
use crate::query::{ExecuteOptions, QueryExecutor};

/// Stable identity of a query: SHA-256 hex over SQL text and params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl QueryKey {
    /// Hashes `sql` and the canonical JSON form of `params`.
    pub fn new(sql: &str, params: &Params) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.canonical_json().as_bytes());
        Self(hex(&hasher.finalize()))
    }

    /// Key for a read under `overrides`. Without overrides this equals
    /// [`QueryKey::new`].
    pub fn scoped(sql: &str, params: &Params, overrides: &Overrides) -> Self {
        let base = Self::new(sql, params);
        if overrides.is_empty() {
            return base;
        }
        let mut hasher = Sha256::new();
        hasher.update(base.0.as_bytes());
        hasher.update(b"\0role=");
        hasher.update(overrides.role.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0warehouse=");
        hasher.update(overrides.warehouse.as_deref().unwrap_or("").as_bytes());
        Self(hex(&hasher.finalize()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Storage for memoized query results.
#[async_trait]
pub trait Memoizer: Send + Sync {
    /// Returns the stored result if present and not expired.
    async fn get(&self, key: &QueryKey) -> Option<QueryResult>;

    /// Stores `result`. `None` ttl keeps it until invalidated.
    async fn put(&self, key: QueryKey, result: QueryResult, ttl: Option<Duration>);

    /// Removes one entry.
    async fn invalidate(&self, key: &QueryKey);

    /// Removes every entry.
    async fn clear(&self);
}

#[derive(Debug, Clone)]
struct MemoEntry {
    result: QueryResult,
    expires_at: Option<Instant>,
}

impl MemoEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local memo with per-entry expiry and no size bound.
#[derive(Debug, Default)]
pub struct InMemoryMemo {
    entries: RwLock<HashMap<QueryKey, MemoEntry>>,
}

impl InMemoryMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Memoizer for InMemoryMemo {
    async fn get(&self, key: &QueryKey) -> Option<QueryResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => return Some(entry.result.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the map does not grow with dead entries.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_fresh(now)) {
            entries.remove(key);
        }
        None
    }

    async fn put(&self, key: QueryKey, result: QueryResult, ttl: Option<Duration>) {
        let entry = MemoEntry {
            result,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key, entry);
    }

    async fn invalidate(&self, key: &QueryKey) {
        self.entries.write().await.remove(key);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Options for [`CachedReader::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// How long a result stays fresh; `None` means until invalidated.
    pub ttl: Option<Duration>,
    /// Role/warehouse overrides for the underlying execute.
    pub overrides: Overrides,
}

impl ReadOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// Memoizing front for read queries.
#[derive(Clone)]
pub struct CachedReader {
    executor: QueryExecutor,
    memo: Arc<dyn Memoizer>,
}

impl CachedReader {
    pub fn new(executor: QueryExecutor, memo: Arc<dyn Memoizer>) -> Self {
        Self { executor, memo }
    }

    /// The memo backing this reader.
    pub fn memo(&self) -> &Arc<dyn Memoizer> {
        &self.memo
    }

    /// Returns a fresh memoized result or executes and stores one.
    pub async fn read(
        &self,
        sql: &str,
        params: &Params,
        options: &ReadOptions,
    ) -> Result<QueryResult> {
        let key = QueryKey::scoped(sql, params, &options.overrides);

        if let Some(hit) = self.memo.get(&key).await {
            debug!(query = key.short(), "Memo hit");
            return Ok(hit);
        }

        debug!(query = key.short(), "Memo miss");
        let result = self
            .executor
            .execute_with(
                sql,
                params,
                &ExecuteOptions::with_overrides(options.overrides.clone()),
            )
            .await?;
        self.memo.put(key, result.clone(), options.ttl).await;
        Ok(result)
    }

    /// Forgets the memoized result for one query.
    pub async fn invalidate(&self, sql: &str, params: &Params, overrides: &Overrides) {
        self.memo
            .invalidate(&QueryKey::scoped(sql, params, overrides))
            .await;
    }
}
