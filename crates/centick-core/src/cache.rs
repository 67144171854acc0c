//! Durable quote cache.
//!
//! A single SQLite file deduplicates backend calls within a TTL window and
//! survives process restarts. The wrapper never propagates storage errors:
//! reads degrade to a miss and writes are best-effort, so a broken cache
//! only costs extra fetches, never correctness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::clock::Clock;
use crate::{AssetClass, CacheError, Quote, QuoteSource, Symbol, UtcDateTime};

const TOP_ACCESSED_LIMIT: i64 = 5;

#[derive(Debug, Clone, FromRow)]
struct CacheRow {
    payload: String,
    expires_at: i64,
    hit_count: i64,
}

/// Hit-count leader row in [`CacheStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheKeyStats {
    pub cache_key: String,
    pub hit_count: u64,
    pub last_accessed: Option<UtcDateTime>,
}

/// Snapshot of cache health and usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_entries: u64,
    pub valid_entries: u64,
    pub expired_entries: u64,
    pub total_hits: u64,
    pub average_hits: f64,
    pub most_accessed: Vec<CacheKeyStats>,
    pub size_bytes: u64,
    pub ttl_seconds: u64,
}

/// SQLite-backed cache keyed by `(asset_class, symbol)`.
pub struct QuoteCache {
    pool: SqlitePool,
    db_path: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl QuoteCache {
    /// Open (or create) the cache file and ensure the schema exists.
    pub async fn open(
        db_path: impl Into<PathBuf>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quote_cache (
                cache_key     TEXT PRIMARY KEY,
                asset_class   TEXT NOT NULL,
                symbol        TEXT NOT NULL,
                payload       TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                expires_at    INTEGER NOT NULL,
                hit_count     INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quote_cache_asset_symbol \
             ON quote_cache(asset_class, symbol)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quote_cache_expires_at \
             ON quote_cache(expires_at)",
        )
        .execute(&pool)
        .await?;

        tracing::debug!(db = %db_path.display(), ttl_secs = ttl.as_secs(), "quote cache ready");

        Ok(Self {
            pool,
            db_path,
            ttl,
            clock,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Case-insensitive composite key: lowercased class, uppercased symbol.
    fn cache_key(asset_class: AssetClass, symbol: &Symbol) -> String {
        format!(
            "{}:{}",
            asset_class.as_str().to_ascii_lowercase(),
            symbol.as_str().to_ascii_uppercase()
        )
    }

    /// Look up a quote. An entry is valid strictly before its deadline; a
    /// read at exactly `expires_at` is a miss. Expired or undecodable rows
    /// are deleted inline so the next write starts clean.
    pub async fn get(&self, asset_class: AssetClass, symbol: &Symbol) -> Option<Quote> {
        match self.try_get(asset_class, symbol).await {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(
                    class = %asset_class,
                    %symbol,
                    %error,
                    "cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn try_get(
        &self,
        asset_class: AssetClass,
        symbol: &Symbol,
    ) -> Result<Option<Quote>, CacheError> {
        let key = Self::cache_key(asset_class, symbol);
        let now = self.clock.now().unix_timestamp();

        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT payload, expires_at, hit_count FROM quote_cache WHERE cache_key = ?",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if now >= row.expires_at {
            self.delete_key(&key).await?;
            return Ok(None);
        }

        let quote: Quote = match serde_json::from_str(&row.payload) {
            Ok(quote) => quote,
            Err(source) => {
                // Fail open: drop the bad row and let the caller refetch.
                self.delete_key(&key).await?;
                return Err(CacheError::Payload { key, source });
            }
        };

        sqlx::query(
            "UPDATE quote_cache SET hit_count = hit_count + 1, last_accessed = ? \
             WHERE cache_key = ?",
        )
        .bind(now)
        .bind(&key)
        .execute(&self.pool)
        .await?;

        tracing::debug!(cache_key = %key, hits = row.hit_count + 1, "cache hit");
        Ok(Some(quote.tagged(QuoteSource::Cache)))
    }

    /// Upsert a quote. Resets the hit count and restarts the TTL window.
    /// Storage errors are logged and reported as `false`; the caller
    /// proceeds as though the write never happened.
    pub async fn set(&self, asset_class: AssetClass, symbol: &Symbol, quote: &Quote) -> bool {
        match self.try_set(asset_class, symbol, quote).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(class = %asset_class, %symbol, %error, "cache write failed");
                false
            }
        }
    }

    async fn try_set(
        &self,
        asset_class: AssetClass,
        symbol: &Symbol,
        quote: &Quote,
    ) -> Result<(), CacheError> {
        let key = Self::cache_key(asset_class, symbol);
        let created_at = self.clock.now();
        let expires_at = created_at + self.ttl;
        let payload = serde_json::to_string(quote).map_err(|source| CacheError::Payload {
            key: key.clone(),
            source,
        })?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO quote_cache (
                cache_key, asset_class, symbol, payload,
                created_at, expires_at, hit_count, last_accessed
            ) VALUES (?, ?, ?, ?, ?, ?, 0, NULL)
            "#,
        )
        .bind(&key)
        .bind(asset_class.as_str())
        .bind(symbol.as_str().to_ascii_uppercase())
        .bind(&payload)
        .bind(created_at.unix_timestamp())
        .bind(expires_at.unix_timestamp())
        .execute(&self.pool)
        .await?;

        tracing::debug!(cache_key = %key, expires_at = %expires_at, "cached quote");
        Ok(())
    }

    /// Explicitly remove one entry. Returns whether a row was deleted.
    pub async fn invalidate(&self, asset_class: AssetClass, symbol: &Symbol) -> bool {
        let key = Self::cache_key(asset_class, symbol);
        match self.delete_key(&key).await {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(cache_key = %key, %error, "cache invalidation failed");
                false
            }
        }
    }

    async fn delete_key(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM quote_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sweep rows whose deadline has passed. Idempotent.
    pub async fn clear_expired(&self) -> u64 {
        let now = self.clock.now().unix_timestamp();
        match sqlx::query("DELETE FROM quote_cache WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            Ok(result) => {
                let removed = result.rows_affected();
                if removed > 0 {
                    tracing::info!(removed, "cleared expired cache entries");
                }
                removed
            }
            Err(error) => {
                tracing::warn!(%error, "cache sweep failed");
                0
            }
        }
    }

    pub async fn statistics(&self) -> Result<CacheStatistics, CacheError> {
        let now = self.clock.now().unix_timestamp();

        let (total_entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quote_cache")
            .fetch_one(&self.pool)
            .await?;
        let (expired_entries,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM quote_cache WHERE expires_at <= ?")
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
        let (total_hits,): (Option<i64>,) =
            sqlx::query_as("SELECT SUM(hit_count) FROM quote_cache")
                .fetch_one(&self.pool)
                .await?;

        let leaders: Vec<(String, i64, Option<i64>)> = sqlx::query_as(
            "SELECT cache_key, hit_count, last_accessed FROM quote_cache \
             WHERE expires_at > ? ORDER BY hit_count DESC, cache_key ASC LIMIT ?",
        )
        .bind(now)
        .bind(TOP_ACCESSED_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let total_hits = total_hits.unwrap_or(0).max(0) as u64;
        let total = total_entries.max(0) as u64;
        let average_hits = if total > 0 {
            total_hits as f64 / total as f64
        } else {
            0.0
        };

        let most_accessed = leaders
            .into_iter()
            .map(|(cache_key, hit_count, last_accessed)| CacheKeyStats {
                cache_key,
                hit_count: hit_count.max(0) as u64,
                last_accessed: last_accessed
                    .and_then(|ts| UtcDateTime::from_unix_timestamp(ts).ok()),
            })
            .collect();

        let size_bytes = std::fs::metadata(&self.db_path)
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(CacheStatistics {
            total_entries: total,
            valid_entries: total - expired_entries.max(0) as u64,
            expired_entries: expired_entries.max(0) as u64,
            total_hits,
            average_hits,
            most_accessed,
            size_bytes,
            ttl_seconds: self.ttl.as_secs(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Release the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
