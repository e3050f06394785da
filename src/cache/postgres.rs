//! Durable cache store backed by a Postgres table.
//!
//! Entries are shared by every process pointed at the same database. Expired rows are
//! ignored on read and overwritten on the next write; `purge_expired` reclaims them.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPool, query, query_scalar, types::Json as SqlJson};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::CacheBackendError;

use super::store::{CacheStore, CachedEntry};

#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    /// Delete rows whose TTL has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheBackendError> {
        let result = query("DELETE FROM querycache_entries WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(map_store_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheBackendError> {
        let entry: Option<SqlJson<CachedEntry>> = query_scalar(
            "SELECT entry FROM querycache_entries \
             WHERE cache_key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_store_error)?;
        Ok(entry.map(|SqlJson(entry)| entry))
    }

    async fn set(
        &self,
        key: &str,
        entry: CachedEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        // A lifetime past the representable range is stored as no expiry.
        let expires_at = ttl
            .and_then(|ttl| time::Duration::try_from(ttl).ok())
            .and_then(|ttl| OffsetDateTime::now_utc().checked_add(ttl));
        let stored_at = entry.stored_at;

        query(
            "INSERT INTO querycache_entries (cache_key, entry, stored_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (cache_key) DO UPDATE \
             SET entry = EXCLUDED.entry, stored_at = EXCLUDED.stored_at, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(SqlJson(entry))
        .bind(stored_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_store_error)?;

        debug!(cache_key = key, "stored cache entry");
        Ok(())
    }
}

fn map_store_error(err: sqlx::Error) -> CacheBackendError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CacheBackendError::unavailable(err)
        }
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => CacheBackendError::codec(err),
        other => CacheBackendError::backend(other),
    }
}
