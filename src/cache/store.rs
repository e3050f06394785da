//! Cache store contract and in-process implementations.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::CacheBackendError;
use crate::fingerprint::Fingerprint;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_STORE_EVICT: &str = "querycache_store_evict_total";

/// A serialized payload together with the fingerprint it was computed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub fingerprint: Fingerprint,
    pub payload: Json,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

impl CachedEntry {
    pub fn new(fingerprint: Fingerprint, payload: Json) -> Self {
        Self {
            fingerprint,
            payload,
            stored_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Key-value store holding [`CachedEntry`] values.
///
/// Expiry and eviction are the store's own business; callers only ever read
/// and overwrite entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheBackendError>;

    async fn set(
        &self,
        key: &str,
        entry: CachedEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError>;
}

struct StoredEntry {
    entry: CachedEntry,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process LRU store with per-entry TTL.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredEntry>>,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.store_capacity_non_zero())),
            default_ttl: config.default_ttl(),
        }
    }

    /// Number of entries currently held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheBackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => return Ok(None),
            Some(stored) if !stored.is_expired(Instant::now()) => {
                return Ok(Some(stored.entry.clone()));
            }
            Some(_) => {}
        }
        entries.pop(key);
        debug!(cache_key = key, "dropped expired entry");
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        entry: CachedEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        // A lifetime past the clock's range never expires.
        let expires_at = ttl
            .or(self.default_ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        let evicted = rw_write(&self.entries, SOURCE, "set")
            .push(key.to_string(), StoredEntry { entry, expires_at })
            .filter(|(evicted_key, _)| evicted_key != key);
        if let Some((evicted_key, _)) = evicted {
            counter!(METRIC_STORE_EVICT).increment(1);
            debug!(cache_key = key, evicted = %evicted_key, "store at capacity, evicted entry");
        }
        Ok(())
    }
}

/// A store that keeps nothing: every lookup misses and every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStore;

#[async_trait]
impl CacheStore for DummyStore {
    async fn get(&self, _key: &str) -> Result<Option<CachedEntry>, CacheBackendError> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _entry: CachedEntry,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        Ok(())
    }
}
