//! Cached query results.
//!
//! A [`CachedQuerySet`] pairs a row-set with a fingerprint strategy and a cache
//! store. Each [`get`](CachedQuerySet::get) computes the current fingerprint and
//! returns the stored payload when it was built under the same fingerprint;
//! otherwise the query runs again and the new payload replaces the old one.
//!
//! There is no locking around the check-and-refresh sequence. Concurrent
//! callers on a cold key may each rebuild the payload; the last write wins.

mod geojson;
mod serialize;

pub use geojson::{DEFAULT_GEOMETRY_FIELD, GeoJsonSerializer, validate_geometry};
pub use serialize::{RowSerializer, ValuesSerializer};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, instrument};

use crate::cache::{CacheStore, CachedEntry, query_to_key};
use crate::error::QueryCacheError;
use crate::executor::QueryExecutor;
use crate::fingerprint::{Fingerprint, FingerprintOptions, FingerprintStrategy, Fingerprinting};
use crate::model::RowSet;

const METRIC_HIT: &str = "querycache_hit_total";
const METRIC_MISS: &str = "querycache_miss_total";
const METRIC_SERIALIZE_MS: &str = "querycache_serialize_ms";

/// A cached query whose payload is a GeoJSON `FeatureCollection`.
pub type GeoJsonCachedQuerySet = CachedQuerySet<GeoJsonSerializer>;

/// What a cache check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The stored payload matched the current fingerprint.
    Hit,
    /// Nothing was stored under the key.
    Miss,
    /// A payload was stored under an older fingerprint.
    Stale,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Stale => "stale",
        }
    }

    pub fn refreshed(self) -> bool {
        !matches!(self, CacheOutcome::Hit)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction options for [`CachedQuerySet`].
#[derive(Clone, Default)]
pub struct CachedQuerySetOptions {
    /// Restrict the payload to these columns.
    pub query_values: Vec<String>,
    /// Use this key instead of one derived from the query.
    pub cache_key: Option<String>,
    /// Entry lifetime handed to the store. `None` uses the store's default.
    pub ttl: Option<Duration>,
    /// Strategy to use. Defaults to a content fingerprint over the same rows.
    pub fingerprint: Option<Arc<dyn FingerprintStrategy>>,
    /// Options for the default content fingerprint.
    pub fingerprint_options: FingerprintOptions,
}

impl fmt::Debug for CachedQuerySetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedQuerySetOptions")
            .field("query_values", &self.query_values)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field(
                "fingerprint",
                &self.fingerprint.as_ref().map(|fp| fp.kind().as_str()),
            )
            .field("fingerprint_options", &self.fingerprint_options)
            .finish()
    }
}

impl CachedQuerySetOptions {
    pub fn query_values<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_values = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn fingerprint(mut self, strategy: Arc<dyn FingerprintStrategy>) -> Self {
        self.fingerprint = Some(strategy);
        self
    }
}

/// Serves a query's serialized rows, rebuilding them only when the
/// fingerprint changes.
pub struct CachedQuerySet<S = ValuesSerializer> {
    rowset: RowSet,
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn CacheStore>,
    fingerprint: Arc<dyn FingerprintStrategy>,
    serializer: S,
    key: String,
    ttl: Option<Duration>,
}

impl CachedQuerySet<ValuesSerializer> {
    pub fn new(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn CacheStore>,
        options: CachedQuerySetOptions,
    ) -> Result<Self, QueryCacheError> {
        Self::with_serializer(rowset, executor, store, ValuesSerializer, options)
    }
}

impl<S: RowSerializer> CachedQuerySet<S> {
    pub fn with_serializer(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn CacheStore>,
        serializer: S,
        options: CachedQuerySetOptions,
    ) -> Result<Self, QueryCacheError> {
        let rowset = if options.query_values.is_empty() {
            rowset
        } else {
            rowset.values(&options.query_values)?
        };
        let key = options
            .cache_key
            .unwrap_or_else(|| query_to_key(rowset.query(), &serializer.key_suffix()));
        let fingerprint = match options.fingerprint {
            Some(strategy) => strategy,
            None => Arc::new(Fingerprinting::new(
                rowset.clone(),
                Arc::clone(&executor),
                options.fingerprint_options,
            )?),
        };
        debug!(
            cache_key = %key,
            strategy = fingerprint.kind().as_str(),
            serializer = serializer.name(),
            "created cached queryset"
        );

        Ok(Self {
            rowset,
            executor,
            store,
            fingerprint,
            serializer,
            key,
            ttl: options.ttl,
        })
    }

    pub fn cache_key(&self) -> &str {
        &self.key
    }

    pub fn rowset(&self) -> &RowSet {
        &self.rowset
    }

    pub fn fingerprint(&self) -> &Arc<dyn FingerprintStrategy> {
        &self.fingerprint
    }

    /// The payload for the current state of the rows.
    pub async fn get(&self) -> Result<Json, QueryCacheError> {
        self.check().await.map(|(payload, _)| payload)
    }

    /// Alias of [`get`](Self::get).
    pub async fn get_with_update(&self) -> Result<Json, QueryCacheError> {
        self.get().await
    }

    /// Refresh the stored payload if the rows changed, without returning it.
    pub async fn update_if_required(&self) -> Result<CacheOutcome, QueryCacheError> {
        self.check().await.map(|(_, outcome)| outcome)
    }

    /// Run the query and serialize the rows, bypassing the cache.
    #[instrument(skip(self), fields(cache_key = %self.key))]
    pub async fn serialized(&self) -> Result<Json, QueryCacheError> {
        let rows = self.executor.fetch_rows(&self.rowset).await?;
        let started = Instant::now();
        let payload = self.serializer.serialize(&rows)?;
        let elapsed = started.elapsed();
        histogram!(METRIC_SERIALIZE_MS, "serializer" => self.serializer.name())
            .record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            rows = rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "serialized rows"
        );
        Ok(payload)
    }

    #[instrument(skip(self), fields(cache_key = %self.key))]
    async fn check(&self) -> Result<(Json, CacheOutcome), QueryCacheError> {
        let started = Instant::now();
        let current = self.fingerprint.current().await?;

        let outcome = match self.store.get(&self.key).await? {
            Some(entry) if entry.fingerprint == current => {
                counter!(METRIC_HIT).increment(1);
                debug!(
                    fingerprint = %current,
                    outcome = CacheOutcome::Hit.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cache hit"
                );
                return Ok((entry.payload, CacheOutcome::Hit));
            }
            Some(entry) => {
                debug!(from = %entry.fingerprint, to = %current, "stored fingerprint is stale");
                CacheOutcome::Stale
            }
            None => CacheOutcome::Miss,
        };

        counter!(METRIC_MISS, "outcome" => outcome.as_str()).increment(1);
        let payload = self.refresh(current).await?;
        info!(
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache refreshed"
        );
        Ok((payload, outcome))
    }

    async fn refresh(&self, fingerprint: Fingerprint) -> Result<Json, QueryCacheError> {
        let payload = self.serialized().await?;
        self.store
            .set(&self.key, CachedEntry::new(fingerprint, payload.clone()), self.ttl)
            .await?;
        Ok(payload)
    }
}

impl CachedQuerySet<GeoJsonSerializer> {
    pub fn geojson(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn CacheStore>,
        serializer: GeoJsonSerializer,
        options: CachedQuerySetOptions,
    ) -> Result<Self, QueryCacheError> {
        Self::with_serializer(rowset, executor, store, serializer, options)
    }

    /// Alias of [`get`](Self::get) for feature collections.
    pub async fn features(&self) -> Result<Json, QueryCacheError> {
        self.get().await
    }
}
