use std::sync::Arc;

use crate::cache::{CacheConfig, CacheStore};
use crate::error::QueryCacheError;
use crate::executor::QueryExecutor;
use crate::fingerprint::{
    FingerprintOptions, Fingerprinting, ModelTimestampFingerprint, TimestampFingerprint,
    TimestampOptions,
};
use crate::http::ConditionalHeaders;
use crate::model::{ModelRegistry, QueryTarget, RowSet};
use crate::queryset::{
    CachedQuerySet, CachedQuerySetOptions, GeoJsonCachedQuerySet, GeoJsonSerializer,
};

/// Shared handles for building fingerprints and cached querysets.
///
/// Holds the model registry used to resolve query targets, the executor,
/// the cache store and the configured defaults.
#[derive(Clone)]
pub struct QueryCache {
    registry: Arc<ModelRegistry>,
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl QueryCache {
    pub fn new(
        registry: Arc<ModelRegistry>,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn resolve(&self, target: impl Into<QueryTarget>) -> Result<RowSet, QueryCacheError> {
        self.registry.resolve(&target.into())
    }

    /// Content fingerprint using the configured defaults.
    pub fn fingerprint(
        &self,
        target: impl Into<QueryTarget>,
    ) -> Result<Fingerprinting, QueryCacheError> {
        self.fingerprint_with(target, self.config.fingerprint_options())
    }

    pub fn fingerprint_with(
        &self,
        target: impl Into<QueryTarget>,
        options: FingerprintOptions,
    ) -> Result<Fingerprinting, QueryCacheError> {
        Fingerprinting::new(self.resolve(target)?, Arc::clone(&self.executor), options)
    }

    /// Timestamp fingerprint on the model's `auto_now` column.
    pub fn timestamp_fingerprint(
        &self,
        target: impl Into<QueryTarget>,
    ) -> Result<TimestampFingerprint, QueryCacheError> {
        self.timestamp_fingerprint_with(target, self.config.timestamp_options())
    }

    pub fn timestamp_fingerprint_with(
        &self,
        target: impl Into<QueryTarget>,
        options: TimestampOptions,
    ) -> Result<TimestampFingerprint, QueryCacheError> {
        TimestampFingerprint::new(self.resolve(target)?, Arc::clone(&self.executor), options)
    }

    pub fn model_timestamp_fingerprint(
        &self,
        target: impl Into<QueryTarget>,
    ) -> Result<ModelTimestampFingerprint, QueryCacheError> {
        ModelTimestampFingerprint::new(
            self.resolve(target)?,
            Arc::clone(&self.executor),
            self.config.timestamp_options(),
        )
    }

    /// Cached queryset with a default content fingerprint.
    pub fn queryset(
        &self,
        target: impl Into<QueryTarget>,
    ) -> Result<CachedQuerySet, QueryCacheError> {
        self.queryset_with(target, CachedQuerySetOptions::default())
    }

    pub fn queryset_with(
        &self,
        target: impl Into<QueryTarget>,
        options: CachedQuerySetOptions,
    ) -> Result<CachedQuerySet, QueryCacheError> {
        CachedQuerySet::new(
            self.resolve(target)?,
            Arc::clone(&self.executor),
            Arc::clone(&self.store),
            self.apply_defaults(options),
        )
    }

    pub fn geojson(
        &self,
        target: impl Into<QueryTarget>,
        serializer: GeoJsonSerializer,
        options: CachedQuerySetOptions,
    ) -> Result<GeoJsonCachedQuerySet, QueryCacheError> {
        CachedQuerySet::geojson(
            self.resolve(target)?,
            Arc::clone(&self.executor),
            Arc::clone(&self.store),
            serializer,
            self.apply_defaults(options),
        )
    }

    /// `ETag` and `Last-Modified` for `target`.
    pub async fn conditional_headers(
        &self,
        target: impl Into<QueryTarget>,
        hashfields: &[String],
    ) -> Result<ConditionalHeaders, QueryCacheError> {
        let rowset = self.resolve(target)?;
        ConditionalHeaders::for_rowset(&rowset, Arc::clone(&self.executor), hashfields).await
    }

    fn apply_defaults(&self, mut options: CachedQuerySetOptions) -> CachedQuerySetOptions {
        if options.fingerprint.is_none() {
            let defaults = self.config.fingerprint_options();
            options.fingerprint_options.long_hash |= defaults.long_hash;
            if options.fingerprint_options.expiry.is_zero() {
                options.fingerprint_options.expiry = defaults.expiry;
            }
        }
        if options.ttl.is_none() {
            options.ttl = self.config.default_ttl();
        }
        options
    }
}
