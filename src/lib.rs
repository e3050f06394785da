//! Fingerprint-validated caching of serialized database query results.
//!
//! A query's rows are summarised by a short [`Fingerprint`]. A
//! [`CachedQuerySet`] stores its serialized payload next to the fingerprint it
//! was built under and only re-runs the query when the fingerprint changes.
//!
//! ```no_run
//! # async fn demo() -> Result<(), querycache::QueryCacheError> {
//! use std::sync::Arc;
//!
//! use querycache::{
//!     CacheConfig, FieldKind, FieldMeta, MemoryDatabase, MemoryStore, ModelMeta,
//!     ModelRegistry, QueryCache,
//! };
//!
//! let mut registry = ModelRegistry::new();
//! let sites = registry.register(
//!     ModelMeta::new("geo", "Site", "geo_site")
//!         .field(FieldMeta::new("id", FieldKind::Integer))
//!         .field(FieldMeta::new("name", FieldKind::Text))
//!         .field(FieldMeta::new("updated", FieldKind::Timestamp).auto_now()),
//! );
//! let config = CacheConfig::default();
//! let cache = QueryCache::new(
//!     Arc::new(registry),
//!     Arc::new(MemoryDatabase::new()),
//!     Arc::new(MemoryStore::new(&config)),
//!     config,
//! );
//!
//! let payload = cache.queryset(sites)?.get().await?;
//! # let _ = payload;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod http;
pub mod model;
pub mod query;
pub mod queryset;
mod service;
pub mod telemetry;
pub mod value;

pub use cache::{CacheConfig, CacheStore, CachedEntry, DummyStore, MemoryStore, PgCacheStore};
pub use error::{CacheBackendError, QueryCacheError};
pub use executor::{AggregateMax, ExecutorError, MemoryDatabase, PgExecutor, QueryExecutor};
pub use fingerprint::{
    Fingerprint, FingerprintOptions, FingerprintStrategy, Fingerprinting,
    ModelTimestampFingerprint, TimestampFingerprint, TimestampOptions,
};
pub use http::ConditionalHeaders;
pub use model::{FieldKind, FieldMeta, ModelMeta, ModelRegistry, QueryTarget, RowSet};
pub use query::{Op, Query};
pub use queryset::{
    CacheOutcome, CachedQuerySet, CachedQuerySetOptions, GeoJsonCachedQuerySet,
    GeoJsonSerializer, RowSerializer, ValuesSerializer,
};
pub use service::QueryCache;
pub use value::{Row, Value};
