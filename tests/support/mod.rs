#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use querycache::{
    AggregateMax, CacheBackendError, CacheConfig, CacheStore, CachedEntry, ExecutorError,
    FieldKind, FieldMeta, MemoryDatabase, MemoryStore, ModelMeta, ModelRegistry, QueryCache,
    QueryExecutor, Row, RowSet,
};
use serde_json::json;

pub fn randomness_model() -> ModelMeta {
    ModelMeta::new("tests", "ModelOfRandomness", "tests_modelofrandomness")
        .field(FieldMeta::new("id", FieldKind::Integer))
        .field(FieldMeta::new("category", FieldKind::Text))
        .field(FieldMeta::new("some_text", FieldKind::Text))
        .field(FieldMeta::new("some_number", FieldKind::Integer))
        .field(FieldMeta::new("last_updated", FieldKind::Timestamp).auto_now())
}

pub fn untimed_model() -> ModelMeta {
    ModelMeta::new("tests", "Untimed", "tests_untimed")
        .field(FieldMeta::new("id", FieldKind::Integer))
        .field(FieldMeta::new("label", FieldKind::Text))
}

pub fn dated_model() -> ModelMeta {
    ModelMeta::new("tests", "Dated", "tests_dated")
        .field(FieldMeta::new("id", FieldKind::Integer))
        .field(FieldMeta::new("label", FieldKind::Text))
        .field(FieldMeta::new("day", FieldKind::Date).auto_now())
}

pub fn site_model() -> ModelMeta {
    ModelMeta::new("geo", "Site", "geo_site")
        .field(FieldMeta::new("id", FieldKind::Integer))
        .field(FieldMeta::new("name", FieldKind::Text))
        .field(FieldMeta::new("feature", FieldKind::Geometry))
        .field(FieldMeta::new("updated", FieldKind::Timestamp).auto_now())
}

/// Executor wrapper that counts calls and can fail filtered aggregates.
pub struct CountingExecutor {
    inner: Arc<MemoryDatabase>,
    fetches: AtomicUsize,
    aggregates: AtomicUsize,
    fail_filtered: AtomicBool,
}

impl CountingExecutor {
    pub fn new(inner: Arc<MemoryDatabase>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            aggregates: AtomicUsize::new(0),
            fail_filtered: AtomicBool::new(false),
        }
    }

    pub fn fail_filtered_aggregates(&self, fail: bool) {
        self.fail_filtered.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn aggregates(&self) -> usize {
        self.aggregates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn fetch_rows(&self, rowset: &RowSet) -> Result<Vec<Row>, ExecutorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_rows(rowset).await
    }

    async fn aggregate_max(
        &self,
        rowset: &RowSet,
        column: &str,
    ) -> Result<AggregateMax, ExecutorError> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        if self.fail_filtered.load(Ordering::SeqCst) && !rowset.query().filters().is_empty() {
            return Err(ExecutorError::Timeout);
        }
        self.inner.aggregate_max(rowset, column).await
    }
}

/// Store wrapper that counts writes.
pub struct CountingStore {
    inner: MemoryStore,
    sets: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(&CacheConfig::default()),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheBackendError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        entry: CachedEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, entry, ttl).await
    }
}

/// A store whose backend is down.
pub struct UnavailableStore;

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<CachedEntry>, CacheBackendError> {
        Err(CacheBackendError::unavailable("connection refused"))
    }

    async fn set(
        &self,
        _key: &str,
        _entry: CachedEntry,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        Err(CacheBackendError::unavailable("connection refused"))
    }
}

pub struct Fixture {
    pub db: Arc<MemoryDatabase>,
    pub executor: Arc<CountingExecutor>,
    pub store: Arc<CountingStore>,
    pub model: Arc<ModelMeta>,
    pub untimed: Arc<ModelMeta>,
    pub dated: Arc<ModelMeta>,
    pub sites: Arc<ModelMeta>,
    pub cache: QueryCache,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let mut registry = ModelRegistry::new();
        let model = registry.register(randomness_model());
        let untimed = registry.register(untimed_model());
        let dated = registry.register(dated_model());
        let sites = registry.register(site_model());

        let db = Arc::new(MemoryDatabase::new());
        let executor = Arc::new(CountingExecutor::new(Arc::clone(&db)));
        let store = Arc::new(CountingStore::new());
        let cache = QueryCache::new(
            Arc::new(registry),
            executor.clone(),
            store.clone(),
            config,
        );

        Self {
            db,
            executor,
            store,
            model,
            untimed,
            dated,
            sites,
            cache,
        }
    }

    /// Insert `count` rows alternating between categories `A` and `B`.
    pub fn seed(&self, count: i64) {
        for idx in 0..count {
            let category = if idx % 2 == 0 { "A" } else { "B" };
            self.db.insert(
                &self.model,
                Row::new()
                    .with("category", category)
                    .with("some_text", format!("text {idx}"))
                    .with("some_number", idx * 7),
            );
        }
    }

    pub fn seed_sites(&self) {
        for (name, lon, lat) in [("north", 10.0, 60.0), ("south", 10.0, -40.0)] {
            self.db.insert(
                &self.sites,
                Row::new().with("name", name).with(
                    "feature",
                    json!({ "type": "Point", "coordinates": [lon, lat] }),
                ),
            );
        }
    }
}

/// Ensure `auto_now` stamps differ between consecutive writes.
pub fn tick() {
    std::thread::sleep(Duration::from_millis(2));
}
