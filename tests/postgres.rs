//! Live tests against a Postgres database.
//!
//! - Marked `#[ignore]`; run with `DATABASE_URL` set and `cargo test -- --ignored`.
//! - Each test creates its own table and drops it afterwards.

use std::sync::Arc;

use querycache::{
    CacheConfig, CacheOutcome, CacheStore, FieldKind, FieldMeta, FingerprintStrategy, ModelMeta,
    ModelRegistry, PgCacheStore, PgExecutor, Query, QueryCache,
};
use sqlx::PgPool;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

async fn connect() -> TestResult<PgPool> {
    let url = std::env::var("DATABASE_URL")?;
    let pool = PgPool::connect(&url).await?;
    PgCacheStore::run_migrations(&pool).await?;
    Ok(pool)
}

async fn create_table(pool: &PgPool, table: &str) -> TestResult<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool)
        .await?;
    sqlx::query(&format!(
        "CREATE TABLE {table} (\
            id BIGSERIAL PRIMARY KEY, \
            category TEXT NOT NULL, \
            score BIGINT NOT NULL, \
            last_updated TIMESTAMPTZ NOT NULL DEFAULT now())"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "INSERT INTO {table} (category, score) VALUES ('A', 1), ('B', 2), ('A', 3)"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

fn model(table: &str) -> ModelMeta {
    ModelMeta::new("live", "Scored", table)
        .field(FieldMeta::new("id", FieldKind::Integer))
        .field(FieldMeta::new("category", FieldKind::Text))
        .field(FieldMeta::new("score", FieldKind::Integer))
        .field(FieldMeta::new("last_updated", FieldKind::Timestamp).auto_now())
}

fn query_cache(pool: &PgPool, registry: ModelRegistry) -> QueryCache {
    QueryCache::new(
        Arc::new(registry),
        Arc::new(PgExecutor::new(pool.clone())),
        Arc::new(PgCacheStore::new(pool.clone())),
        CacheConfig::default(),
    )
}

#[tokio::test]
#[ignore]
async fn live_cached_queryset_round_trip() -> TestResult<()> {
    let pool = connect().await?;
    let table = format!("querycache_live_{}", std::process::id());
    create_table(&pool, &table).await?;

    let mut registry = ModelRegistry::new();
    let scored = registry.register(model(&table));
    let cache = query_cache(&pool, registry);

    let qs = cache.queryset_with(
        Query::all(scored.clone()).filter("category", "A").order_by("id"),
        querycache::CachedQuerySetOptions::default().cache_key(format!("{table}_a")),
    )?;
    assert_eq!(qs.update_if_required().await?, CacheOutcome::Miss);
    assert_eq!(qs.update_if_required().await?, CacheOutcome::Hit);

    let payload = qs.get().await?;
    assert_eq!(payload.as_array().map(Vec::len), Some(2));
    assert_eq!(payload[1]["score"], 3);

    sqlx::query(&format!(
        "UPDATE {table} SET score = 30, last_updated = now() WHERE id = 3"
    ))
    .execute(&pool)
    .await?;
    assert_eq!(qs.update_if_required().await?, CacheOutcome::Stale);
    assert_eq!(qs.get().await?[1]["score"], 30);

    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(&pool)
        .await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_timestamp_fingerprint_matches_memory_semantics() -> TestResult<()> {
    let pool = connect().await?;
    let table = format!("querycache_live_ts_{}", std::process::id());
    create_table(&pool, &table).await?;

    let mut registry = ModelRegistry::new();
    let scored = registry.register(model(&table));
    let cache = query_cache(&pool, registry);

    let ts = cache.timestamp_fingerprint(scored.clone())?;
    let first = ts.query_fingerprint().await?;
    assert_eq!(first, ts.query_fingerprint().await?);

    sqlx::query(&format!("DELETE FROM {table} WHERE id = 1"))
        .execute(&pool)
        .await?;
    assert_ne!(first, ts.query_fingerprint().await?);

    let content = cache.fingerprint(Query::all(scored).values(["id", "score"]))?;
    assert_eq!(content.query_fingerprint().await?.digest.len(), 8);

    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(&pool)
        .await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_store_purges_expired_entries() -> TestResult<()> {
    let pool = connect().await?;
    let store = PgCacheStore::new(pool.clone());
    let key = format!("querycache_live_purge_{}", std::process::id());

    store
        .set(
            &key,
            querycache::CachedEntry::new(
                querycache::Fingerprint::new("abcd1234".into()),
                serde_json::json!([]),
            ),
            Some(std::time::Duration::ZERO),
        )
        .await?;
    assert!(store.get(&key).await?.is_none());
    assert!(store.purge_expired().await? >= 1);
    Ok(())
}
