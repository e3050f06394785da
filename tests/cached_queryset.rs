mod support;

use std::sync::Arc;
use std::time::Duration;

use querycache::{
    CacheBackendError, CacheConfig, CacheOutcome, CachedQuerySet, CachedQuerySetOptions,
    DummyStore, FingerprintStrategy, Query, QueryCacheError, Row,
};
use serde_json::json;
use support::{Fixture, UnavailableStore, tick};

#[tokio::test]
async fn first_get_fills_then_hits() {
    let fx = Fixture::new();
    fx.seed(4);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");

    let first = qs.get().await.expect("payload");
    assert_eq!(first.as_array().map(Vec::len), Some(4));
    assert_eq!(fx.store.sets(), 1);

    let second = qs.get().await.expect("payload");
    assert_eq!(first, second);
    assert_eq!(fx.store.sets(), 1);
}

#[tokio::test]
async fn changes_refresh_the_payload() {
    let fx = Fixture::new();
    fx.seed(4);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");
    qs.get().await.expect("payload");

    fx.db
        .update(&fx.model, 1, Row::new().with("some_text", "fresh"));
    assert_eq!(
        qs.update_if_required().await.expect("refresh"),
        CacheOutcome::Stale
    );
    assert_eq!(fx.store.sets(), 2);

    let payload = qs.get_with_update().await.expect("payload");
    assert_eq!(payload[0]["some_text"], "fresh");
    assert_eq!(fx.store.sets(), 2);
}

#[tokio::test]
async fn outcomes_follow_the_state_machine() {
    let fx = Fixture::new();
    fx.seed(2);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");

    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Miss);
    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Hit);
    fx.db.delete(&fx.model, 2);
    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Stale);
    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Hit);
}

#[tokio::test]
async fn querysets_on_the_same_query_share_entries() {
    let fx = Fixture::new();
    fx.seed(3);
    let query = Query::all(fx.model.clone()).filter("category", "A");

    let first = fx.cache.queryset(query.clone()).expect("queryset");
    let second = fx.cache.queryset(query).expect("queryset");
    assert_eq!(first.cache_key(), second.cache_key());

    first.get().await.expect("payload");
    second.get().await.expect("payload");
    assert_eq!(fx.store.sets(), 1);
}

#[tokio::test]
async fn query_values_restrict_the_payload() {
    let fx = Fixture::new();
    fx.seed(2);
    let qs = fx
        .cache
        .queryset_with(
            Query::all(fx.model.clone()).order_by("id"),
            CachedQuerySetOptions::default().query_values(["id", "category"]),
        )
        .expect("queryset");

    let payload = qs.get().await.expect("payload");
    assert_eq!(
        payload,
        json!([{ "id": 1, "category": "A" }, { "id": 2, "category": "B" }])
    );
}

#[tokio::test]
async fn unknown_query_value_is_a_resolution_error() {
    let fx = Fixture::new();
    let err = fx
        .cache
        .queryset_with(
            fx.model.clone(),
            CachedQuerySetOptions::default().query_values(["colour"]),
        )
        .err()
        .expect("resolution error");
    assert!(matches!(err, QueryCacheError::Resolution { .. }));
}

#[tokio::test]
async fn custom_cache_key_is_used() {
    let fx = Fixture::new();
    fx.seed(1);
    let qs = fx
        .cache
        .queryset_with(
            fx.model.clone(),
            CachedQuerySetOptions::default().cache_key("randomness"),
        )
        .expect("queryset");
    assert_eq!(qs.cache_key(), "randomness");

    qs.get().await.expect("payload");
    let entry = fx
        .cache
        .store()
        .get("randomness")
        .await
        .expect("store get")
        .expect("entry");
    assert_eq!(entry.payload.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn timestamp_strategy_avoids_row_scans_on_hits() {
    let fx = Fixture::new();
    fx.seed(5);
    let strategy = Arc::new(
        fx.cache
            .timestamp_fingerprint(fx.model.clone())
            .expect("timestamp fingerprint"),
    );
    let qs = fx
        .cache
        .queryset_with(
            fx.model.clone(),
            CachedQuerySetOptions::default().fingerprint(strategy),
        )
        .expect("queryset");
    assert_eq!(qs.fingerprint().kind().as_str(), "timestamp");

    qs.get().await.expect("payload");
    assert_eq!(fx.executor.fetches(), 1);
    qs.get().await.expect("payload");
    qs.get().await.expect("payload");
    assert_eq!(fx.executor.fetches(), 1);
    assert_eq!(fx.executor.aggregates(), 3);

    tick();
    fx.db.touch(&fx.model, 3);
    qs.get().await.expect("payload");
    assert_eq!(fx.executor.fetches(), 2);
}

#[tokio::test]
async fn fingerprint_expiry_serves_stale_payload_within_window() {
    let fx = Fixture::with_config(CacheConfig {
        fingerprint_expiry_ms: 60_000,
        ..Default::default()
    });
    fx.seed(2);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");

    let first = qs.get().await.expect("payload");
    fx.db
        .update(&fx.model, 1, Row::new().with("some_text", "later"));
    assert_eq!(qs.get().await.expect("payload"), first);
}

#[tokio::test]
async fn dummy_store_always_recomputes() {
    let fx = Fixture::new();
    fx.seed(2);
    let rowset = fx.cache.resolve(fx.model.clone()).expect("rowset");
    let qs = CachedQuerySet::new(
        rowset,
        fx.executor.clone(),
        Arc::new(DummyStore),
        CachedQuerySetOptions::default(),
    )
    .expect("queryset");

    qs.get().await.expect("payload");
    qs.get().await.expect("payload");
    // One fingerprint scan plus one fetch per call.
    assert_eq!(fx.executor.fetches(), 4);
    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Miss);
}

#[tokio::test]
async fn store_errors_propagate() {
    let fx = Fixture::new();
    fx.seed(1);
    let rowset = fx.cache.resolve(fx.model.clone()).expect("rowset");
    let qs = CachedQuerySet::new(
        rowset,
        fx.executor.clone(),
        Arc::new(UnavailableStore),
        CachedQuerySetOptions::default(),
    )
    .expect("queryset");

    let err = qs.get().await.unwrap_err();
    assert!(matches!(
        err,
        QueryCacheError::Backend(CacheBackendError::Unavailable(_))
    ));
}

#[tokio::test]
async fn serialized_bypasses_the_cache() {
    let fx = Fixture::new();
    fx.seed(3);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");

    let payload = qs.serialized().await.expect("payload");
    assert_eq!(payload.as_array().map(Vec::len), Some(3));
    assert_eq!(fx.store.sets(), 0);
}

#[tokio::test]
async fn ttl_expiry_forces_a_refill() {
    let fx = Fixture::new();
    fx.seed(1);
    let qs = fx
        .cache
        .queryset_with(
            fx.model.clone(),
            CachedQuerySetOptions::default().ttl(Duration::ZERO),
        )
        .expect("queryset");

    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Miss);
    assert_eq!(qs.update_if_required().await.expect("check"), CacheOutcome::Miss);
    assert_eq!(fx.store.sets(), 2);
}

#[tokio::test]
async fn timestamp_values_render_as_rfc3339() {
    let fx = Fixture::new();
    fx.seed(1);
    let qs = fx.cache.queryset(fx.model.clone()).expect("queryset");
    let payload = qs.get().await.expect("payload");
    let stamp = payload[0]["last_updated"].as_str().expect("timestamp string");
    assert!(stamp.ends_with('Z'));
}
