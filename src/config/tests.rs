use std::io::Write;

use super::*;

fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    )
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_any_source() {
    let settings = load_with_env(None, env(&[])).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.cache.store_capacity.get(), 1000);
    assert_eq!(settings.cache.ttl, Some(Duration::from_secs(604_800)));
    assert_eq!(settings.cache.fingerprint_expiry, Duration::ZERO);
    assert_eq!(settings.cache.timestamp_expiry, Duration::ZERO);
    assert!(!settings.cache.long_hash);
}

#[test]
fn file_values_are_applied() {
    let file = config_file(
        r#"
        [logging]
        level = "debug"
        json = true

        [cache]
        store_capacity = 10
        ttl_seconds = 0
        fingerprint_expiry_ms = 30000
        timestamp_expiry_ms = 100
        long_hash = true
        "#,
    );

    let settings = load_with_env(Some(file.path()), env(&[])).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.cache.store_capacity.get(), 10);
    assert_eq!(settings.cache.ttl, None);
    assert_eq!(settings.cache.fingerprint_expiry, Duration::from_secs(30));
    assert_eq!(settings.cache.timestamp_expiry, Duration::from_millis(100));
    assert!(settings.cache.long_hash);
}

#[test]
fn environment_overrides_file() {
    let file = config_file(
        r#"
        [cache]
        store_capacity = 10
        "#,
    );

    let settings = load_with_env(
        Some(file.path()),
        env(&[
            ("QUERYCACHE__CACHE__STORE_CAPACITY", "25"),
            ("QUERYCACHE__LOGGING__LEVEL", "warn"),
        ]),
    )
    .expect("valid settings");

    assert_eq!(settings.cache.store_capacity.get(), 25);
    assert_eq!(settings.logging.level, LevelFilter::WARN);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let err = load_with_env(
        Some(Path::new("/nonexistent/querycache.toml")),
        env(&[]),
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::Build(_)));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.store_capacity = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.store_capacity",
            ..
        }
    ));
}

#[test]
fn oversized_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(u64::MAX);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        }
    ));
}

#[test]
fn bad_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
}

#[test]
fn defaults_match_from_raw_defaults() {
    let loaded = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let default = Settings::default();
    assert_eq!(loaded.cache.store_capacity, default.cache.store_capacity);
    assert_eq!(loaded.cache.ttl, default.cache.ttl);
    assert_eq!(loaded.logging.level, default.logging.level);
}

#[test]
fn cache_config_follows_settings() {
    let mut raw = RawSettings::default();
    raw.cache.fingerprint_expiry_ms = Some(1500);
    raw.cache.ttl_seconds = Some(60);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let config = crate::cache::CacheConfig::from(&settings.cache);
    assert_eq!(config.fingerprint_expiry_ms, 1500);
    assert_eq!(config.default_ttl(), Some(Duration::from_secs(60)));
    assert_eq!(
        config.fingerprint_options().expiry,
        Duration::from_millis(1500)
    );
}
