//! Configuration layer: typed settings with layered precedence (file → environment).

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File, Map};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const LOCAL_CONFIG_BASENAME: &str = "querycache";
const ENV_PREFIX: &str = "QUERYCACHE";
const DEFAULT_STORE_CAPACITY: u64 = 1000;
const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub store_capacity: NonZeroUsize,
    /// `None` keeps entries until evicted.
    pub ttl: Option<Duration>,
    pub fingerprint_expiry: Duration,
    pub timestamp_expiry: Duration,
    pub long_hash: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from `querycache.toml` (if present), then `config_file`, then
/// `QUERYCACHE__*` environment variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    load_with_env(config_file, None)
}

fn load_with_env(
    config_file: Option<&Path>,
    env: Option<Map<String, String>>,
) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(env),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;
        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            cache: CacheSettings {
                store_capacity: NonZeroUsize::new(DEFAULT_STORE_CAPACITY as usize)
                    .unwrap_or(NonZeroUsize::MIN),
                ttl: Some(Duration::from_secs(DEFAULT_TTL_SECS)),
                fingerprint_expiry: Duration::ZERO,
                timestamp_expiry: Duration::ZERO,
                long_hash: false,
            },
        }
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.store_capacity.unwrap_or(DEFAULT_STORE_CAPACITY);
    let capacity: usize = capacity.try_into().map_err(|_| {
        LoadError::invalid(
            "cache.store_capacity",
            "value exceeds supported range for usize",
        )
    })?;
    let store_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.store_capacity", "must be greater than zero"))?;

    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECS);
    if ttl_seconds > MAX_TTL_SECS {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            format!("must be at most {MAX_TTL_SECS} (100 years)"),
        ));
    }
    let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));

    Ok(CacheSettings {
        store_capacity,
        ttl,
        fingerprint_expiry: Duration::from_millis(cache.fingerprint_expiry_ms.unwrap_or(0)),
        timestamp_expiry: Duration::from_millis(cache.timestamp_expiry_ms.unwrap_or(0)),
        long_hash: cache.long_hash.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    store_capacity: Option<u64>,
    ttl_seconds: Option<u64>,
    fingerprint_expiry_ms: Option<u64>,
    timestamp_expiry_ms: Option<u64>,
    long_hash: Option<bool>,
}

#[cfg(test)]
mod tests;
