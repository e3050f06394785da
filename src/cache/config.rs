//! Cache configuration.
//!
//! Runtime defaults for stores and fingerprint strategies. Built from the
//! validated [`CacheSettings`](crate::config::CacheSettings) that
//! [`config::load`](crate::config::load) reads, or constructed directly.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::fingerprint::{FingerprintOptions, TimestampOptions};

const DEFAULT_STORE_CAPACITY: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_FINGERPRINT_EXPIRY_MS: u64 = 0;
const DEFAULT_TIMESTAMP_EXPIRY_MS: u64 = 0;

/// Cache defaults shared by a [`QueryCache`](crate::QueryCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries held by the in-memory store.
    pub store_capacity: usize,
    /// Entry lifetime handed to the store; zero disables expiry.
    pub default_ttl_secs: u64,
    /// How long a content fingerprint is trusted before recomputing (ms).
    pub fingerprint_expiry_ms: u64,
    /// How long a timestamp fingerprint is trusted before recomputing (ms).
    pub timestamp_expiry_ms: u64,
    /// Emit 32-character digests instead of 8.
    pub long_hash: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_capacity: DEFAULT_STORE_CAPACITY,
            default_ttl_secs: DEFAULT_TTL_SECS,
            fingerprint_expiry_ms: DEFAULT_FINGERPRINT_EXPIRY_MS,
            timestamp_expiry_ms: DEFAULT_TIMESTAMP_EXPIRY_MS,
            long_hash: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            store_capacity: settings.store_capacity.get(),
            default_ttl_secs: settings.ttl.map(|ttl| ttl.as_secs()).unwrap_or(0),
            fingerprint_expiry_ms: settings.fingerprint_expiry.as_millis() as u64,
            timestamp_expiry_ms: settings.timestamp_expiry.as_millis() as u64,
            long_hash: settings.long_hash,
        }
    }
}

impl CacheConfig {
    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    pub fn fingerprint_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            long_hash: self.long_hash,
            expiry: Duration::from_millis(self.fingerprint_expiry_ms),
            ..Default::default()
        }
    }

    pub fn timestamp_options(&self) -> TimestampOptions {
        TimestampOptions {
            long_hash: self.long_hash,
            expiry: Duration::from_millis(self.timestamp_expiry_ms),
            ..Default::default()
        }
    }
}
