//! Cache stores and key derivation.
//!
//! A [`CacheStore`] holds one [`CachedEntry`] per cache key. Three stores ship with
//! the crate:
//!
//! - [`MemoryStore`]: in-process LRU with per-entry TTL
//! - [`PgCacheStore`]: a `querycache_entries` table shared between processes
//! - [`DummyStore`]: keeps nothing, so every lookup recomputes
//!
//! ## Configuration
//!
//! [`config::load`](crate::config::load) reads the `[cache]` section;
//! `CacheConfig::from(&settings.cache)` turns it into store defaults.
//!
//! ```toml
//! [cache]
//! store_capacity = 1000
//! ttl_seconds = 604800
//! fingerprint_expiry_ms = 0
//! ```

mod config;
pub mod keys;
pub(crate) mod lock;
mod postgres;
mod store;

pub use config::CacheConfig;
pub use keys::{hash_prefix, query_to_key};
pub use postgres::PgCacheStore;
pub use store::{CacheStore, CachedEntry, DummyStore, MemoryStore};
