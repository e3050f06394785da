//! Fingerprinting strategies.
//!
//! A fingerprint is a short hex digest summarising the current contents of a
//! row-set. Two strategies ship with the crate:
//!
//! - [`Fingerprinting`]: hashes every row (or a subset of columns)
//! - [`TimestampFingerprint`]: hashes `count(*)` and `max(<auto_now column>)`,
//!   with [`ModelTimestampFingerprint`] adding a table-level shortcut
//!
//! Strategies remember the last fingerprint they produced. Within their expiry
//! window that fingerprint is reused without touching the database.

mod content;
mod timestamp;

pub use content::{FingerprintOptions, Fingerprinting};
pub use timestamp::{ModelTimestampFingerprint, TimestampFingerprint, TimestampOptions};

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::lock::mutex_lock;
use crate::error::QueryCacheError;

/// Length of the default digest.
pub const SHORT_DIGEST_LEN: usize = 8;
/// Length of the digest when `long_hash` is enabled.
pub const LONG_DIGEST_LEN: usize = 32;

const SOURCE: &str = "fingerprint";

/// A digest of a row-set's contents and when it was computed.
///
/// Two fingerprints are equal when their digests are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

impl Fingerprint {
    pub fn new(digest: String) -> Self {
        Self {
            digest,
            computed_at: OffsetDateTime::now_utc(),
        }
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Fingerprint {}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Hex-encode a finished hasher, truncated to the configured digest length.
pub(crate) fn finish_digest(hasher: Sha256, long_hash: bool) -> String {
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(if long_hash {
        LONG_DIGEST_LEN
    } else {
        SHORT_DIGEST_LEN
    });
    encoded
}

/// Identifies a strategy in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Content,
    Timestamp,
    ModelTimestamp,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Content => "content",
            StrategyKind::Timestamp => "timestamp",
            StrategyKind::ModelTimestamp => "model_timestamp",
        }
    }
}

struct MemoEntry {
    fingerprint: Fingerprint,
    checked_at: Instant,
}

/// The last fingerprint a strategy produced and when it was checked.
#[derive(Default)]
pub struct FingerprintMemo {
    last: Mutex<Option<MemoEntry>>,
}

impl FingerprintMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remembered fingerprint if it was checked less than `expiry` ago.
    pub fn fresh(&self, expiry: Duration) -> Option<Fingerprint> {
        if expiry.is_zero() {
            return None;
        }
        mutex_lock(&self.last, SOURCE, "memo.fresh")
            .as_ref()
            .filter(|entry| entry.checked_at.elapsed() < expiry)
            .map(|entry| entry.fingerprint.clone())
    }

    pub fn last(&self) -> Option<Fingerprint> {
        mutex_lock(&self.last, SOURCE, "memo.last")
            .as_ref()
            .map(|entry| entry.fingerprint.clone())
    }

    pub fn record(&self, fingerprint: Fingerprint) {
        *mutex_lock(&self.last, SOURCE, "memo.record") = Some(MemoEntry {
            fingerprint,
            checked_at: Instant::now(),
        });
    }

    pub fn clear(&self) {
        *mutex_lock(&self.last, SOURCE, "memo.clear") = None;
    }
}

/// A way of computing a row-set's fingerprint.
#[async_trait]
pub trait FingerprintStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Key naming this strategy's row-set in logs.
    fn memo_key(&self) -> &str;

    fn memo(&self) -> &FingerprintMemo;

    /// How long a remembered fingerprint is trusted. Zero means always recompute.
    fn expiry(&self) -> Duration;

    /// Compute the fingerprint from the database, ignoring any memo.
    async fn query_fingerprint(&self) -> Result<Fingerprint, QueryCacheError>;

    /// The current fingerprint, reusing the memo while it is fresh.
    async fn current(&self) -> Result<Fingerprint, QueryCacheError> {
        if let Some(fingerprint) = self.memo().fresh(self.expiry()) {
            debug!(
                key = self.memo_key(),
                strategy = self.kind().as_str(),
                "reusing fresh fingerprint"
            );
            return Ok(fingerprint);
        }
        let fingerprint = self.query_fingerprint().await?;
        self.memo().record(fingerprint.clone());
        Ok(fingerprint)
    }

    /// Whether the row-set changed since the last check.
    ///
    /// Returns false without querying while the memo is fresh, unless
    /// `force_check` is set. A strategy with no memo always reports true.
    async fn update_required(&self, force_check: bool) -> Result<bool, QueryCacheError> {
        let key = self.memo_key();
        if !force_check && self.memo().fresh(self.expiry()).is_some() {
            debug!(key, "fingerprint checked recently, skipping");
            return Ok(false);
        }
        let previous = self.memo().last();
        let current = self.query_fingerprint().await?;
        self.memo().record(current.clone());
        match previous {
            Some(previous) if previous == current => {
                debug!(key, fingerprint = %current, "fingerprint has not changed");
                Ok(false)
            }
            previous => {
                debug!(
                    key,
                    from = previous.as_ref().map(|fp| fp.digest.as_str()).unwrap_or("none"),
                    to = %current,
                    "fingerprint has changed"
                );
                Ok(true)
            }
        }
    }
}
