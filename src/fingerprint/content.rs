use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::cache::keys::{HASH_SUFFIX, query_to_key};
use crate::error::QueryCacheError;
use crate::executor::QueryExecutor;
use crate::model::RowSet;
use crate::value::Row;

use super::{Fingerprint, FingerprintMemo, FingerprintStrategy, StrategyKind, finish_digest};

const METRIC_FINGERPRINT_MS: &str = "querycache_fingerprint_ms";

/// Options for [`Fingerprinting`].
#[derive(Debug, Clone, Default)]
pub struct FingerprintOptions {
    /// Columns to hash. Empty means every field of the model.
    pub hashfields: Vec<String>,
    pub long_hash: bool,
    pub expiry: Duration,
    /// Overrides the derived memo key.
    pub cache_key: Option<String>,
}

impl FingerprintOptions {
    pub fn hashfields<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashfields = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Content-hash fingerprint: every row of the row-set is fetched and hashed.
pub struct Fingerprinting {
    rowset: RowSet,
    executor: Arc<dyn QueryExecutor>,
    columns: Vec<String>,
    long_hash: bool,
    expiry: Duration,
    key: String,
    memo: FingerprintMemo,
}

impl Fingerprinting {
    pub fn new(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        options: FingerprintOptions,
    ) -> Result<Self, QueryCacheError> {
        let model = rowset.model();
        let columns = if options.hashfields.is_empty() {
            model.field_names()
        } else {
            for column in &options.hashfields {
                model.require_field(column)?;
            }
            // Hash in model field order regardless of how they were listed.
            model
                .field_names()
                .into_iter()
                .filter(|name| options.hashfields.contains(name))
                .collect()
        };
        let key = options
            .cache_key
            .unwrap_or_else(|| query_to_key(rowset.query(), HASH_SUFFIX));

        Ok(Self {
            rowset,
            executor,
            columns,
            long_hash: options.long_hash,
            expiry: options.expiry,
            key,
            memo: FingerprintMemo::new(),
        })
    }

    pub fn rowset(&self) -> &RowSet {
        &self.rowset
    }

    pub fn hashed_columns(&self) -> &[String] {
        &self.columns
    }
}

#[async_trait]
impl FingerprintStrategy for Fingerprinting {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Content
    }

    fn memo_key(&self) -> &str {
        &self.key
    }

    fn memo(&self) -> &FingerprintMemo {
        &self.memo
    }

    fn expiry(&self) -> Duration {
        self.expiry
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn query_fingerprint(&self) -> Result<Fingerprint, QueryCacheError> {
        let started = Instant::now();
        let rows = self.executor.fetch_rows(&self.rowset.full_rows()).await?;
        let digest = digest_rows(&rows, &self.columns, self.long_hash);
        let elapsed = started.elapsed();
        histogram!(METRIC_FINGERPRINT_MS, "strategy" => "content")
            .record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            rows = rows.len(),
            digest = %digest,
            elapsed_ms = elapsed.as_millis() as u64,
            "computed content fingerprint"
        );
        Ok(Fingerprint::new(digest))
    }
}

/// Digest `rows` over `columns`.
///
/// Each row hashes to `name=value` pairs separated by `\x1f` and terminated by
/// `\x1e`. Row digests are sorted before being combined with the row count, so
/// the result does not depend on row order.
pub fn digest_rows(rows: &[Row], columns: &[String], long_hash: bool) -> String {
    let mut row_digests: Vec<Vec<u8>> = rows
        .iter()
        .map(|row| {
            let mut hasher = Sha256::new();
            for (idx, column) in columns.iter().enumerate() {
                if idx > 0 {
                    hasher.update([0x1f]);
                }
                hasher.update(column.as_bytes());
                hasher.update(b"=");
                let canonical = row
                    .get(column)
                    .map(|value| value.canonical())
                    .unwrap_or_else(|| "n".to_string());
                hasher.update(canonical.as_bytes());
            }
            hasher.update([0x1e]);
            hasher.finalize().to_vec()
        })
        .collect();
    row_digests.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update((rows.len() as u64).to_be_bytes());
    for digest in &row_digests {
        hasher.update(digest);
    }
    finish_digest(hasher, long_hash)
}
