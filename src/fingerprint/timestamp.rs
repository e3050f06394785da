use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::cache::keys::{TIMESTAMP_SUFFIX, query_to_key};
use crate::error::QueryCacheError;
use crate::executor::{AggregateMax, QueryExecutor};
use crate::model::RowSet;

use super::{Fingerprint, FingerprintMemo, FingerprintStrategy, StrategyKind, finish_digest};

const METRIC_FINGERPRINT_MS: &str = "querycache_fingerprint_ms";

/// Options for [`TimestampFingerprint`] and [`ModelTimestampFingerprint`].
#[derive(Debug, Clone, Default)]
pub struct TimestampOptions {
    /// Column to aggregate. Defaults to the model's first `auto_now` field.
    pub column: Option<String>,
    pub long_hash: bool,
    pub expiry: Duration,
    pub cache_key: Option<String>,
}

impl TimestampOptions {
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// Fingerprint from `count(*)` and `max(column)` over the row-set.
///
/// The column must change on every write. A date-only column collapses all
/// updates made on the same day into one fingerprint.
pub struct TimestampFingerprint {
    rowset: RowSet,
    executor: Arc<dyn QueryExecutor>,
    column: String,
    long_hash: bool,
    expiry: Duration,
    key: String,
    memo: FingerprintMemo,
}

impl TimestampFingerprint {
    pub fn new(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        options: TimestampOptions,
    ) -> Result<Self, QueryCacheError> {
        let model = rowset.model();
        let column = match options.column {
            Some(column) => {
                model.require_field(&column)?;
                column
            }
            None => model
                .auto_now_field()
                .map(|field| field.name().to_string())
                .ok_or_else(|| QueryCacheError::no_timestamp_column(model.label()))?,
        };
        debug!(model = %model.label(), column = %column, "using timestamp column");
        let key = options
            .cache_key
            .unwrap_or_else(|| query_to_key(rowset.query(), TIMESTAMP_SUFFIX));

        Ok(Self {
            rowset,
            executor,
            column,
            long_hash: options.long_hash,
            expiry: options.expiry,
            key,
            memo: FingerprintMemo::new(),
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn rowset(&self) -> &RowSet {
        &self.rowset
    }

    async fn aggregate(&self, rowset: &RowSet) -> Result<Fingerprint, QueryCacheError> {
        let started = Instant::now();
        let aggregate = self.executor.aggregate_max(rowset, &self.column).await?;
        let digest = digest_aggregate(&aggregate, self.long_hash);
        histogram!(METRIC_FINGERPRINT_MS, "strategy" => "timestamp")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            count = aggregate.count,
            digest = %digest,
            "computed timestamp fingerprint"
        );
        Ok(Fingerprint::new(digest))
    }
}

#[async_trait]
impl FingerprintStrategy for TimestampFingerprint {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Timestamp
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

    #[instrument(skip(self), fields(key = %self.key, column = %self.column))]
    async fn query_fingerprint(&self) -> Result<Fingerprint, QueryCacheError> {
        self.aggregate(&self.rowset).await
    }
}

/// Digest of `"{count}|{max}"`, with `null` standing in for an empty row-set.
pub fn digest_aggregate(aggregate: &AggregateMax, long_hash: bool) -> String {
    let max = aggregate
        .max
        .as_ref()
        .map(|value| value.canonical())
        .unwrap_or_else(|| "null".to_string());
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{max}", aggregate.count).as_bytes());
    finish_digest(hasher, long_hash)
}

/// A [`TimestampFingerprint`] that checks the whole table first.
///
/// When the table-level aggregate is unchanged since the previous check, the
/// row-set cannot have changed either, and the query-level aggregate is skipped.
pub struct ModelTimestampFingerprint {
    inner: TimestampFingerprint,
    table: RowSet,
    table_memo: FingerprintMemo,
}

impl ModelTimestampFingerprint {
    pub fn new(
        rowset: RowSet,
        executor: Arc<dyn QueryExecutor>,
        options: TimestampOptions,
    ) -> Result<Self, QueryCacheError> {
        let table = rowset.whole_model();
        Ok(Self {
            inner: TimestampFingerprint::new(rowset, executor, options)?,
            table,
            table_memo: FingerprintMemo::new(),
        })
    }

    pub fn column(&self) -> &str {
        self.inner.column()
    }

    fn covers_whole_table(&self) -> bool {
        let query = self.inner.rowset.query();
        query.filters().is_empty() && !query.is_sliced()
    }
}

#[async_trait]
impl FingerprintStrategy for ModelTimestampFingerprint {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ModelTimestamp
    }

    fn memo_key(&self) -> &str {
        self.inner.memo_key()
    }

    fn memo(&self) -> &FingerprintMemo {
        self.inner.memo()
    }

    fn expiry(&self) -> Duration {
        self.inner.expiry()
    }

    #[instrument(skip(self), fields(key = %self.inner.key))]
    async fn query_fingerprint(&self) -> Result<Fingerprint, QueryCacheError> {
        let table_fp = self.inner.aggregate(&self.table).await?;

        if self.covers_whole_table() {
            self.table_memo.record(table_fp.clone());
            return Ok(table_fp);
        }
        if self.table_memo.last().as_ref() == Some(&table_fp)
            && let Some(previous) = self.inner.memo().last()
        {
            debug!("table not updated, reusing query fingerprint");
            return Ok(previous);
        }
        debug!("table may have changed, checking query");
        // The table digest is only remembered next to a query fingerprint
        // computed under it.
        let query_fp = self.inner.query_fingerprint().await?;
        self.inner.memo().record(query_fp.clone());
        self.table_memo.record(table_fp);
        Ok(query_fp)
    }
}
