//! `ETag` and `Last-Modified` helpers for axum handlers.
//!
//! The entity tag is the content fingerprint of the response rows; the
//! modification date is the newest value of the model's `auto_now` column.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use time::{OffsetDateTime, Time, UtcOffset, macros::format_description};
use tracing::{debug, warn};

use crate::error::QueryCacheError;
use crate::executor::QueryExecutor;
use crate::fingerprint::{FingerprintOptions, FingerprintStrategy, Fingerprinting};
use crate::model::RowSet;
use crate::value::Value;

/// Validators for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    etag: Option<String>,
    last_modified: Option<String>,
}

impl ConditionalHeaders {
    pub fn new(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// Compute both validators for `rowset`. `hashfields` limits the entity tag
    /// to the columns the response actually exposes.
    pub async fn for_rowset(
        rowset: &RowSet,
        executor: Arc<dyn QueryExecutor>,
        hashfields: &[String],
    ) -> Result<Self, QueryCacheError> {
        let last_modified = last_modified(rowset, executor.as_ref()).await?;
        let etag = etag(rowset, executor, hashfields).await?;
        Ok(Self::new(Some(etag), last_modified))
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// True when the request's `If-None-Match` matches the entity tag.
    pub fn not_modified(&self, request: &HeaderMap) -> bool {
        let Some(etag) = self.etag.as_deref() else {
            return false;
        };
        request
            .get_all(header::IF_NONE_MATCH)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .any(|candidate| candidate == "*" || weak_eq(candidate, etag))
    }

    /// Add the validators to a response's headers.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (header::ETAG, self.etag.as_deref()),
            (header::LAST_MODIFIED, self.last_modified.as_deref()),
        ] {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(err) => warn!(header = %name, error = %err, "invalid header value"),
            }
        }
    }

    /// `304 Not Modified` when the request already holds the current
    /// representation, otherwise `body` with the validators attached.
    pub fn respond(&self, request: &HeaderMap, body: impl IntoResponse) -> Response {
        if self.not_modified(request) {
            debug!(etag = ?self.etag, "responding not modified");
            let mut headers = HeaderMap::new();
            self.apply(&mut headers);
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }
        let mut response = body.into_response();
        self.apply(response.headers_mut());
        response
    }
}

fn weak_eq(candidate: &str, etag: &str) -> bool {
    let strip = |tag: &str| tag.strip_prefix("W/").unwrap_or(tag).to_string();
    strip(candidate) == strip(etag)
}

/// Quoted content fingerprint of `rowset` over `hashfields` (all fields when empty).
pub async fn etag(
    rowset: &RowSet,
    executor: Arc<dyn QueryExecutor>,
    hashfields: &[String],
) -> Result<String, QueryCacheError> {
    let fingerprinting = Fingerprinting::new(
        rowset.clone(),
        executor,
        FingerprintOptions::default().hashfields(hashfields.iter().cloned()),
    )?;
    let fingerprint = fingerprinting.query_fingerprint().await?;
    Ok(format!("\"{}\"", fingerprint.digest))
}

/// Newest `auto_now` value across `rowset` as an HTTP date.
///
/// `None` when the model has no such column or the row-set is empty.
pub async fn last_modified(
    rowset: &RowSet,
    executor: &dyn QueryExecutor,
) -> Result<Option<String>, QueryCacheError> {
    let Some(field) = rowset.model().auto_now_field() else {
        return Ok(None);
    };
    let aggregate = executor.aggregate_max(rowset, field.name()).await?;
    Ok(match aggregate.max {
        Some(Value::Timestamp(ts)) => Some(http_date(ts)),
        Some(Value::Date(date)) => Some(http_date(date.with_time(Time::MIDNIGHT).assume_utc())),
        _ => None,
    })
}

/// Format as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(ts: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(&format)
        .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}
