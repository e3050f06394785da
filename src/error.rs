use thiserror::Error;

use crate::executor::ExecutorError;

/// Failures surfaced by fingerprinting and cached query evaluation.
#[derive(Debug, Error)]
pub enum QueryCacheError {
    #[error("could not resolve query target: {message}")]
    Resolution { message: String },
    #[error("model `{model}` has no auto-updating timestamp column")]
    NoTimestampColumn { model: String },
    #[error("could not serialize rows: {message}")]
    Serialization { message: String },
    #[error(transparent)]
    Backend(#[from] CacheBackendError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl QueryCacheError {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn no_timestamp_column(model: impl Into<String>) -> Self {
        Self::NoTimestampColumn {
            model: model.into(),
        }
    }
}

/// Errors raised by a [`CacheStore`](crate::cache::CacheStore) implementation.
#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry could not be encoded or decoded: {0}")]
    Codec(String),
    #[error("cache store error: {0}")]
    Backend(String),
}

impl CacheBackendError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
