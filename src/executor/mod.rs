//! Query executor traits describing the database adapters.

mod memory;
mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::{PgExecutor, map_sqlx_error};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::RowSet;
use crate::value::{Row, Value};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl ExecutorError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result of a `count(*)`, `max(column)` aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateMax {
    pub count: u64,
    pub max: Option<Value>,
}

/// Executes resolved row-sets against a database.
///
/// Implementations must return rows in a deterministic order for a given
/// query and unchanged data.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Fetch the rows of `rowset`, honouring its projection.
    async fn fetch_rows(&self, rowset: &RowSet) -> Result<Vec<Row>, ExecutorError>;

    /// Count the rows of `rowset` and the maximum of `column` across them.
    async fn aggregate_max(
        &self,
        rowset: &RowSet,
        column: &str,
    ) -> Result<AggregateMax, ExecutorError>;
}
