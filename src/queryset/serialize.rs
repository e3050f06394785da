use serde_json::Value as Json;

use crate::error::QueryCacheError;
use crate::value::Row;

/// Turns fetched rows into the payload stored in the cache.
pub trait RowSerializer: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Appended to derived cache keys so payloads of different shapes over the
    /// same query never share an entry.
    fn key_suffix(&self) -> String {
        String::new()
    }

    fn serialize(&self, rows: &[Row]) -> Result<Json, QueryCacheError>;
}

/// Serializes rows as a JSON array of objects keyed by column name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValuesSerializer;

impl RowSerializer for ValuesSerializer {
    fn name(&self) -> &'static str {
        "values"
    }

    fn serialize(&self, rows: &[Row]) -> Result<Json, QueryCacheError> {
        rows.iter()
            .map(|row| row.to_json_object().map(Json::Object))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array)
    }
}
