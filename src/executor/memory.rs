//! In-process tables, used for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::lock::{rw_read, rw_write};
use crate::model::{FieldKind, ModelMeta, RowSet};
use crate::value::{Row, Value};

use super::{AggregateMax, ExecutorError, QueryExecutor};

const SOURCE: &str = "executor::memory";

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// A minimal row store that evaluates [`Query`](crate::query::Query) filters,
/// ordering, slicing and projection in process.
///
/// Rows are kept in insertion order, which is also the order returned for
/// unordered queries. `auto_now` fields are stamped on every insert and update.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, assigning an integer primary key when none is given.
    /// Returns the primary key.
    pub fn insert(&self, model: &ModelMeta, row: Row) -> i64 {
        let mut tables = rw_write(&self.tables, SOURCE, "insert");
        let table = tables.entry(model.table().to_string()).or_default();

        let pk = match row.get(model.pk()) {
            Some(Value::Int(pk)) => *pk,
            _ => table.next_id + 1,
        };
        table.next_id = table.next_id.max(pk);

        let mut stored = Row::new();
        for field in model.fields() {
            let value = if field.name() == model.pk() {
                Value::Int(pk)
            } else {
                row.get(field.name()).cloned().unwrap_or(Value::Null)
            };
            stored.set(field.name(), value);
        }
        touch_auto_now(model, &mut stored);
        table.rows.push(stored);
        debug!(table = model.table(), pk, "row inserted");
        pk
    }

    /// Apply `changes` to the row with primary key `pk`. Returns false when no
    /// such row exists.
    pub fn update(&self, model: &ModelMeta, pk: i64, changes: Row) -> bool {
        let mut tables = rw_write(&self.tables, SOURCE, "update");
        let Some(table) = tables.get_mut(model.table()) else {
            return false;
        };
        let Some(row) = table
            .rows
            .iter_mut()
            .find(|row| row.get(model.pk()) == Some(&Value::Int(pk)))
        else {
            return false;
        };
        for (column, value) in changes.columns() {
            row.set(column, value.clone());
        }
        touch_auto_now(model, row);
        true
    }

    /// Re-save a row without changing any value, refreshing `auto_now` fields.
    pub fn touch(&self, model: &ModelMeta, pk: i64) -> bool {
        self.update(model, pk, Row::new())
    }

    pub fn delete(&self, model: &ModelMeta, pk: i64) -> bool {
        let mut tables = rw_write(&self.tables, SOURCE, "delete");
        let Some(table) = tables.get_mut(model.table()) else {
            return false;
        };
        let before = table.rows.len();
        table
            .rows
            .retain(|row| row.get(model.pk()) != Some(&Value::Int(pk)));
        table.rows.len() != before
    }

    pub fn len(&self, model: &ModelMeta) -> usize {
        rw_read(&self.tables, SOURCE, "len")
            .get(model.table())
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, model: &ModelMeta) -> bool {
        self.len(model) == 0
    }

    fn snapshot(&self, table: &str) -> Vec<Row> {
        rw_read(&self.tables, SOURCE, "snapshot")
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }
}

fn touch_auto_now(model: &ModelMeta, row: &mut Row) {
    let now = OffsetDateTime::now_utc();
    for field in model.fields().iter().filter(|f| f.is_auto_now()) {
        let value = match field.kind() {
            FieldKind::Date => Value::Date(now.date()),
            _ => Value::Timestamp(now),
        };
        row.set(field.name(), value);
    }
}

#[async_trait]
impl QueryExecutor for MemoryDatabase {
    async fn fetch_rows(&self, rowset: &RowSet) -> Result<Vec<Row>, ExecutorError> {
        let rows = self.snapshot(rowset.model().table());
        Ok(rowset.query().apply(&rows))
    }

    async fn aggregate_max(
        &self,
        rowset: &RowSet,
        column: &str,
    ) -> Result<AggregateMax, ExecutorError> {
        if !rowset.model().has_field(column) {
            return Err(ExecutorError::InvalidInput {
                message: format!("column `{column}` does not exist"),
            });
        }
        let rows = self.snapshot(rowset.model().table());
        let matched = rowset.full_rows().query().apply(&rows);
        let max = matched
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|value| !value.is_null())
            .fold(None::<&Value>, |best, value| match best {
                Some(best) if best.sort_cmp(value).is_ge() => Some(best),
                _ => Some(value),
            })
            .cloned();
        Ok(AggregateMax {
            count: matched.len() as u64,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::FieldMeta;
    use crate::query::Query;

    fn model() -> Arc<ModelMeta> {
        Arc::new(
            ModelMeta::new("tests", "Stamped", "tests_stamped")
                .field(FieldMeta::new("id", FieldKind::Integer))
                .field(FieldMeta::new("v", FieldKind::Text))
                .field(FieldMeta::new("last_updated", FieldKind::Timestamp).auto_now()),
        )
    }

    #[tokio::test]
    async fn insert_assigns_keys_and_stamps() {
        let db = MemoryDatabase::new();
        let model = model();
        let first = db.insert(&model, Row::new().with("v", "a"));
        let second = db.insert(&model, Row::new().with("v", "b"));
        assert_eq!((first, second), (1, 2));

        let rows = db
            .fetch_rows(&RowSet::new(Query::all(Arc::clone(&model))))
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 2);
        assert!(matches!(
            rows[0].get("last_updated"),
            Some(Value::Timestamp(_))
        ));
    }

    #[tokio::test]
    async fn aggregate_reports_count_and_newest() {
        let db = MemoryDatabase::new();
        let model = model();
        db.insert(&model, Row::new().with("v", "a"));
        let pk = db.insert(&model, Row::new().with("v", "b"));
        db.touch(&model, pk);

        let rowset = RowSet::new(Query::all(Arc::clone(&model)));
        let agg = db
            .aggregate_max(&rowset, "last_updated")
            .await
            .expect("aggregate");
        assert_eq!(agg.count, 2);

        let rows = db.fetch_rows(&rowset).await.expect("fetch");
        assert_eq!(agg.max.as_ref(), rows[1].get("last_updated"));
    }

    #[tokio::test]
    async fn aggregate_over_empty_table_has_no_max() {
        let db = MemoryDatabase::new();
        let rowset = RowSet::new(Query::all(model()));
        let agg = db
            .aggregate_max(&rowset, "last_updated")
            .await
            .expect("aggregate");
        assert_eq!(agg, AggregateMax { count: 0, max: None });
    }

    #[test]
    fn delete_removes_only_matching_row() {
        let db = MemoryDatabase::new();
        let model = model();
        db.insert(&model, Row::new().with("v", "a"));
        let pk = db.insert(&model, Row::new().with("v", "b"));
        assert!(db.delete(&model, pk));
        assert!(!db.delete(&model, pk));
        assert_eq!(db.len(&model), 1);
    }
}
