//! Postgres-backed executor.
//!
//! Rows are fetched as `row_to_json` objects and mapped back onto the model's
//! field order, so fingerprints do not depend on driver-level type decoding.

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::{Postgres, QueryBuilder, postgres::PgPool, types::Json as SqlJson};

use crate::model::RowSet;
use crate::query::{Op, Query, quote_ident};
use crate::value::{Row, Value};

use super::{AggregateMax, ExecutorError, QueryExecutor};

#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_select<'q>(qb: &mut QueryBuilder<'q, Postgres>, query: &Query) {
        qb.push("SELECT ");
        if query.projection().is_empty() {
            qb.push("*");
        } else {
            let columns: Vec<String> = query.projection().iter().map(|c| quote_ident(c)).collect();
            qb.push(columns.join(", "));
        }
        qb.push(" FROM ");
        qb.push(quote_ident(query.base_table()));

        for (idx, filter) in query.filters().iter().enumerate() {
            qb.push(if idx == 0 { " WHERE " } else { " AND " });
            qb.push(quote_ident(&filter.column));
            match (&filter.value, filter.op) {
                (Value::Null, Op::Eq) => {
                    qb.push(" IS NULL");
                }
                (Value::Null, Op::Ne) => {
                    qb.push(" IS NOT NULL");
                }
                (value, op) => {
                    qb.push(" ");
                    qb.push(op.sql());
                    qb.push(" ");
                    Self::push_value(qb, value);
                }
            }
        }

        for (idx, order) in query.ordering().iter().enumerate() {
            qb.push(if idx == 0 { " ORDER BY " } else { ", " });
            qb.push(quote_ident(&order.column));
            qb.push(if order.descending { " DESC" } else { " ASC" });
        }
        if let Some(limit) = query.limit_value() {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        if let Some(offset) = query.offset_value() {
            qb.push(" OFFSET ");
            qb.push_bind(offset as i64);
        }
    }

    fn push_value<'q>(qb: &mut QueryBuilder<'q, Postgres>, value: &Value) {
        match value {
            Value::Null => {
                qb.push_bind(None::<String>);
            }
            Value::Bool(v) => {
                qb.push_bind(*v);
            }
            Value::Int(v) => {
                qb.push_bind(*v);
            }
            Value::Float(v) => {
                qb.push_bind(*v);
            }
            Value::Text(v) => {
                qb.push_bind(v.clone());
            }
            Value::Date(v) => {
                qb.push_bind(*v);
            }
            Value::Timestamp(v) => {
                qb.push_bind(*v);
            }
            Value::Json(v) => {
                qb.push_bind(SqlJson(v.clone()));
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch_rows(&self, rowset: &RowSet) -> Result<Vec<Row>, ExecutorError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT row_to_json(q) FROM (");
        Self::push_select(&mut qb, rowset.query());
        qb.push(") AS q");

        let records: Vec<SqlJson<Json>> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        records
            .into_iter()
            .map(|SqlJson(record)| match record {
                Json::Object(object) => Ok(Row::from_json_object(rowset.model(), object)),
                other => Err(ExecutorError::Persistence(format!(
                    "expected a JSON object per row, got `{other}`"
                ))),
            })
            .collect()
    }

    async fn aggregate_max(
        &self,
        rowset: &RowSet,
        column: &str,
    ) -> Result<AggregateMax, ExecutorError> {
        let kind = rowset
            .model()
            .get_field(column)
            .map(|field| field.kind())
            .ok_or_else(|| ExecutorError::InvalidInput {
                message: format!("column `{column}` does not exist"),
            })?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT count(*), to_jsonb(max(q.");
        qb.push(quote_ident(column));
        qb.push(")) FROM (");
        Self::push_select(&mut qb, rowset.full_rows().query());
        qb.push(") AS q");

        let (count, newest): (i64, Option<SqlJson<Json>>) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(AggregateMax {
            count: u64::try_from(count).unwrap_or_default(),
            max: newest
                .map(|SqlJson(json)| Value::from_json(json, Some(kind)))
                .filter(|value| !value.is_null()),
        })
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> ExecutorError {
    match err {
        sqlx::Error::PoolTimedOut => ExecutorError::Timeout,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            ExecutorError::Timeout
        }
        sqlx::Error::Database(db)
            if db.message().contains("does not exist")
                || db.message().contains("invalid input syntax") =>
        {
            ExecutorError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        other => ExecutorError::from_persistence(other),
    }
}
