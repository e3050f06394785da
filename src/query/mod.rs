//! Bound queries over a single model.
//!
//! A [`Query`] carries filters with bound parameters, ordering, an optional slice and
//! an optional column projection. Executors translate it into their own dialect; the
//! generic SQL rendering from [`Query::sql_with_params`] is what cache keys are
//! derived from.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::QueryCacheError;
use crate::model::ModelMeta;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
        }
    }

    /// Evaluate the comparison in process. Comparisons against null only
    /// match through `Eq`/`Ne`.
    pub fn matches(self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::*;
        let ordering = left.compare(right);
        match self {
            Op::Eq => ordering == Some(Equal),
            Op::Ne => ordering != Some(Equal),
            _ if left.is_null() || right.is_null() => false,
            Op::Lt => ordering == Some(Less),
            Op::Lte => matches!(ordering, Some(Less | Equal)),
            Op::Gt => ordering == Some(Greater),
            Op::Gte => matches!(ordering, Some(Greater | Equal)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct Query {
    model: Arc<ModelMeta>,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    offset: Option<u64>,
    limit: Option<u64>,
    projection: Vec<String>,
}

impl Query {
    /// Every row of `model`.
    pub fn all(model: Arc<ModelMeta>) -> Self {
        Self {
            model,
            filters: Vec::new(),
            order_by: Vec::new(),
            offset: None,
            limit: None,
            projection: Vec::new(),
        }
    }

    pub fn filter(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(column, Op::Eq, value)
    }

    pub fn exclude(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(column, Op::Ne, value)
    }

    pub fn filter_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    /// Flip the ordering; an unordered query becomes primary-key descending.
    pub fn reverse(mut self) -> Self {
        if self.order_by.is_empty() {
            let pk = self.model.pk().to_string();
            return self.order_by_desc(pk);
        }
        for order in &mut self.order_by {
            order.descending = !order.descending;
        }
        self
    }

    /// Rows `offset..offset + limit`.
    pub fn slice(mut self, offset: u64, limit: u64) -> Self {
        self.offset = (offset > 0).then_some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Select only these columns, in this order.
    pub fn values<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_projection(mut self) -> Self {
        self.projection.clear();
        self
    }

    pub fn model(&self) -> &Arc<ModelMeta> {
        &self.model
    }

    pub fn base_table(&self) -> &str {
        self.model.table()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn is_sliced(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    /// Projected column names, or every model field when unprojected.
    pub fn selected_columns(&self) -> Vec<String> {
        if self.projection.is_empty() {
            self.model.field_names()
        } else {
            self.projection.clone()
        }
    }

    /// Check that every referenced column exists on the model.
    pub fn validate(&self) -> Result<(), QueryCacheError> {
        let referenced = self
            .filters
            .iter()
            .map(|f| f.column.as_str())
            .chain(self.order_by.iter().map(|o| o.column.as_str()))
            .chain(self.projection.iter().map(String::as_str));
        for column in referenced {
            self.model.require_field(column)?;
        }
        Ok(())
    }

    /// Generic SQL text with `$n` placeholders and the bound parameters.
    pub fn sql_with_params(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        if self.projection.is_empty() {
            sql.push('*');
        } else {
            let columns: Vec<String> = self.projection.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&columns.join(", "));
        }
        let _ = write!(sql, " FROM {}", quote_ident(self.model.table()));

        let mut params = Vec::new();
        for (idx, filter) in self.filters.iter().enumerate() {
            sql.push_str(if idx == 0 { " WHERE " } else { " AND " });
            let column = quote_ident(&filter.column);
            match (&filter.value, filter.op) {
                (Value::Null, Op::Eq) => {
                    let _ = write!(sql, "{column} IS NULL");
                }
                (Value::Null, Op::Ne) => {
                    let _ = write!(sql, "{column} IS NOT NULL");
                }
                (value, op) => {
                    params.push(value.clone());
                    let _ = write!(sql, "{column} {} ${}", op.sql(), params.len());
                }
            }
        }

        for (idx, order) in self.order_by.iter().enumerate() {
            sql.push_str(if idx == 0 { " ORDER BY " } else { ", " });
            let _ = write!(
                sql,
                "{} {}",
                quote_ident(&order.column),
                if order.descending { "DESC" } else { "ASC" }
            );
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset {
            let _ = write!(sql, " OFFSET {offset}");
        }
        (sql, params)
    }

    /// Evaluate filters, ordering and slicing against in-memory rows, then project.
    pub fn apply(&self, rows: &[Row]) -> Vec<Row> {
        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| {
                self.filters.iter().all(|filter| {
                    let value = row.get(&filter.column).unwrap_or(&Value::Null);
                    filter.op.matches(value, &filter.value)
                })
            })
            .collect();

        if !self.order_by.is_empty() {
            matched.sort_by(|a, b| {
                self.order_by
                    .iter()
                    .map(|order| {
                        let left = a.get(&order.column).unwrap_or(&Value::Null);
                        let right = b.get(&order.column).unwrap_or(&Value::Null);
                        let ordering = left.sort_cmp(right);
                        if order.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                if self.projection.is_empty() {
                    row.clone()
                } else {
                    row.project(&self.projection)
                }
            })
            .collect()
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
