//! Column values and rows as seen by fingerprinting and serialization.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value as Json};
use time::{
    Date, OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::error::QueryCacheError;
use crate::model::{FieldKind, ModelMeta};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(Date),
    Timestamp(OffsetDateTime),
    Json(Json),
}

impl Value {
    /// Stable, type-tagged text form used as hash input.
    ///
    /// Variable-length variants carry their byte length so that no two distinct
    /// values (or value sequences) share an encoding.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => "n".to_string(),
            Value::Bool(value) => format!("b:{value}"),
            Value::Int(value) => format!("i:{value}"),
            Value::Float(value) => format!("f:{value:?}"),
            Value::Text(value) => format!("t{}:{value}", value.len()),
            Value::Date(value) => format!("d:{value}"),
            Value::Timestamp(value) => format!("ts:{}", format_timestamp(*value)),
            Value::Json(value) => {
                let text = value.to_string();
                format!("j{}:{text}", text.len())
            }
        }
    }

    /// Render the value for a JSON payload.
    pub fn to_json(&self) -> Result<Json, QueryCacheError> {
        Ok(match self {
            Value::Null => Json::Null,
            Value::Bool(value) => Json::Bool(*value),
            Value::Int(value) => Json::Number((*value).into()),
            Value::Float(value) => Json::Number(Number::from_f64(*value).ok_or_else(|| {
                QueryCacheError::serialization(format!(
                    "non-finite float `{value}` has no JSON representation"
                ))
            })?),
            Value::Text(value) => Json::String(value.clone()),
            Value::Date(value) => Json::String(value.to_string()),
            Value::Timestamp(value) => Json::String(format_timestamp(*value)),
            Value::Json(value) => value.clone(),
        })
    }

    /// Convert a JSON value produced by the database into a column value,
    /// using the declared field kind to recover dates and timestamps.
    pub fn from_json(json: Json, kind: Option<FieldKind>) -> Self {
        match (json, kind) {
            (Json::Null, _) => Value::Null,
            (Json::String(text), Some(FieldKind::Timestamp)) => {
                match OffsetDateTime::parse(&text, &Rfc3339) {
                    Ok(ts) => Value::Timestamp(ts),
                    Err(_) => Value::Text(text),
                }
            }
            (Json::String(text), Some(FieldKind::Date)) => {
                match Date::parse(&text, format_description!("[year]-[month]-[day]")) {
                    Ok(date) => Value::Date(date),
                    Err(_) => Value::Text(text),
                }
            }
            (json, Some(FieldKind::Json | FieldKind::Geometry)) => Value::Json(json),
            (Json::Bool(value), _) => Value::Bool(value),
            (Json::Number(number), _) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => number
                    .as_f64()
                    .map(Value::Float)
                    .unwrap_or_else(|| Value::Json(Json::Number(number))),
            },
            (Json::String(text), _) => Value::Text(text),
            (json, _) => Value::Json(json),
        }
    }

    /// Compare two values of compatible types. Integers and floats compare numerically;
    /// mismatched types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Json(a), Value::Json(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, incomparable values equal.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(&Rfc3339)
        .unwrap_or_else(|_| utc.unix_timestamp_nanos().to_string())
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Value::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered set of named column values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Replace an existing column value or append a new column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Keep only the named columns, in the order given.
    pub fn project(&self, columns: &[String]) -> Row {
        Row {
            columns: columns
                .iter()
                .map(|name| {
                    let value = self.get(name).cloned().unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect(),
        }
    }

    /// Render as a JSON object.
    pub fn to_json_object(&self) -> Result<Map<String, Json>, QueryCacheError> {
        let mut object = Map::new();
        for (name, value) in &self.columns {
            object.insert(name.clone(), value.to_json()?);
        }
        Ok(object)
    }

    /// Build a row from a JSON object, ordering known columns by the model's field
    /// order and appending any remaining keys in key order.
    pub fn from_json_object(model: &ModelMeta, mut object: Map<String, Json>) -> Row {
        let mut row = Row::new();
        for field in model.fields() {
            if let Some(json) = object.remove(field.name()) {
                row.set(field.name(), Value::from_json(json, Some(field.kind())));
            }
        }
        for (name, json) in object {
            row.set(name, Value::from_json(json, None));
        }
        row
    }
}
