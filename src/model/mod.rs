//! Model metadata and the registry used to resolve query targets.

mod target;

pub use target::{QueryTarget, RowSet};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QueryCacheError;

/// Storage type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Json,
    /// A GeoJSON geometry (object or JSON text).
    Geometry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    name: String,
    kind: FieldKind,
    auto_now: bool,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            auto_now: false,
        }
    }

    /// Mark the field as refreshed on every row write.
    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_auto_now(&self) -> bool {
        self.auto_now
    }
}

/// Describes one table-backed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    namespace: String,
    name: String,
    table: String,
    primary_key: String,
    fields: Vec<FieldMeta>,
}

impl ModelMeta {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `namespace.Name`, used in log and error messages.
    pub fn label(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pk(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// First field flagged `auto_now`, if any.
    pub fn auto_now_field(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.auto_now)
    }

    pub(crate) fn require_field(&self, name: &str) -> Result<&FieldMeta, QueryCacheError> {
        self.get_field(name).ok_or_else(|| {
            QueryCacheError::resolution(format!(
                "model `{}` has no field `{name}`",
                self.label()
            ))
        })
    }
}

/// Lookup of models by `(namespace, name)`.
///
/// Model names match case-insensitively, namespaces exactly.
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    models: HashMap<(String, String), Arc<ModelMeta>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelMeta) -> Arc<ModelMeta> {
        let key = (model.namespace.clone(), model.name.to_lowercase());
        let model = Arc::new(model);
        self.models.insert(key, Arc::clone(&model));
        model
    }

    pub fn with_model(mut self, model: ModelMeta) -> Self {
        self.register(model);
        self
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<ModelMeta>> {
        self.models
            .get(&(namespace.to_string(), name.to_lowercase()))
            .cloned()
    }

    /// Map any query target onto a concrete row-set.
    pub fn resolve(&self, target: &QueryTarget) -> Result<RowSet, QueryCacheError> {
        match target {
            QueryTarget::ByType(model) => Ok(RowSet::all(Arc::clone(model))),
            QueryTarget::ByQuery(query) => {
                query.validate()?;
                Ok(RowSet::new(query.clone()))
            }
            QueryTarget::ByName { namespace, model } => self
                .get(namespace, model)
                .map(RowSet::all)
                .ok_or_else(|| {
                    QueryCacheError::resolution(format!("unknown model `{namespace}.{model}`"))
                }),
        }
    }
}
