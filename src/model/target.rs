use std::sync::Arc;

use crate::error::QueryCacheError;
use crate::query::Query;

use super::ModelMeta;

/// What to fingerprint and cache.
#[derive(Debug, Clone)]
pub enum QueryTarget {
    /// Every row of a model.
    ByType(Arc<ModelMeta>),
    /// A bound query over a model.
    ByQuery(Query),
    /// A model looked up lazily in a [`ModelRegistry`](super::ModelRegistry).
    ByName { namespace: String, model: String },
}

impl QueryTarget {
    pub fn by_name(namespace: impl Into<String>, model: impl Into<String>) -> Self {
        Self::ByName {
            namespace: namespace.into(),
            model: model.into(),
        }
    }
}

impl From<Arc<ModelMeta>> for QueryTarget {
    fn from(model: Arc<ModelMeta>) -> Self {
        Self::ByType(model)
    }
}

impl From<Query> for QueryTarget {
    fn from(query: Query) -> Self {
        Self::ByQuery(query)
    }
}

impl From<(&str, &str)> for QueryTarget {
    fn from((namespace, model): (&str, &str)) -> Self {
        Self::by_name(namespace, model)
    }
}

/// A resolved, validated query: the uniform handle every strategy and
/// queryset works from.
#[derive(Debug, Clone)]
pub struct RowSet {
    query: Query,
}

impl RowSet {
    pub(crate) fn new(query: Query) -> Self {
        Self { query }
    }

    pub(crate) fn all(model: Arc<ModelMeta>) -> Self {
        Self::new(Query::all(model))
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn model(&self) -> &Arc<ModelMeta> {
        self.query.model()
    }

    /// The same rows across the whole model, ignoring filters and slicing.
    pub fn whole_model(&self) -> RowSet {
        RowSet::all(Arc::clone(self.model()))
    }

    /// The same rows with every model column selected.
    pub fn full_rows(&self) -> RowSet {
        RowSet::new(self.query.clone().without_projection())
    }

    /// Restrict the row-set to `columns`, in the order given.
    pub fn values(&self, columns: &[String]) -> Result<RowSet, QueryCacheError> {
        let query = self.query.clone().values(columns.iter().cloned());
        query.validate()?;
        Ok(RowSet::new(query))
    }
}
