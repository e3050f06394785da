//! GeoJSON (RFC 7946) feature collection serializer.
//!
//! Rows must already carry a GeoJSON geometry, either as a JSON object or as
//! JSON text such as the output of `ST_AsGeoJSON`. Raw database geometry types
//! are not converted.

use serde_json::{Map, Value as Json, json};

use crate::cache::hash_prefix;
use crate::error::QueryCacheError;
use crate::value::{Row, Value};

use super::serialize::RowSerializer;

pub const DEFAULT_GEOMETRY_FIELD: &str = "feature";

/// Builds a `FeatureCollection` from rows.
#[derive(Debug, Clone)]
pub struct GeoJsonSerializer {
    geometry_field: String,
    properties: Vec<String>,
}

impl Default for GeoJsonSerializer {
    fn default() -> Self {
        Self {
            geometry_field: DEFAULT_GEOMETRY_FIELD.to_string(),
            properties: Vec::new(),
        }
    }
}

impl GeoJsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry_field(mut self, field: impl Into<String>) -> Self {
        self.geometry_field = field.into();
        self
    }

    /// Columns copied into each feature's `properties`. Empty means every
    /// column except the geometry.
    pub fn properties<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn geometry_field_name(&self) -> &str {
        &self.geometry_field
    }

    pub fn property_names(&self) -> &[String] {
        &self.properties
    }

    fn feature(&self, index: usize, row: &Row) -> Result<Json, QueryCacheError> {
        let geometry = match row.get(&self.geometry_field) {
            None | Some(Value::Null) => {
                return Err(QueryCacheError::serialization(format!(
                    "row {index} has no geometry in `{}`",
                    self.geometry_field
                )));
            }
            Some(value) => geometry_json(value).map_err(|reason| {
                QueryCacheError::serialization(format!(
                    "row {index} has invalid geometry in `{}`: {reason}",
                    self.geometry_field
                ))
            })?,
        };

        let mut properties = Map::new();
        if self.properties.is_empty() {
            for (name, value) in row.columns() {
                if name != self.geometry_field {
                    properties.insert(name.to_string(), value.to_json()?);
                }
            }
        } else {
            for name in &self.properties {
                let value = row.get(name).ok_or_else(|| {
                    QueryCacheError::serialization(format!(
                        "row {index} has no property column `{name}`"
                    ))
                })?;
                properties.insert(name.clone(), value.to_json()?);
            }
        }

        Ok(json!({
            "type": "Feature",
            "geometry": geometry,
            "properties": properties,
        }))
    }
}

impl RowSerializer for GeoJsonSerializer {
    fn name(&self) -> &'static str {
        "geojson"
    }

    fn key_suffix(&self) -> String {
        let mut shape = self.geometry_field.clone();
        for name in &self.properties {
            shape.push('\x1f');
            shape.push_str(name);
        }
        format!("_geojson_{}", hash_prefix(shape.as_bytes(), 8))
    }

    fn serialize(&self, rows: &[Row]) -> Result<Json, QueryCacheError> {
        let features = rows
            .iter()
            .enumerate()
            .map(|(index, row)| self.feature(index, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "type": "FeatureCollection",
            "features": features,
        }))
    }
}

fn geometry_json(value: &Value) -> Result<Json, String> {
    let geometry = match value {
        Value::Json(json) => json.clone(),
        Value::Text(text) => {
            serde_json::from_str(text).map_err(|err| format!("not JSON: {err}"))?
        }
        other => return Err(format!("unsupported value {}", other.canonical())),
    };
    validate_geometry(&geometry)?;
    Ok(geometry)
}

/// Check that `geometry` is an RFC 7946 geometry object.
pub fn validate_geometry(geometry: &Json) -> Result<(), String> {
    let object = geometry
        .as_object()
        .ok_or_else(|| "geometry must be an object".to_string())?;
    let kind = object
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| "geometry has no `type`".to_string())?;

    if kind == "GeometryCollection" {
        let members = object
            .get("geometries")
            .and_then(Json::as_array)
            .ok_or_else(|| "GeometryCollection needs a `geometries` array".to_string())?;
        return members.iter().try_for_each(validate_geometry);
    }

    let coordinates = object
        .get("coordinates")
        .ok_or_else(|| format!("{kind} has no `coordinates`"))?;
    match kind {
        "Point" => position(coordinates),
        "MultiPoint" => each(coordinates, position),
        "LineString" => line_string(coordinates),
        "MultiLineString" => each(coordinates, line_string),
        "Polygon" => polygon(coordinates),
        "MultiPolygon" => each(coordinates, polygon),
        other => Err(format!("unknown geometry type `{other}`")),
    }
}

fn each(json: &Json, check: fn(&Json) -> Result<(), String>) -> Result<(), String> {
    json.as_array()
        .ok_or_else(|| "expected an array".to_string())?
        .iter()
        .try_for_each(check)
}

fn position(json: &Json) -> Result<(), String> {
    let coords = json
        .as_array()
        .ok_or_else(|| "position must be an array".to_string())?;
    if !(2..=3).contains(&coords.len()) {
        return Err(format!("position has {} coordinates", coords.len()));
    }
    if coords.iter().all(Json::is_number) {
        Ok(())
    } else {
        Err("position coordinates must be numbers".to_string())
    }
}

fn line_string(json: &Json) -> Result<(), String> {
    let points = json
        .as_array()
        .ok_or_else(|| "LineString must be an array".to_string())?;
    if points.len() < 2 {
        return Err("LineString needs at least two positions".to_string());
    }
    points.iter().try_for_each(position)
}

fn polygon(json: &Json) -> Result<(), String> {
    each(json, linear_ring)
}

fn linear_ring(json: &Json) -> Result<(), String> {
    let points = json
        .as_array()
        .ok_or_else(|| "linear ring must be an array".to_string())?;
    if points.len() < 4 {
        return Err("linear ring needs at least four positions".to_string());
    }
    points.iter().try_for_each(position)?;
    if points.first() != points.last() {
        return Err("linear ring is not closed".to_string());
    }
    Ok(())
}
