use anyhow::{Context, Result, bail};
use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::values::AreaCode;

/// Identity of a feature within a collection; the key shapes are reconciled on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single administrative area with validated properties.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaFeature {
    pub id: FeatureId,
    /// Code observations are joined on.
    pub code: AreaCode,
    pub name: String,
    /// Coarser area this one belongs to (the arrondissement of a quartier).
    pub group: Option<AreaCode>,
    pub geometry: MultiPolygon<f64>,
    /// Remaining properties, untouched.
    pub extra: Map<String, Value>,
}

/// Ordered, immutable set of areas owned by a rendering session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: Vec<AreaFeature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<AreaFeature>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> &[AreaFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AreaFeature> {
        self.features.iter()
    }
}

/// Which property fields carry the typed schema.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PropertySchema {
    pub id_property: String,
    pub code_property: String,
    pub name_property: String,
    pub group_property: Option<String>,
}

impl Default for PropertySchema {
    fn default() -> Self {
        Self {
            id_property: "c_ar".to_string(),
            code_property: "c_ar".to_string(),
            name_property: "l_ar".to_string(),
            group_property: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error("unsupported geometry type {0}")]
    UnsupportedGeometry(String),
    #[error("geometry contains non-finite coordinates")]
    InvalidCoordinates,
    #[error("missing or empty property {0:?}")]
    MissingProperty(String),
    #[error("duplicate feature id {0}")]
    DuplicateId(FeatureId),
}

/// A feature that failed validation, with its position in the source document.
#[derive(Debug)]
pub struct Rejected {
    pub index: usize,
    pub error: FeatureError,
}

#[derive(Debug)]
pub struct Ingested {
    pub collection: FeatureCollection,
    pub rejected: Vec<Rejected>,
}

/// Parse a GeoJSON document into a validated collection.
pub fn parse_collection(text: &str, schema: &PropertySchema) -> Result<Ingested> {
    let geojson: GeoJson = text.parse().context("Failed to parse geometry document")?;
    ingest(geojson, schema)
}

/// Validate every feature of a GeoJSON FeatureCollection against `schema`.
///
/// Invalid features are skipped and reported in [`Ingested::rejected`]. The
/// whole document is rejected only when it is not a FeatureCollection or no
/// feature survives validation.
pub fn ingest(geojson: GeoJson, schema: &PropertySchema) -> Result<Ingested> {
    let GeoJson::FeatureCollection(fc) = geojson else {
        bail!("Geometry document is not a FeatureCollection");
    };

    let total = fc.features.len();
    let mut seen = HashSet::new();
    let mut features = Vec::with_capacity(total);
    let mut rejected = Vec::new();

    for (index, feature) in fc.features.into_iter().enumerate() {
        match area_from_feature(feature, schema) {
            Ok(area) if !seen.insert(area.id.clone()) => rejected.push(Rejected {
                index,
                error: FeatureError::DuplicateId(area.id),
            }),
            Ok(area) => features.push(area),
            Err(error) => rejected.push(Rejected { index, error }),
        }
    }

    for r in &rejected {
        warn!(index = r.index, error = %r.error, "skipping feature");
    }
    if features.is_empty() {
        bail!("No usable features in geometry document ({total} rejected)");
    }
    info!(features = features.len(), rejected = rejected.len(), "ingested feature collection");

    Ok(Ingested {
        collection: FeatureCollection::new(features),
        rejected,
    })
}

fn area_from_feature(
    feature: geojson::Feature,
    schema: &PropertySchema,
) -> Result<AreaFeature, FeatureError> {
    let geometry = feature.geometry.ok_or(FeatureError::MissingGeometry)?;
    let geometry = to_multipolygon(geometry.value)?;
    let mut properties = feature.properties.unwrap_or_default();

    let code_of = |props: &Map<String, Value>, key: &str| {
        props
            .get(key)
            .and_then(AreaCode::from_json)
            .ok_or_else(|| FeatureError::MissingProperty(key.to_string()))
    };

    let id = FeatureId::new(code_of(&properties, &schema.id_property)?.as_str());
    let code = code_of(&properties, &schema.code_property)?;
    let group = schema
        .group_property
        .as_deref()
        .and_then(|key| properties.get(key))
        .and_then(AreaCode::from_json);
    let name = match properties.remove(&schema.name_property) {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(FeatureError::MissingProperty(schema.name_property.clone())),
    };

    Ok(AreaFeature {
        id,
        code,
        name,
        group,
        geometry,
        extra: properties,
    })
}

fn to_multipolygon(value: geojson::Value) -> Result<MultiPolygon<f64>, FeatureError> {
    let type_name = geometry_type(&value).to_string();
    let geometry: Geometry<f64> = value
        .try_into()
        .map_err(|_| FeatureError::UnsupportedGeometry(type_name.clone()))?;
    let mp = match geometry {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        _ => return Err(FeatureError::UnsupportedGeometry(type_name)),
    };

    let finite = mp.0.iter().all(|poly| {
        std::iter::once(poly.exterior())
            .chain(poly.interiors())
            .flat_map(|ring| ring.0.iter())
            .all(|c| c.x.is_finite() && c.y.is_finite())
    });
    if !finite {
        return Err(FeatureError::InvalidCoordinates);
    }
    Ok(mp)
}

fn geometry_type(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}
