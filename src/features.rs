//! Feature collections exchanged with the boundary and hydrography services
//! and written as output layers. Decoding and encoding go through the
//! `geojson` crate; geometries are held as `geo` types.

use geo::{Geometry, MultiLineString, MultiPolygon};
use geojson::{GeoJson, JsonObject};
use serde_json::{Map, Value, json};

use crate::crs::Crs;
use crate::domain::VectorArtifact;

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct FeatureCollection {
    pub name: Option<String>,
    pub crs: Option<Crs>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Converts a decoded collection, reading the layer name and the OGC
    /// `crs` member from its foreign members.
    pub fn from_geojson(collection: geojson::FeatureCollection) -> Result<Self, String> {
        let members = collection.foreign_members.unwrap_or_default();
        let crs = match members
            .get("crs")
            .and_then(|crs| crs.get("properties"))
            .and_then(|props| props.get("name"))
            .and_then(Value::as_str)
        {
            Some(urn) => Some(Crs::from_urn(urn).map_err(|err| err.to_string())?),
            None => None,
        };

        let features = collection
            .features
            .into_iter()
            .map(|feature| {
                let geometry = feature
                    .geometry
                    .map(|geometry| Geometry::<f64>::try_from(&geometry.value))
                    .transpose()
                    .map_err(|err| err.to_string())?;
                Ok(Feature {
                    geometry,
                    properties: feature.properties.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self {
            name: members.get("name").and_then(Value::as_str).map(str::to_string),
            crs,
            features,
        })
    }
}

pub fn parse_feature_collection(value: Value) -> Result<FeatureCollection, String> {
    match GeoJson::from_json_value(value).map_err(|err| err.to_string())? {
        GeoJson::FeatureCollection(collection) => FeatureCollection::from_geojson(collection),
        GeoJson::Feature(_) => Err("expected FeatureCollection, found Feature".to_string()),
        GeoJson::Geometry(_) => Err("expected FeatureCollection, found Geometry".to_string()),
    }
}

/// Widens polygonal geometry to a multipolygon; other kinds yield `None`.
pub fn into_multi_polygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        _ => None,
    }
}

/// Widens linear geometry to a multilinestring; other kinds yield `None`.
pub fn into_multi_line_string(geometry: Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::LineString(line) => Some(MultiLineString::new(vec![line])),
        Geometry::MultiLineString(multi) => Some(multi),
        _ => None,
    }
}

pub fn feature(geometry: geojson::Value, properties: JsonObject) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Named FeatureCollection with an explicit `crs` member, which GDAL reads as
/// the layer name and spatial reference.
pub fn named_collection(name: &str, crs: Crs, features: Vec<geojson::Feature>) -> GeoJson {
    let mut members = JsonObject::new();
    members.insert("name".to_string(), json!(name));
    members.insert(
        "crs".to_string(),
        json!({ "type": "name", "properties": { "name": crs.urn() } }),
    );
    GeoJson::FeatureCollection(geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })
}

pub fn vector_layer(artifact: &VectorArtifact) -> GeoJson {
    let features = artifact
        .features
        .iter()
        .map(|line| feature(geojson::Value::from(&line.geometry), line.properties.clone()))
        .collect();
    named_collection(artifact.layer.name(), artifact.crs, features)
}
