//! Watershed boundary index: a read-through, never-invalidated disk cache of
//! every HUC10 polygon in the configured region.

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use geo::MultiPolygon;
use regex::Regex;
use serde::Serialize;
use geojson::{GeoJson, JsonObject};
use serde_json::{Value, json};

use crate::arcgis::ArcGisLayer;
use crate::config::{BoundarySettings, Region};
use crate::crs::{Crs, Reproject};
use crate::domain::{BasinGeometry, BasinId, DataSource};
use crate::error::BasinError;
use crate::features::{
    FeatureCollection, feature, into_multi_polygon, named_collection, parse_feature_collection,
};
use crate::http::build_client;
use crate::store::Store;

pub const INDEX_LAYER: &str = "huc10";

pub trait BoundaryClient: Send + Sync {
    /// All boundary features whose `states` attribute mentions `region`.
    fn fetch_region(&self, region: &Region) -> Result<FeatureCollection, BasinError>;
}

#[derive(Clone)]
pub struct WbdHttpClient {
    layer: ArcGisLayer,
    out_crs: Crs,
}

impl WbdHttpClient {
    pub fn new(settings: &BoundarySettings, timeout_secs: u64) -> Result<Self, BasinError> {
        let client = build_client(DataSource::Boundary, timeout_secs)?;
        Ok(Self {
            layer: ArcGisLayer::new(client, &settings.url, DataSource::Boundary, settings.page_size),
            out_crs: settings.out_crs,
        })
    }
}

impl BoundaryClient for WbdHttpClient {
    fn fetch_region(&self, region: &Region) -> Result<FeatureCollection, BasinError> {
        let params = [
            ("where", format!("states LIKE '%{}%'", region.as_str())),
            ("outFields", "huc10,name,states".to_string()),
            ("outSR", self.out_crs.epsg().to_string()),
        ];
        let (features, crs) = self.layer.query(&params)?;
        Ok(FeatureCollection {
            name: Some(INDEX_LAYER.to_string()),
            crs: crs.or(Some(self.out_crs)),
            features,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryIndexEntry {
    pub id: BasinId,
    pub name: String,
    pub shape: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasinSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BoundaryIndex {
    crs: Crs,
    entries: Vec<BoundaryIndexEntry>,
}

impl BoundaryIndex {
    pub fn new(crs: Crs, entries: Vec<BoundaryIndexEntry>) -> Self {
        Self { crs, entries }
    }

    /// Builds an index from a raw service response, mapping whatever the
    /// service calls its id and name columns onto `id` and `name`. Features
    /// without polygon geometry and repeated ids are dropped.
    pub fn from_service(collection: FeatureCollection, default_crs: Crs) -> Self {
        let crs = collection.crs.unwrap_or(default_crs);
        let id_column = Regex::new(r"(?i)^(huc_?\d{1,2}|id)$").unwrap();
        let name_column = Regex::new(r"(?i)^(name|hu_?\d{0,2}_?name)$").unwrap();

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for feature in collection.features {
            let id = column_value(&feature.properties, &id_column);
            let name = column_value(&feature.properties, &name_column).unwrap_or_default();
            let Some(id) = id.and_then(|value| value.parse::<BasinId>().ok()) else {
                tracing::warn!("dropping boundary feature without an id");
                continue;
            };
            let shape = feature.geometry.and_then(into_multi_polygon);
            let Some(shape) = shape.filter(|shape| !shape.0.is_empty()) else {
                tracing::warn!(basin = %id, "dropping boundary feature without polygon geometry");
                continue;
            };
            if !seen.insert(id.clone()) {
                tracing::warn!(basin = %id, "dropping duplicate boundary feature");
                continue;
            }
            entries.push(BoundaryIndexEntry { id, name, shape });
        }

        Self { crs, entries }
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        let collection = parse_feature_collection(value)?;
        let crs = collection.crs.unwrap_or(Crs::Wgs84);
        let entries = collection
            .features
            .into_iter()
            .map(|feature| {
                let id = feature
                    .properties
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "index entry has no id".to_string())?
                    .parse::<BasinId>()
                    .map_err(|err| err.to_string())?;
                let name = feature
                    .properties
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let shape = feature
                    .geometry
                    .and_then(into_multi_polygon)
                    .ok_or_else(|| format!("index entry {id} has no polygon"))?;
                Ok(BoundaryIndexEntry { id, name, shape })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { crs, entries })
    }

    pub fn to_geojson(&self) -> GeoJson {
        let features = self
            .entries
            .iter()
            .map(|entry| {
                let mut properties = JsonObject::new();
                properties.insert("id".to_string(), json!(entry.id.as_str()));
                properties.insert("name".to_string(), json!(entry.name));
                feature(geojson::Value::from(&entry.shape), properties)
            })
            .collect();
        named_collection(INDEX_LAYER, self.crs, features)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn entries(&self) -> &[BoundaryIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &BasinId) -> Option<&BoundaryIndexEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Id/name pairs ordered by display name, then id.
    pub fn summaries(&self) -> Vec<BasinSummary> {
        let mut summaries = self
            .entries
            .iter()
            .map(|entry| BasinSummary {
                id: entry.id.to_string(),
                name: entry.name.clone(),
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}

fn column_value(properties: &serde_json::Map<String, Value>, column: &Regex) -> Option<String> {
    properties
        .iter()
        .find(|(key, _)| column.is_match(key))
        .and_then(|(_, value)| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

/// Sole owner and writer of the on-disk boundary index. The index is built
/// from the remote service on first use and never refreshed; delete the file
/// to force a rebuild. Failed builds are not remembered.
pub struct BoundaryIndexCache<C: BoundaryClient> {
    client: C,
    store: Store,
    region: Region,
    default_crs: Crs,
    loaded: Mutex<Option<Arc<BoundaryIndex>>>,
}

impl<C: BoundaryClient> BoundaryIndexCache<C> {
    pub fn new(client: C, store: Store, region: Region, default_crs: Crs) -> Self {
        Self {
            client,
            store,
            region,
            default_crs,
            loaded: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn ensure_index_loaded(&self) -> Result<Arc<BoundaryIndex>, BasinError> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| BasinError::Filesystem("boundary index lock poisoned".to_string()))?;
        if let Some(index) = loaded.as_ref() {
            return Ok(Arc::clone(index));
        }

        let path = self.store.index_path(&self.region);
        let index = if path.as_std_path().exists() {
            let content = fs::read(path.as_std_path())
                .map_err(|err| BasinError::Filesystem(err.to_string()))?;
            let value: Value =
                serde_json::from_slice(&content).map_err(|err| BasinError::IndexCorrupt {
                    path: path.to_string(),
                    message: err.to_string(),
                })?;
            let index = BoundaryIndex::from_value(value).map_err(|message| {
                BasinError::IndexCorrupt {
                    path: path.to_string(),
                    message,
                }
            })?;
            tracing::debug!(path = %path, entries = index.len(), "loaded boundary index");
            index
        } else {
            tracing::info!(region = self.region.as_str(), "building boundary index");
            let start = std::time::Instant::now();
            let collection = self.client.fetch_region(&self.region)?;
            let index = BoundaryIndex::from_service(collection, self.default_crs);
            if index.is_empty() {
                return Err(BasinError::EmptyResult {
                    data_source: DataSource::Boundary,
                });
            }
            self.store.ensure_data_root()?;
            let content = index.to_geojson().to_string();
            Store::write_bytes_atomic(&path, content.as_bytes())?;
            tracing::info!(
                path = %path,
                entries = index.len(),
                latency_ms = start.elapsed().as_millis() as u64,
                "boundary index written"
            );
            index
        };

        let index = Arc::new(index);
        *loaded = Some(Arc::clone(&index));
        Ok(index)
    }

    pub fn list(&self) -> Result<Vec<BasinSummary>, BasinError> {
        Ok(self.ensure_index_loaded()?.summaries())
    }

    /// Display name and geometry of `id`, reprojected to `crs` when the index
    /// is stored in a different system.
    pub fn lookup(&self, id: &BasinId, crs: Crs) -> Result<(String, BasinGeometry), BasinError> {
        let index = self.ensure_index_loaded()?;
        let entry = index
            .get(id)
            .ok_or_else(|| BasinError::NotFound(id.to_string()))?;
        let geometry = BasinGeometry::new(index.crs(), entry.shape.clone())?;
        let geometry = if geometry.crs != crs {
            geometry.reprojected(crs)
        } else {
            geometry
        };
        Ok((entry.name.clone(), geometry))
    }

    pub fn resolve(&self, id: &BasinId, crs: Crs) -> Result<BasinGeometry, BasinError> {
        self.lookup(id, crs).map(|(_, geometry)| geometry)
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Polygon};

    use super::*;
    use crate::features::Feature;

    fn square(x: f64) -> geo::Geometry<f64> {
        geo::Geometry::Polygon(Polygon::new(
            LineString::from(vec![(x, 0.0), (x + 1.0, 0.0), (x + 1.0, 1.0), (x, 0.0)]),
            vec![],
        ))
    }

    fn feature(props: Value, geometry: Option<geo::Geometry<f64>>) -> Feature {
        Feature {
            geometry,
            properties: props.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn service_columns_are_normalized() {
        let collection = FeatureCollection {
            name: None,
            crs: None,
            features: vec![
                feature(json!({ "HUC10": "1502001602", "Name": "Upper Creek" }), Some(square(0.0))),
                feature(json!({ "huc10": "1502001603", "hu_10_name": "Lower Creek" }), Some(square(1.0))),
                feature(json!({ "huc10": "1502001602", "name": "Duplicate" }), Some(square(2.0))),
                feature(json!({ "huc10": "1502001604", "name": "No geometry" }), None),
                feature(json!({ "name": "No id" }), Some(square(3.0))),
            ],
        };
        let index = BoundaryIndex::from_service(collection, Crs::Wgs84);
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].name, "Upper Creek");
        assert_eq!(index.entries()[1].name, "Lower Creek");
    }

    #[test]
    fn index_value_round_trip_keeps_crs() {
        let collection = FeatureCollection {
            name: None,
            crs: Some(Crs::WebMercator),
            features: vec![feature(json!({ "huc10": "1", "name": "A" }), Some(square(0.0)))],
        };
        let index = BoundaryIndex::from_service(collection, Crs::Wgs84);
        let value: Value = serde_json::from_str(&index.to_geojson().to_string()).unwrap();
        let restored = BoundaryIndex::from_value(value).unwrap();
        assert_eq!(restored.crs(), Crs::WebMercator);
        assert_eq!(restored.entries(), index.entries());
    }

    #[test]
    fn summaries_sorted_by_name() {
        let index = BoundaryIndex::new(
            Crs::Wgs84,
            vec![
                BoundaryIndexEntry {
                    id: "2".parse().unwrap(),
                    name: "Zuni River".to_string(),
                    shape: into_multi_polygon(square(0.0)).unwrap(),
                },
                BoundaryIndexEntry {
                    id: "1".parse().unwrap(),
                    name: "Agua Fria".to_string(),
                    shape: into_multi_polygon(square(1.0)).unwrap(),
                },
            ],
        );
        let names = index
            .summaries()
            .into_iter()
            .map(|summary| summary.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Agua Fria", "Zuni River"]);
    }
}
