use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

use geo::{Coord, Intersects, LineString, MultiLineString, MultiPolygon, coord};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RoadSettings;
use crate::crs::Normalizer;
use crate::domain::{BasinGeometry, DataSource, Layer, LineFeature, VectorArtifact};
use crate::error::BasinError;
use crate::http::{build_client, handle_status, truncate};
use crate::source::SourceFetcher;

/// OSM tags copied onto every road edge when present.
const EDGE_TAGS: &[&str] = &[
    "highway", "name", "ref", "maxspeed", "lanes", "surface", "bridge", "tunnel", "access",
    "service", "junction",
];

/// Which slice of the OSM highway network to request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Drive,
    DriveService,
    Walk,
    Bike,
    All,
    #[default]
    AllPublic,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Drive => "drive",
            NetworkType::DriveService => "drive_service",
            NetworkType::Walk => "walk",
            NetworkType::Bike => "bike",
            NetworkType::All => "all",
            NetworkType::AllPublic => "all_public",
        }
    }

    /// Overpass QL tag filter applied to `way` statements.
    pub fn overpass_filter(&self) -> &'static str {
        match self {
            NetworkType::Drive => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|bridleway|bus_guideway|construction|corridor|cycleway|elevator|escalator|footway|no|path|pedestrian|planned|platform|proposed|raceway|razed|service|steps|track"]["motor_vehicle"!~"no"]["motorcar"!~"no"]["service"!~"alley|driveway|emergency_access|parking|parking_aisle|private"]"#
            }
            NetworkType::DriveService => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|bridleway|bus_guideway|construction|corridor|cycleway|elevator|escalator|footway|no|path|pedestrian|planned|platform|proposed|raceway|razed|steps|track"]["motor_vehicle"!~"no"]["motorcar"!~"no"]["service"!~"emergency_access|parking|parking_aisle|private"]"#
            }
            NetworkType::Walk => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|bus_guideway|construction|cycleway|motor|no|planned|platform|proposed|raceway|razed"]["foot"!~"no"]["service"!~"private"]"#
            }
            NetworkType::Bike => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|bus_guideway|construction|corridor|elevator|escalator|footway|motor|no|planned|platform|proposed|raceway|razed|steps"]["bicycle"!~"no"]["service"!~"private"]"#
            }
            NetworkType::All => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|construction|no|planned|platform|proposed|raceway|razed"]"#
            }
            NetworkType::AllPublic => {
                r#"["highway"]["area"!~"yes"]["highway"!~"abandoned|construction|no|planned|platform|proposed|raceway|razed"]["service"!~"private"]["access"!~"private"]"#
            }
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsmWay {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: BTreeMap<String, String>,
}

/// Raw OSM network: node coordinates (lon/lat) and the ways referencing them.
#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    pub nodes: HashMap<i64, Coord<f64>>,
    pub ways: Vec<OsmWay>,
}

/// One segment of a way between two graph nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadEdge {
    pub osmid: i64,
    pub u: i64,
    pub v: i64,
    pub tags: BTreeMap<String, String>,
    pub line: LineString<f64>,
}

impl RoadEdge {
    pub fn is_oneway(&self) -> bool {
        matches!(
            self.tags.get("oneway").map(String::as_str),
            Some("yes" | "true" | "1" | "-1" | "reversible")
        ) || self.tags.get("junction").map(String::as_str) == Some("roundabout")
    }
}

impl RoadGraph {
    /// Splits every way at its endpoints and at nodes shared with other ways
    /// (or revisited by the same way). Ways referencing unknown nodes are
    /// skipped. Edges come out ordered by way id, then position along the way.
    pub fn edges(&self) -> Vec<RoadEdge> {
        let mut references: HashMap<i64, usize> = HashMap::new();
        for way in &self.ways {
            for node in &way.nodes {
                *references.entry(*node).or_default() += 1;
            }
        }

        let mut ways: Vec<&OsmWay> = self.ways.iter().collect();
        ways.sort_by_key(|way| way.id);

        let mut edges = Vec::new();
        for way in ways {
            if way.nodes.len() < 2 {
                continue;
            }
            let coords: Option<Vec<Coord<f64>>> = way
                .nodes
                .iter()
                .map(|node| self.nodes.get(node).copied())
                .collect();
            let Some(coords) = coords else {
                tracing::warn!(way = way.id, "skipping way with unresolved nodes");
                continue;
            };

            let last = way.nodes.len() - 1;
            let mut start = 0;
            for idx in 1..=last {
                let split = idx == last || references.get(&way.nodes[idx]).copied().unwrap_or(0) > 1;
                if !split {
                    continue;
                }
                edges.push(RoadEdge {
                    osmid: way.id,
                    u: way.nodes[start],
                    v: way.nodes[idx],
                    tags: way.tags.clone(),
                    line: LineString::from(coords[start..=idx].to_vec()),
                });
                start = idx;
            }
        }
        edges
    }
}

pub trait RoadNetworkClient: Send + Sync {
    /// Road network inside `polygon` (lon/lat).
    fn fetch_network(
        &self,
        polygon: &MultiPolygon<f64>,
        network_type: NetworkType,
    ) -> Result<RoadGraph, BasinError>;
}

#[derive(Clone)]
pub struct OverpassHttpClient {
    client: Client,
    url: String,
}

impl OverpassHttpClient {
    pub fn new(settings: &RoadSettings, timeout_secs: u64) -> Result<Self, BasinError> {
        Ok(Self {
            client: build_client(DataSource::Roads, timeout_secs)?,
            url: settings.url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OsmElement>,
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OsmElement {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    #[serde(other)]
    Other,
}

impl RoadNetworkClient for OverpassHttpClient {
    fn fetch_network(
        &self,
        polygon: &MultiPolygon<f64>,
        network_type: NetworkType,
    ) -> Result<RoadGraph, BasinError> {
        let query = overpass_query(polygon, network_type);
        tracing::debug!(url = %self.url, network_type = %network_type, "overpass query");
        let response = self
            .client
            .post(&self.url)
            .form(&[("data", query)])
            .send()
            .map_err(|err| BasinError::unavailable(DataSource::Roads, err.to_string()))?;
        let response = handle_status(DataSource::Roads, response)?;
        let body: OverpassResponse = response
            .json()
            .map_err(|err| BasinError::unavailable(DataSource::Roads, err.to_string()))?;
        graph_from_response(body)
    }
}

fn graph_from_response(body: OverpassResponse) -> Result<RoadGraph, BasinError> {
    if let Some(remark) = body.remark.as_deref()
        && remark.contains("error")
    {
        return Err(BasinError::unavailable(DataSource::Roads, truncate(remark, 300)));
    }

    let mut graph = RoadGraph::default();
    for element in body.elements {
        match element {
            OsmElement::Node { id, lat, lon } => {
                graph.nodes.insert(id, coord! { x: lon, y: lat });
            }
            OsmElement::Way { id, nodes, tags } => graph.ways.push(OsmWay { id, nodes, tags }),
            OsmElement::Other => {}
        }
    }
    Ok(graph)
}

/// One `way` statement per polygon exterior, then recurse down to the nodes.
pub fn overpass_query(polygon: &MultiPolygon<f64>, network_type: NetworkType) -> String {
    let filter = network_type.overpass_filter();
    let statements: String = polygon
        .iter()
        .map(|part| {
            let ring = &part.exterior().0;
            let open = if ring.len() > 1 && ring.first() == ring.last() {
                &ring[..ring.len() - 1]
            } else {
                &ring[..]
            };
            let poly = open
                .iter()
                .map(|c| format!("{:.7} {:.7}", c.y, c.x))
                .collect::<Vec<_>>()
                .join(" ");
            format!("way{filter}(poly:\"{poly}\");")
        })
        .collect();
    format!("[out:json][timeout:180];({statements});(._;>;);out;")
}

pub struct RoadNetworkFetcher<C: RoadNetworkClient> {
    client: C,
    normalizer: Normalizer,
    network_type: NetworkType,
}

impl<C: RoadNetworkClient> RoadNetworkFetcher<C> {
    pub fn new(client: C, normalizer: Normalizer, network_type: NetworkType) -> Self {
        Self {
            client,
            normalizer,
            network_type,
        }
    }
}

impl<C: RoadNetworkClient> SourceFetcher for RoadNetworkFetcher<C> {
    type Artifact = VectorArtifact;

    fn data_source(&self) -> DataSource {
        DataSource::Roads
    }

    fn fetch(&self, geometry: &BasinGeometry) -> Result<VectorArtifact, BasinError> {
        let started = Instant::now();
        let geographic = self.normalizer.to_geographic(geometry);
        let graph = self
            .client
            .fetch_network(&geographic.shape, self.network_type)?;

        let features: Vec<LineFeature> = graph
            .edges()
            .into_iter()
            .filter(|edge| geographic.shape.iter().any(|part| part.intersects(&edge.line)))
            .map(edge_feature)
            .collect();
        if features.is_empty() {
            return Err(BasinError::EmptyResult {
                data_source: DataSource::Roads,
            });
        }

        let artifact = VectorArtifact {
            layer: Layer::Roads,
            crs: geographic.crs,
            features,
        };
        let mut artifact = self.normalizer.to_projected(&artifact);
        for feature in &mut artifact.features {
            let length = planar_length(&feature.geometry);
            feature
                .properties
                .insert("length".to_string(), Value::from(length));
        }

        tracing::info!(
            edges = artifact.len(),
            ways = graph.ways.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "road network fetched"
        );
        Ok(artifact)
    }
}

fn edge_feature(edge: RoadEdge) -> LineFeature {
    let mut properties = Map::new();
    properties.insert("osmid".to_string(), Value::from(edge.osmid));
    properties.insert("u".to_string(), Value::from(edge.u));
    properties.insert("v".to_string(), Value::from(edge.v));
    properties.insert("oneway".to_string(), Value::from(edge.is_oneway()));
    for key in EDGE_TAGS {
        if let Some(value) = edge.tags.get(*key) {
            properties.insert((*key).to_string(), Value::from(value.clone()));
        }
    }
    LineFeature {
        geometry: MultiLineString::new(vec![edge.line]),
        properties,
    }
}

pub(crate) fn planar_length(lines: &MultiLineString<f64>) -> f64 {
    lines
        .iter()
        .flat_map(|line| line.lines())
        .map(|segment| segment.dx().hypot(segment.dy()))
        .sum()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo::{Polygon, Rect};
    use serde_json::json;

    use super::*;
    use crate::crs::Crs;

    fn way(id: i64, nodes: &[i64], highway: &str) -> OsmWay {
        OsmWay {
            id,
            nodes: nodes.to_vec(),
            tags: BTreeMap::from([("highway".to_string(), highway.to_string())]),
        }
    }

    fn crossing_graph() -> RoadGraph {
        // way 10 runs west to east through node 2, way 20 runs south to north through it
        let nodes = HashMap::from([
            (1, coord! { x: -110.45, y: 35.1 }),
            (2, coord! { x: -110.40, y: 35.1 }),
            (3, coord! { x: -110.35, y: 35.1 }),
            (4, coord! { x: -110.40, y: 35.05 }),
            (5, coord! { x: -110.40, y: 35.15 }),
            (6, coord! { x: -110.37, y: 35.1 }),
        ]);
        RoadGraph {
            nodes,
            ways: vec![
                way(20, &[4, 2, 5], "track"),
                way(10, &[1, 2, 6, 3], "residential"),
            ],
        }
    }

    fn basin() -> BasinGeometry {
        let rect = Rect::new(coord! { x: -110.5, y: 35.0 }, coord! { x: -110.3, y: 35.2 });
        BasinGeometry::new(Crs::Wgs84, MultiPolygon::new(vec![rect.to_polygon()])).unwrap()
    }

    struct MockRoads(RoadGraph);

    impl RoadNetworkClient for MockRoads {
        fn fetch_network(
            &self,
            _polygon: &MultiPolygon<f64>,
            _network_type: NetworkType,
        ) -> Result<RoadGraph, BasinError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn ways_split_at_shared_nodes() {
        let edges = crossing_graph().edges();
        let pairs: Vec<(i64, i64, i64)> = edges.iter().map(|e| (e.osmid, e.u, e.v)).collect();
        assert_eq!(pairs, vec![(10, 1, 2), (10, 2, 3), (20, 4, 2), (20, 2, 5)]);
        // interior node 6 stays inside its segment
        assert_eq!(edges[1].line.0.len(), 3);
    }

    #[test]
    fn ways_with_missing_nodes_are_skipped() {
        let mut graph = crossing_graph();
        graph.ways.push(way(30, &[1, 99], "service"));
        assert!(graph.edges().iter().all(|edge| edge.osmid != 30));
    }

    #[test]
    fn parses_overpass_elements() {
        let body: OverpassResponse = serde_json::from_value(json!({
            "elements": [
                { "type": "node", "id": 1, "lat": 35.1, "lon": -110.4 },
                { "type": "node", "id": 2, "lat": 35.2, "lon": -110.4 },
                { "type": "way", "id": 7, "nodes": [1, 2], "tags": { "highway": "primary", "oneway": "yes" } },
                { "type": "relation", "id": 9, "members": [] }
            ]
        }))
        .unwrap();
        let graph = graph_from_response(body).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.ways.len(), 1);
        assert!(graph.edges()[0].is_oneway());
    }

    #[test]
    fn overpass_runtime_error_is_unavailable() {
        let body: OverpassResponse = serde_json::from_value(json!({
            "elements": [],
            "remark": "runtime error: Query timed out"
        }))
        .unwrap();
        assert_matches!(
            graph_from_response(body),
            Err(BasinError::SourceUnavailable {
                data_source: DataSource::Roads,
                ..
            })
        );
    }

    #[test]
    fn query_lists_lat_lon_pairs_without_closing_point() {
        let square = Polygon::new(
            LineString::from(vec![(-110.5, 35.0), (-110.3, 35.0), (-110.3, 35.2), (-110.5, 35.0)]),
            vec![],
        );
        let query = overpass_query(&MultiPolygon::new(vec![square]), NetworkType::Drive);
        assert!(query.starts_with("[out:json]"));
        assert!(query.contains(r#"(poly:"35.0000000 -110.5000000 35.0000000 -110.3000000 35.2000000 -110.3000000")"#));
        assert!(query.contains(r#"["motorcar"!~"no"]"#));
        assert!(query.ends_with("(._;>;);out;"));
    }

    #[test]
    fn fetcher_keeps_intersecting_edges_in_projected_crs() {
        let mut graph = crossing_graph();
        graph.nodes.insert(40, coord! { x: -109.0, y: 36.0 });
        graph.nodes.insert(41, coord! { x: -109.1, y: 36.0 });
        graph.ways.push(way(40, &[40, 41], "primary"));

        let normalizer = Normalizer::new(Crs::Wgs84, Crs::from_epsg(32612).unwrap()).unwrap();
        let fetcher = RoadNetworkFetcher::new(MockRoads(graph), normalizer, NetworkType::AllPublic);
        let artifact = fetcher.fetch(&basin()).unwrap();

        assert_eq!(artifact.crs, normalizer.projected());
        assert_eq!(artifact.len(), 4);
        let first = &artifact.features[0].properties;
        assert_eq!(first["osmid"], 10);
        assert_eq!(first["highway"], "residential");
        let length = first["length"].as_f64().unwrap();
        // 0.05 degrees of longitude at 35.1N is roughly 4.5 km
        assert!((4400.0..4700.0).contains(&length), "length {length}");
    }

    #[test]
    fn fetcher_reports_empty_network() {
        let normalizer = Normalizer::new(Crs::Wgs84, Crs::from_epsg(32612).unwrap()).unwrap();
        let fetcher =
            RoadNetworkFetcher::new(MockRoads(RoadGraph::default()), normalizer, NetworkType::All);
        assert_matches!(
            fetcher.fetch(&basin()),
            Err(BasinError::EmptyResult {
                data_source: DataSource::Roads
            })
        );
    }
}
