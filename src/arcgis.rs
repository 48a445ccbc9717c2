//! Paginated feature queries against ArcGIS REST map-service layers, shared by
//! the boundary and hydrography clients.

use geo::{MultiPolygon, Orient, orient::Direction};
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::crs::Crs;
use crate::domain::DataSource;
use crate::error::BasinError;
use crate::features::{Feature, parse_feature_collection};
use crate::http::{handle_status, truncate};

#[derive(Clone)]
pub struct ArcGisLayer {
    client: Client,
    url: String,
    data_source: DataSource,
    page_size: u32,
}

impl ArcGisLayer {
    pub fn new(client: Client, url: &str, data_source: DataSource, page_size: u32) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            data_source,
            page_size,
        }
    }

    pub fn query_url(&self) -> String {
        format!("{}/query", self.url)
    }

    /// Runs a GeoJSON query, following `exceededTransferLimit` pages until the
    /// layer is exhausted. Returns the features and the CRS the service
    /// declared, if any.
    pub fn query(
        &self,
        params: &[(&str, String)],
    ) -> Result<(Vec<Feature>, Option<Crs>), BasinError> {
        let url = self.query_url();
        let mut features = Vec::new();
        let mut crs = None;
        let mut offset = 0usize;

        loop {
            let mut form: Vec<(&str, String)> = params.to_vec();
            form.push(("f", "geojson".to_string()));
            form.push(("returnGeometry", "true".to_string()));
            form.push(("resultOffset", offset.to_string()));
            form.push(("resultRecordCount", self.page_size.to_string()));

            tracing::debug!(url = %url, offset, "{} query", self.data_source);
            let response = self
                .client
                .post(&url)
                .form(&form)
                .send()
                .map_err(|err| BasinError::unavailable(self.data_source, err.to_string()))?;
            let response = handle_status(self.data_source, response)?;
            let body: Value = response
                .json()
                .map_err(|err| BasinError::unavailable(self.data_source, err.to_string()))?;

            if let Some(error) = body.get("error") {
                return Err(BasinError::unavailable(
                    self.data_source,
                    truncate(&error.to_string(), 300),
                ));
            }

            let more = exceeded_transfer_limit(&body);
            let page = parse_feature_collection(body)
                .map_err(|err| BasinError::unavailable(self.data_source, err))?;
            crs = crs.or(page.crs);
            let count = page.features.len();
            features.extend(page.features);

            if count == 0 || !more {
                break;
            }
            offset += count;
        }

        Ok((features, crs))
    }
}

fn exceeded_transfer_limit(body: &Value) -> bool {
    body.get("exceededTransferLimit")
        .or_else(|| {
            body.get("properties")
                .and_then(|props| props.get("exceededTransferLimit"))
        })
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Esri JSON polygon: every ring of every part, exteriors clockwise and holes
/// counter-clockwise.
pub fn esri_polygon(shape: &MultiPolygon<f64>, crs: Crs) -> Value {
    let mut rings = Vec::new();
    for polygon in shape.iter() {
        let oriented = polygon.orient(Direction::Reversed);
        for ring in std::iter::once(oriented.exterior()).chain(oriented.interiors()) {
            rings.push(Value::Array(
                ring.coords().map(|c| json!([c.x, c.y])).collect(),
            ));
        }
    }
    json!({
        "rings": rings,
        "spatialReference": { "wkid": crs.epsg() },
    })
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Polygon};

    use super::*;

    #[test]
    fn transfer_limit_flag_locations() {
        assert!(exceeded_transfer_limit(&json!({ "exceededTransferLimit": true })));
        assert!(exceeded_transfer_limit(
            &json!({ "properties": { "exceededTransferLimit": true } })
        ));
        assert!(!exceeded_transfer_limit(&json!({ "features": [] })));
    }

    #[test]
    fn esri_rings_are_clockwise() {
        // counter-clockwise input
        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let value = esri_polygon(&MultiPolygon::new(vec![square]), Crs::Wgs84);
        assert_eq!(value["spatialReference"]["wkid"], 4326);
        let ring = value["rings"][0].as_array().unwrap();
        let area2: f64 = ring
            .windows(2)
            .map(|w| {
                let (x0, y0) = (w[0][0].as_f64().unwrap(), w[0][1].as_f64().unwrap());
                let (x1, y1) = (w[1][0].as_f64().unwrap(), w[1][1].as_f64().unwrap());
                x0 * y1 - x1 * y0
            })
            .sum();
        assert!(area2 < 0.0);
    }
}
