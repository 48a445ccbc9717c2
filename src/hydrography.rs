use std::time::Instant;

use geo::Intersects;

use crate::arcgis::{ArcGisLayer, esri_polygon};
use crate::config::HydrographySettings;
use crate::crs::{Crs, Normalizer, Reproject};
use crate::domain::{BasinGeometry, DataSource, Layer, LineFeature, VectorArtifact};
use crate::error::BasinError;
use crate::features::{FeatureCollection, into_multi_line_string};
use crate::http::build_client;
use crate::source::SourceFetcher;

pub trait HydrographyClient: Send + Sync {
    /// Flowlines intersecting the polygon, in whatever system the service
    /// answers with.
    fn flowlines_within(&self, geometry: &BasinGeometry) -> Result<FeatureCollection, BasinError>;
}

/// NHDPlus HR flowline layer.
#[derive(Clone)]
pub struct NhdHrHttpClient {
    layer: ArcGisLayer,
    out_crs: Crs,
}

impl NhdHrHttpClient {
    pub fn new(settings: &HydrographySettings, timeout_secs: u64) -> Result<Self, BasinError> {
        let client = build_client(DataSource::Hydrography, timeout_secs)?;
        Ok(Self {
            layer: ArcGisLayer::new(
                client,
                &settings.url,
                DataSource::Hydrography,
                settings.page_size,
            ),
            out_crs: settings.out_crs,
        })
    }
}

impl HydrographyClient for NhdHrHttpClient {
    fn flowlines_within(&self, geometry: &BasinGeometry) -> Result<FeatureCollection, BasinError> {
        let params = [
            ("geometry", esri_polygon(&geometry.shape, geometry.crs).to_string()),
            ("geometryType", "esriGeometryPolygon".to_string()),
            ("inSR", geometry.crs.epsg().to_string()),
            ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ("outFields", "*".to_string()),
            ("outSR", self.out_crs.epsg().to_string()),
        ];
        let (features, crs) = self.layer.query(&params)?;
        Ok(FeatureCollection {
            name: Some(Layer::Flowlines.name().to_string()),
            crs: crs.or(Some(self.out_crs)),
            features,
        })
    }
}

pub struct HydrographyFetcher<C: HydrographyClient> {
    client: C,
    normalizer: Normalizer,
}

impl<C: HydrographyClient> HydrographyFetcher<C> {
    pub fn new(client: C, normalizer: Normalizer) -> Self {
        Self { client, normalizer }
    }
}

impl<C: HydrographyClient> SourceFetcher for HydrographyFetcher<C> {
    type Artifact = VectorArtifact;

    fn data_source(&self) -> DataSource {
        DataSource::Hydrography
    }

    fn fetch(&self, geometry: &BasinGeometry) -> Result<VectorArtifact, BasinError> {
        let started = Instant::now();
        let geographic = self.normalizer.to_geographic(geometry);
        let collection = self.client.flowlines_within(&geographic)?;
        let native = collection.crs.unwrap_or(geographic.crs);
        let received = collection.features.len();

        // exact intersection against the polygon
        let clip = geographic.reprojected(native);
        let features: Vec<LineFeature> = collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let lines = into_multi_line_string(feature.geometry?)?;
                let hits = lines
                    .iter()
                    .any(|line| clip.shape.iter().any(|part| part.intersects(line)));
                hits.then_some(LineFeature {
                    geometry: lines,
                    properties: feature.properties,
                })
            })
            .collect();
        if features.is_empty() {
            return Err(BasinError::EmptyResult {
                data_source: DataSource::Hydrography,
            });
        }

        let artifact = VectorArtifact {
            layer: Layer::Flowlines,
            crs: native,
            features,
        };
        let artifact = self.normalizer.to_projected(&artifact);
        tracing::info!(
            flowlines = artifact.len(),
            dropped = received - artifact.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hydrography fetched"
        );
        Ok(artifact)
    }
}
