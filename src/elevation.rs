use std::time::Instant;

use geo::Rect;
use reqwest::blocking::Client;

use crate::config::ElevationSettings;
use crate::crs::{Crs, Normalizer};
use crate::domain::{BasinGeometry, DataSource, RasterArtifact};
use crate::error::BasinError;
use crate::geotiff::{Georeference, decode_dem};
use crate::http::{build_client, handle_status};
use crate::source::SourceFetcher;

/// One exportImage call: `extent` in `crs`, rendered at `width` x `height`.
#[derive(Debug, Clone, PartialEq)]
pub struct DemRequest {
    pub extent: Rect<f64>,
    pub crs: Crs,
    pub width: u32,
    pub height: u32,
    pub nodata: f32,
}

pub trait ElevationClient: Send + Sync {
    fn export_dem(&self, request: &DemRequest) -> Result<RasterArtifact, BasinError>;
}

/// USGS 3DEP elevation ImageServer.
#[derive(Clone)]
pub struct ThreeDepHttpClient {
    client: Client,
    url: String,
}

impl ThreeDepHttpClient {
    pub fn new(settings: &ElevationSettings, timeout_secs: u64) -> Result<Self, BasinError> {
        Ok(Self {
            client: build_client(DataSource::Elevation, timeout_secs)?,
            url: settings.url.clone(),
        })
    }
}

impl ElevationClient for ThreeDepHttpClient {
    fn export_dem(&self, request: &DemRequest) -> Result<RasterArtifact, BasinError> {
        let min = request.extent.min();
        let max = request.extent.max();
        let epsg = request.crs.epsg().to_string();
        let params = [
            ("bbox", format!("{},{},{},{}", min.x, min.y, max.x, max.y)),
            ("bboxSR", epsg.clone()),
            ("imageSR", epsg),
            ("size", format!("{},{}", request.width, request.height)),
            ("format", "tiff".to_string()),
            ("pixelType", "F32".to_string()),
            ("noData", request.nodata.to_string()),
            ("noDataInterpretation", "esriNoDataMatchAny".to_string()),
            ("interpolation", "RSP_BilinearInterpolation".to_string()),
            ("f", "image".to_string()),
        ];
        tracing::debug!(url = %self.url, width = request.width, height = request.height, "3DEP exportImage");

        let response = self
            .client
            .get(&self.url)
            .query(&params)
            .send()
            .map_err(|err| BasinError::unavailable(DataSource::Elevation, err.to_string()))?;
        let response = handle_status(DataSource::Elevation, response)?;
        let bytes = response
            .bytes()
            .map_err(|err| BasinError::unavailable(DataSource::Elevation, err.to_string()))?;

        let fallback = Georeference {
            crs: request.crs,
            extent: request.extent,
        };
        decode_dem(&bytes, fallback, request.nodata).map_err(|err| {
            BasinError::unavailable(DataSource::Elevation, format!("invalid GeoTIFF: {err}"))
        })
    }
}

pub struct ElevationFetcher<C: ElevationClient> {
    client: C,
    normalizer: Normalizer,
    native_crs: Crs,
    resolution_m: f64,
    nodata: f32,
    max_image_size: u32,
}

impl<C: ElevationClient> ElevationFetcher<C> {
    pub fn new(client: C, normalizer: Normalizer, settings: &ElevationSettings) -> Self {
        Self {
            client,
            normalizer,
            native_crs: settings.native_crs,
            resolution_m: settings.resolution_m,
            nodata: settings.nodata,
            max_image_size: settings.max_image_size,
        }
    }

    /// Request covering the geometry's bounding box in the service's native
    /// system, sized so pixels are `resolution_m` wide in the projected system.
    pub fn plan(&self, geometry: &BasinGeometry) -> Result<DemRequest, BasinError> {
        let geographic = self.normalizer.to_geographic(geometry);
        let bbox = geographic.bounding_rect().ok_or_else(|| {
            BasinError::InvalidGeometry("basin polygon has no extent".to_string())
        })?;

        let projected = Normalizer::reproject_rect(bbox, geographic.crs, self.normalizer.projected());
        let width = (projected.width() / self.resolution_m).ceil().max(1.0) as u32;
        let height = (projected.height() / self.resolution_m).ceil().max(1.0) as u32;
        if width > self.max_image_size || height > self.max_image_size {
            return Err(BasinError::RequestTooLarge {
                data_source: DataSource::Elevation,
                width,
                height,
                max: self.max_image_size,
            });
        }

        Ok(DemRequest {
            extent: Normalizer::reproject_rect(bbox, geographic.crs, self.native_crs),
            crs: self.native_crs,
            width,
            height,
            nodata: self.nodata,
        })
    }
}

impl<C: ElevationClient> SourceFetcher for ElevationFetcher<C> {
    type Artifact = RasterArtifact;

    fn data_source(&self) -> DataSource {
        DataSource::Elevation
    }

    fn fetch(&self, geometry: &BasinGeometry) -> Result<RasterArtifact, BasinError> {
        let started = Instant::now();
        let request = self.plan(geometry)?;
        let native = self.client.export_dem(&request)?;
        if native.valid_cells() == 0 {
            return Err(BasinError::EmptyResult {
                data_source: DataSource::Elevation,
            });
        }

        let raster = self
            .normalizer
            .raster_to_projected(&native, self.resolution_m, self.nodata);
        let valid = raster.valid_cells();
        if valid == 0 {
            return Err(BasinError::EmptyResult {
                data_source: DataSource::Elevation,
            });
        }

        let (rows, cols) = raster.shape();
        tracing::info!(
            rows,
            cols,
            valid,
            native = %native.crs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "elevation fetched"
        );
        Ok(raster)
    }
}
