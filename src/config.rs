use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::BasinError;
use crate::roads::NetworkType;

pub const DEFAULT_CONFIG_FILE: &str = "basin-dm.json";

pub const WBD_HUC10_URL: &str = "https://hydro.nationalmap.gov/arcgis/rest/services/wbd/MapServer/5";
pub const THREE_DEP_URL: &str =
    "https://elevation.nationalmap.gov/arcgis/rest/services/3DEPElevation/ImageServer/exportImage";
pub const NHDPLUS_HR_FLOWLINE_URL: &str =
    "https://hydro.nationalmap.gov/arcgis/rest/services/NHDPlus_HR/MapServer/3";
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub geographic_crs: Option<u32>,
    #[serde(default)]
    pub projected_crs: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub concurrent_fetch: Option<bool>,
    #[serde(default)]
    pub boundary: BoundaryEntry,
    #[serde(default)]
    pub elevation: ElevationEntry,
    #[serde(default)]
    pub hydrography: HydrographyEntry,
    #[serde(default)]
    pub roads: RoadsEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BoundaryEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub out_crs: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ElevationEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub native_crs: Option<u32>,
    #[serde(default)]
    pub resolution_m: Option<f64>,
    #[serde(default)]
    pub nodata: Option<f32>,
    #[serde(default)]
    pub max_image_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HydrographyEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub out_crs: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RoadsEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub network_type: Option<NetworkType>,
}

/// Two-letter region code used in the boundary service's `states` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region(String);

impl Region {
    pub fn new(value: &str) -> Result<Self, BasinError> {
        let normalized = value.trim().to_uppercase();
        let pattern = Regex::new(r"^[A-Z]{2}$").unwrap();
        if !pattern.is_match(&normalized) {
            return Err(BasinError::InvalidRegion(value.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct BoundarySettings {
    pub url: String,
    pub out_crs: Crs,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct ElevationSettings {
    pub url: String,
    pub native_crs: Crs,
    pub resolution_m: f64,
    pub nodata: f32,
    pub max_image_size: u32,
}

#[derive(Debug, Clone)]
pub struct HydrographySettings {
    pub url: String,
    pub out_crs: Crs,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct RoadSettings {
    pub url: String,
    pub network_type: NetworkType,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: Utf8PathBuf,
    pub region: Region,
    pub geographic_crs: Crs,
    pub projected_crs: Crs,
    pub timeout_secs: u64,
    pub concurrent_fetch: bool,
    pub boundary: BoundarySettings,
    pub elevation: ElevationSettings,
    pub hydrography: HydrographySettings,
    pub roads: RoadSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the given file, or `basin-dm.json` when present, falling back to
    /// built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BasinError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BasinError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BasinError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BasinError> {
        let boundary = BoundarySettings {
            url: config
                .boundary
                .url
                .unwrap_or_else(|| WBD_HUC10_URL.to_string()),
            out_crs: Crs::from_epsg(config.boundary.out_crs.unwrap_or(4326))?,
            page_size: config.boundary.page_size.unwrap_or(1000).max(1),
        };

        let elevation = ElevationSettings {
            url: config
                .elevation
                .url
                .unwrap_or_else(|| THREE_DEP_URL.to_string()),
            native_crs: Crs::from_epsg(config.elevation.native_crs.unwrap_or(3857))?,
            resolution_m: config.elevation.resolution_m.unwrap_or(30.0),
            nodata: config.elevation.nodata.unwrap_or(-9999.0),
            max_image_size: config.elevation.max_image_size.unwrap_or(8000),
        };
        if !(elevation.resolution_m.is_finite() && elevation.resolution_m > 0.0) {
            return Err(BasinError::ConfigParse(format!(
                "elevation.resolution_m must be positive, got {}",
                elevation.resolution_m
            )));
        }

        let hydrography = HydrographySettings {
            url: config
                .hydrography
                .url
                .unwrap_or_else(|| NHDPLUS_HR_FLOWLINE_URL.to_string()),
            out_crs: Crs::from_epsg(config.hydrography.out_crs.unwrap_or(4326))?,
            page_size: config.hydrography.page_size.unwrap_or(1000).max(1),
        };

        let roads = RoadSettings {
            url: config.roads.url.unwrap_or_else(|| OVERPASS_URL.to_string()),
            network_type: config.roads.network_type.unwrap_or_default(),
        };

        Ok(ResolvedConfig {
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
            region: Region::new(config.region.as_deref().unwrap_or("AZ"))?,
            geographic_crs: Crs::from_epsg(config.geographic_crs.unwrap_or(4326))?,
            projected_crs: Crs::from_epsg(config.projected_crs.unwrap_or(32612))?,
            timeout_secs: config.timeout_secs.unwrap_or(60),
            concurrent_fetch: config.concurrent_fetch.unwrap_or(true),
            boundary,
            elevation,
            hydrography,
            roads,
        })
    }
}
