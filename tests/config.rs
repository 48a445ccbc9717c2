use std::fs;

use assert_matches::assert_matches;

use basin_data_manager::config::{Config, ConfigLoader, OVERPASS_URL, WBD_HUC10_URL};
use basin_data_manager::crs::Crs;
use basin_data_manager::error::BasinError;
use basin_data_manager::roads::NetworkType;

#[test]
fn parse_config_file_with_overrides() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("basin-dm.json");
    fs::write(
        &path,
        r#"{
            "data_dir": "/srv/basins",
            "region": "nm",
            "projected_crs": 32613,
            "concurrent_fetch": false,
            "elevation": { "resolution_m": 10, "max_image_size": 4000 },
            "roads": { "network_type": "drive" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.data_dir, "/srv/basins");
    assert_eq!(resolved.region.as_str(), "NM");
    assert_eq!(resolved.projected_crs, Crs::from_epsg(32613).unwrap());
    assert_eq!(resolved.geographic_crs, Crs::Wgs84);
    assert!(!resolved.concurrent_fetch);
    assert_eq!(resolved.elevation.resolution_m, 10.0);
    assert_eq!(resolved.elevation.max_image_size, 4000);
    assert_eq!(resolved.elevation.native_crs, Crs::WebMercator);
    assert_eq!(resolved.roads.network_type, NetworkType::Drive);
    assert_eq!(resolved.roads.url, OVERPASS_URL);
    assert_eq!(resolved.boundary.url, WBD_HUC10_URL);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(BasinError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("basin-dm.json");
    fs::write(&path, "{ \"region\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(BasinError::ConfigParse(_))
    );
}

#[test]
fn unknown_network_type_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("basin-dm.json");
    fs::write(&path, r#"{ "roads": { "network_type": "boat" } }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(BasinError::ConfigParse(_))
    );
}

#[test]
fn unsupported_epsg_is_rejected() {
    let config = Config {
        projected_crs: Some(2223),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(BasinError::UnsupportedCrs(2223))
    );
}

#[test]
fn non_positive_resolution_is_rejected() {
    let mut config = Config::default();
    config.elevation.resolution_m = Some(0.0);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(BasinError::ConfigParse(_))
    );
}
