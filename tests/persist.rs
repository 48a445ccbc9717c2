use std::fs;

use camino::Utf8PathBuf;
use geo::{LineString, MultiLineString, Rect, coord};
use serde_json::{Map, Value};

use basin_data_manager::crs::Crs;
use basin_data_manager::domain::{
    BasinArtifacts, BasinId, GridSpec, Layer, LineFeature, RasterArtifact, VectorArtifact,
};
use basin_data_manager::geotiff::{Georeference, decode_dem};
use basin_data_manager::persist::OutputWriter;
use basin_data_manager::store::Store;

fn utm12() -> Crs {
    Crs::from_epsg(32612).unwrap()
}

fn vector(layer: Layer, count: usize) -> VectorArtifact {
    let features = (0..count)
        .map(|i| {
            let x = 550_000.0 + i as f64 * 100.0;
            let mut properties = Map::new();
            properties.insert("seq".to_string(), Value::from(i));
            LineFeature {
                geometry: MultiLineString::new(vec![LineString::from(vec![
                    (x, 3_880_000.0),
                    (x + 50.0, 3_880_050.0),
                ])]),
                properties,
            }
        })
        .collect();
    VectorArtifact {
        layer,
        crs: utm12(),
        features,
    }
}

fn artifacts(elevation: f32) -> BasinArtifacts {
    BasinArtifacts {
        dem: RasterArtifact {
            crs: utm12(),
            grid: GridSpec {
                origin_x: 549_990.0,
                origin_y: 3_880_110.0,
                pixel_width: 30.0,
                pixel_height: 30.0,
                width: 4,
                height: 3,
            },
            nodata: -9999.0,
            data: vec![elevation; 12],
        },
        flowlines: vector(Layer::Flowlines, 3),
        roads: vector(Layer::Roads, 5),
    }
}

fn writer_in(temp: &tempfile::TempDir) -> OutputWriter {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    OutputWriter::new(Store::new_with_root(root), 30.0)
}

#[test]
fn persist_writes_three_layers_and_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let writer = writer_in(&temp);
    let id: BasinId = "1502001602".parse().unwrap();

    let paths = writer.persist(&id, "Upper Test Wash", &artifacts(1500.0)).unwrap();
    assert!(paths.dir.ends_with("huc10_1502001602"));
    assert!(paths.dem.ends_with("dem_30m.tif"));

    let flowlines: Value =
        serde_json::from_slice(&fs::read(paths.flowlines.as_std_path()).unwrap()).unwrap();
    assert_eq!(flowlines["name"], "flowlines");
    assert_eq!(flowlines["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::32612");
    assert_eq!(flowlines["features"].as_array().unwrap().len(), 3);

    let roads: Value =
        serde_json::from_slice(&fs::read(paths.roads.as_std_path()).unwrap()).unwrap();
    assert_eq!(roads["name"], "roads");
    assert_eq!(roads["features"][4]["geometry"]["type"], "MultiLineString");

    let fallback = Georeference {
        crs: Crs::WebMercator,
        extent: Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }),
    };
    let dem = decode_dem(&fs::read(paths.dem.as_std_path()).unwrap(), fallback, 0.0).unwrap();
    assert_eq!(dem, artifacts(1500.0).dem);

    let manifest: Value =
        serde_json::from_slice(&fs::read(paths.dir.join("metadata.json").as_std_path()).unwrap())
            .unwrap();
    assert_eq!(manifest["name"], "Upper Test Wash");
    assert_eq!(manifest["crs"], "EPSG:32612");
    assert_eq!(manifest["dem"]["rows"], 3);
    assert_eq!(manifest["roads"], 5);

    // no staging directories left behind
    let leftovers = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn persist_replaces_previous_output() {
    let temp = tempfile::tempdir().unwrap();
    let writer = writer_in(&temp);
    let id: BasinId = "1502001602".parse().unwrap();

    let first = writer.persist(&id, "Upper Test Wash", &artifacts(1500.0)).unwrap();
    fs::write(first.dir.join("notes.txt").as_std_path(), b"stale").unwrap();
    let before = fs::read(first.dem.as_std_path()).unwrap();

    let second = writer.persist(&id, "Upper Test Wash", &artifacts(1600.0)).unwrap();
    assert_eq!(first, second);
    assert_ne!(fs::read(second.dem.as_std_path()).unwrap(), before);
    assert!(!second.dir.join("notes.txt").as_std_path().exists());
}

#[test]
fn identical_inputs_give_identical_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let writer = writer_in(&temp);
    let id: BasinId = "1502001602".parse().unwrap();

    let first = writer.persist(&id, "Upper Test Wash", &artifacts(1500.0)).unwrap();
    let snapshot: Vec<Vec<u8>> = [&first.dem, &first.flowlines, &first.roads]
        .iter()
        .map(|path| fs::read(path.as_std_path()).unwrap())
        .collect();

    let second = writer.persist(&id, "Upper Test Wash", &artifacts(1500.0)).unwrap();
    let again: Vec<Vec<u8>> = [&second.dem, &second.flowlines, &second.roads]
        .iter()
        .map(|path| fs::read(path.as_std_path()).unwrap())
        .collect();
    assert_eq!(snapshot, again);
}
