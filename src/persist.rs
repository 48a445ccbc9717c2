use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::domain::{BasinArtifacts, BasinId, BasinPaths, VectorArtifact};
use crate::error::BasinError;
use crate::features::vector_layer;
use crate::geotiff::write_dem;
use crate::store::{FLOWLINES_FILE, MANIFEST_FILE, ROADS_FILE, Store, atomic_rename_dir};

#[derive(Debug, Serialize)]
pub struct BasinManifest {
    pub id: String,
    pub name: String,
    pub crs: String,
    pub resolution_m: f64,
    pub dem: DemSummary,
    pub flowlines: usize,
    pub roads: usize,
    pub tool_version: String,
    pub fetched_at: String,
}

#[derive(Debug, Serialize)]
pub struct DemSummary {
    pub rows: usize,
    pub cols: usize,
    pub nodata: f32,
    pub valid_cells: usize,
}

/// Writes a basin's artifacts into `huc10_<id>/` under the store root.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    store: Store,
    resolution_m: f64,
}

impl OutputWriter {
    pub fn new(store: Store, resolution_m: f64) -> Self {
        Self {
            store,
            resolution_m,
        }
    }

    /// Files are staged in a temporary directory next to the target and
    /// swapped in with one rename; prior output survives any failure before
    /// the swap.
    pub fn persist(
        &self,
        id: &BasinId,
        name: &str,
        artifacts: &BasinArtifacts,
    ) -> Result<BasinPaths, BasinError> {
        let lock = self.store.basin_lock(id)?;
        let _guard = lock
            .lock()
            .map_err(|_| BasinError::Persistence(format!("write lock for {id} poisoned")))?;

        self.store.ensure_data_root()?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".huc10_{id}-"))
            .tempdir_in(self.store.data_root().as_std_path())
            .map_err(|err| BasinError::Persistence(err.to_string()))?;
        let stage = staging.path().join("out");
        fs::create_dir_all(&stage).map_err(|err| BasinError::Persistence(err.to_string()))?;

        let dem_name = Store::dem_file_name(self.resolution_m);
        write_dem(&stage.join(&dem_name), &artifacts.dem)?;
        write_vector(&stage.join(FLOWLINES_FILE), &artifacts.flowlines)?;
        write_vector(&stage.join(ROADS_FILE), &artifacts.roads)?;

        let manifest = self.manifest(id, name, artifacts);
        let content = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| BasinError::Persistence(err.to_string()))?;
        fs::write(stage.join(MANIFEST_FILE), content)
            .map_err(|err| BasinError::Persistence(err.to_string()))?;

        let paths = self.store.basin_paths(id, self.resolution_m);
        atomic_rename_dir(&stage, paths.dir.as_std_path())
            .map_err(|err| BasinError::Persistence(format!("{}: {err}", paths.dir)))?;

        tracing::info!(basin = %id, dir = %paths.dir, "basin output written");
        Ok(paths)
    }

    fn manifest(&self, id: &BasinId, name: &str, artifacts: &BasinArtifacts) -> BasinManifest {
        let (rows, cols) = artifacts.dem.shape();
        BasinManifest {
            id: id.to_string(),
            name: name.to_string(),
            crs: artifacts.dem.crs.to_string(),
            resolution_m: self.resolution_m,
            dem: DemSummary {
                rows,
                cols,
                nodata: artifacts.dem.nodata,
                valid_cells: artifacts.dem.valid_cells(),
            },
            flowlines: artifacts.flowlines.len(),
            roads: artifacts.roads.len(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            fetched_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

fn write_vector(path: &Path, artifact: &VectorArtifact) -> Result<(), BasinError> {
    let content = vector_layer(artifact).to_string();
    fs::write(path, content).map_err(|err| BasinError::Persistence(format!("{}: {err}", path.display())))
}
