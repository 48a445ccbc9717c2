use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Region;
use crate::domain::BasinId;
use crate::error::BasinError;

pub const FLOWLINES_FILE: &str = "flowlines.geojson";
pub const ROADS_FILE: &str = "roads.geojson";
pub const MANIFEST_FILE: &str = "metadata.json";

/// Handle on the data directory holding the boundary index and one output
/// directory per basin. Clones share the per-basin write locks.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    locks: Arc<Mutex<HashMap<BasinId, Arc<Mutex<()>>>>>,
}

impl Store {
    /// Relative roots are anchored at the current working directory.
    pub fn new(data_dir: &Utf8Path) -> Result<Self, BasinError> {
        if data_dir.is_absolute() {
            return Ok(Self::new_with_root(data_dir.to_path_buf()));
        }
        let cwd = std::env::current_dir().map_err(|err| BasinError::Filesystem(err.to_string()))?;
        let data_root = Utf8PathBuf::from_path_buf(cwd.join(data_dir.as_std_path()))
            .map_err(|_| BasinError::Filesystem("invalid data directory path".to_string()))?;
        Ok(Self::new_with_root(data_root))
    }

    pub fn new_with_root(data_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn index_path(&self, region: &Region) -> Utf8PathBuf {
        self.data_root
            .join(format!("{}_huc10.geojson", region.as_str().to_lowercase()))
    }

    pub fn basin_dir(&self, id: &BasinId) -> Utf8PathBuf {
        self.data_root.join(format!("huc10_{id}"))
    }

    pub fn dem_file_name(resolution_m: f64) -> String {
        format!("dem_{resolution_m}m.tif")
    }

    pub fn basin_paths(&self, id: &BasinId, resolution_m: f64) -> crate::domain::BasinPaths {
        let dir = self.basin_dir(id);
        crate::domain::BasinPaths {
            dem: dir.join(Self::dem_file_name(resolution_m)),
            flowlines: dir.join(FLOWLINES_FILE),
            roads: dir.join(ROADS_FILE),
            dir,
        }
    }

    pub fn ensure_data_root(&self) -> Result<(), BasinError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| BasinError::Filesystem(err.to_string()))
    }

    /// Lock serializing writes to one basin's output directory.
    pub fn basin_lock(&self, id: &BasinId) -> Result<Arc<Mutex<()>>, BasinError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| BasinError::Filesystem("store lock poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(id.clone()).or_default()))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BasinError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| BasinError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| BasinError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| BasinError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Moves `from` to `to`, replacing any existing directory. The previous
/// contents are parked beside the target and restored if the final rename
/// fails.
pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if !to.exists() {
        return fs::rename(from, to);
    }

    let name = to
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parked = to.with_file_name(format!(".{name}.previous"));
    if parked.exists() {
        fs::remove_dir_all(&parked)?;
    }
    fs::rename(to, &parked)?;
    if let Err(err) = fs::rename(from, to) {
        if let Err(restore) = fs::rename(&parked, to) {
            tracing::warn!(
                path = %parked.display(),
                "failed to restore previous output: {restore}"
            );
        }
        return Err(err);
    }
    if let Err(err) = fs::remove_dir_all(&parked) {
        tracing::warn!(path = %parked.display(), "failed to remove previous output: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_root(Utf8PathBuf::from("/srv/basins"));
        let id: BasinId = "1502001602".parse().unwrap();
        let region = Region::new("AZ").unwrap();

        assert_eq!(store.index_path(&region), "/srv/basins/az_huc10.geojson");

        let paths = store.basin_paths(&id, 30.0);
        assert!(paths.dir.ends_with("huc10_1502001602"));
        assert!(paths.dem.ends_with("huc10_1502001602/dem_30m.tif"));
        assert!(paths.flowlines.ends_with("huc10_1502001602/flowlines.geojson"));
        assert!(paths.roads.ends_with("huc10_1502001602/roads.geojson"));
    }

    #[test]
    fn rename_replaces_existing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("new");
        let to = temp.path().join("basin");
        fs::create_dir_all(&from).unwrap();
        fs::create_dir_all(&to).unwrap();
        fs::write(from.join("a.txt"), b"new").unwrap();
        fs::write(to.join("a.txt"), b"old").unwrap();
        fs::write(to.join("stale.txt"), b"old").unwrap();

        atomic_rename_dir(&from, &to).unwrap();

        assert_eq!(fs::read(to.join("a.txt")).unwrap(), b"new");
        assert!(!to.join("stale.txt").exists());
        assert!(!temp.path().join(".basin.previous").exists());
    }

    #[test]
    fn failed_rename_restores_previous_directory() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("never-staged");
        let to = temp.path().join("basin");
        fs::create_dir_all(&to).unwrap();
        fs::write(to.join("a.txt"), b"old").unwrap();

        assert!(atomic_rename_dir(&missing, &to).is_err());

        assert_eq!(fs::read(to.join("a.txt")).unwrap(), b"old");
        assert!(!temp.path().join(".basin.previous").exists());
    }

    #[test]
    fn basin_locks_are_shared_between_clones() {
        let store = Store::new_with_root(Utf8PathBuf::from("/srv/basins"));
        let id: BasinId = "1502001602".parse().unwrap();
        let first = store.basin_lock(&id).unwrap();
        let second = store.clone().basin_lock(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
