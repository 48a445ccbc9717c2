use crate::domain::{BasinGeometry, DataSource};
use crate::error::BasinError;

/// One per-basin data source: takes the basin polygon and returns an artifact
/// in the projected coordinate system, or fails with a categorized error.
pub trait SourceFetcher: Send + Sync {
    type Artifact: Send;

    fn data_source(&self) -> DataSource;

    fn fetch(&self, geometry: &BasinGeometry) -> Result<Self::Artifact, BasinError>;
}
