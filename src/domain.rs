use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use geo::{BoundingRect, Coord, MultiLineString, MultiPolygon, Rect, coord};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::crs::Crs;
use crate::error::BasinError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BasinId(String);

impl BasinId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BasinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BasinId {
    type Err = BasinError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // ids become directory names, so path separators are rejected
        let is_valid = !normalized.is_empty()
            && !normalized.contains(['/', '\\'])
            && normalized != "."
            && normalized != "..";
        if !is_valid {
            return Err(BasinError::InvalidBasinId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// The four remote services the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Boundary,
    Elevation,
    Hydrography,
    Roads,
}

impl DataSource {
    pub fn stage(&self) -> &'static str {
        match self {
            DataSource::Boundary => "boundary lookup",
            DataSource::Elevation => "elevation",
            DataSource::Hydrography => "hydrography",
            DataSource::Roads => "roads",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Boundary => write!(f, "boundary"),
            DataSource::Elevation => write!(f, "elevation"),
            DataSource::Hydrography => write!(f, "hydrography"),
            DataSource::Roads => write!(f, "roads"),
        }
    }
}

/// A basin polygon tagged with its coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinGeometry {
    pub crs: Crs,
    pub shape: MultiPolygon<f64>,
}

impl BasinGeometry {
    pub fn new(crs: Crs, shape: MultiPolygon<f64>) -> Result<Self, BasinError> {
        let has_area = shape
            .0
            .iter()
            .any(|polygon| polygon.exterior().0.len() >= 4);
        if !has_area {
            return Err(BasinError::InvalidGeometry(
                "basin polygon has no rings".to_string(),
            ));
        }
        Ok(Self { crs, shape })
    }

    pub(crate) fn from_parts(crs: Crs, shape: MultiPolygon<f64>) -> Self {
        Self { crs, shape }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.shape.bounding_rect()
    }
}

/// Affine grid of a north-up raster. `origin_*` is the outer top-left corner;
/// rows run south.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn from_extent(extent: Rect<f64>, width: usize, height: usize) -> Self {
        Self {
            origin_x: extent.min().x,
            origin_y: extent.max().y,
            pixel_width: extent.width() / width.max(1) as f64,
            pixel_height: extent.height() / height.max(1) as f64,
            width,
            height,
        }
    }

    pub fn extent(&self) -> Rect<f64> {
        Rect::new(
            coord! {
                x: self.origin_x,
                y: self.origin_y - self.pixel_height * self.height as f64,
            },
            coord! {
                x: self.origin_x + self.pixel_width * self.width as f64,
                y: self.origin_y,
            },
        )
    }

    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        coord! {
            x: self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            y: self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Row and column of the cell containing `point`, if it lies on the grid.
    pub fn cell_at(&self, point: Coord<f64>) -> Option<(usize, usize)> {
        let col = ((point.x - self.origin_x) / self.pixel_width).floor();
        let row = ((self.origin_y - point.y) / self.pixel_height).floor();
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.height && col < self.width).then_some((row, col))
    }
}

/// Elevation grid in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterArtifact {
    pub crs: Crs,
    pub grid: GridSpec,
    pub nodata: f32,
    pub data: Vec<f32>,
}

impl RasterArtifact {
    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.grid.height, self.grid.width)
    }

    pub fn value(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.grid.width + col]
    }

    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || value == self.nodata
    }

    pub fn valid_cells(&self) -> usize {
        self.data.iter().filter(|value| !self.is_nodata(**value)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Flowlines,
    Roads,
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Flowlines => "flowlines",
            Layer::Roads => "roads",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineFeature {
    pub geometry: MultiLineString<f64>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorArtifact {
    pub layer: Layer,
    pub crs: Crs,
    pub features: Vec<LineFeature>,
}

impl VectorArtifact {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// The three normalized layers for one basin, before they are written.
#[derive(Debug, Clone)]
pub struct BasinArtifacts {
    pub dem: RasterArtifact,
    pub flowlines: VectorArtifact,
    pub roads: VectorArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasinPaths {
    pub dir: Utf8PathBuf,
    pub dem: Utf8PathBuf,
    pub flowlines: Utf8PathBuf,
    pub roads: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct BasinOutputSet {
    pub id: BasinId,
    pub name: String,
    pub artifacts: BasinArtifacts,
    pub paths: BasinPaths,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo::{LineString, Polygon};

    use super::*;

    #[test]
    fn parse_basin_id_trims() {
        let id: BasinId = " 1502001602 ".parse().unwrap();
        assert_eq!(id.as_str(), "1502001602");
    }

    #[test]
    fn parse_basin_id_invalid() {
        assert_matches!("".parse::<BasinId>(), Err(BasinError::InvalidBasinId(_)));
        assert_matches!(
            "../etc".parse::<BasinId>(),
            Err(BasinError::InvalidBasinId(_))
        );
    }

    #[test]
    fn empty_geometry_rejected() {
        let err = BasinGeometry::new(Crs::Wgs84, MultiPolygon::new(vec![])).unwrap_err();
        assert_matches!(err, BasinError::InvalidGeometry(_));

        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        assert!(BasinGeometry::new(Crs::Wgs84, MultiPolygon::new(vec![square])).is_ok());
    }

    #[test]
    fn grid_cell_lookup() {
        let grid = GridSpec {
            origin_x: 100.0,
            origin_y: 200.0,
            pixel_width: 10.0,
            pixel_height: 10.0,
            width: 3,
            height: 2,
        };
        assert_eq!(grid.cell_at(coord! { x: 105.0, y: 195.0 }), Some((0, 0)));
        assert_eq!(grid.cell_at(coord! { x: 129.0, y: 181.0 }), Some((1, 2)));
        assert_eq!(grid.cell_at(coord! { x: 131.0, y: 195.0 }), None);
        assert_eq!(grid.cell_at(coord! { x: 95.0, y: 195.0 }), None);
        assert_eq!(grid.cell_center(1, 2), coord! { x: 125.0, y: 185.0 });
    }
}
