//! Coordinate reference systems and the normalizer that moves every geometry,
//! vector layer and raster between the two systems the pipeline works in.
//!
//! Only WGS84-based systems are supported: geographic longitude/latitude
//! (EPSG:4326), spherical Web Mercator (EPSG:3857) and the UTM zones
//! (EPSG:326xx north, EPSG:327xx south). Transverse Mercator uses the
//! 6th-order Krüger series, accurate to well below a millimeter inside a zone.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::sync::LazyLock;

use geo::{Coord, MapCoords, Rect, coord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{BasinGeometry, GridSpec, RasterArtifact, VectorArtifact};
use crate::error::BasinError;

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM scale factor on the central meridian.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Points sampled along each raster edge when computing a reprojected extent.
const EDGE_SAMPLES: usize = 21;

static KRUGER: LazyLock<KrugerSeries> = LazyLock::new(kruger);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hemisphere {
    North,
    South,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Crs {
    Wgs84,
    WebMercator,
    Utm { zone: u8, hemisphere: Hemisphere },
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, BasinError> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                hemisphere: Hemisphere::North,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                hemisphere: Hemisphere::South,
            }),
            _ => Err(BasinError::UnsupportedCrs(code)),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm {
                zone,
                hemisphere: Hemisphere::North,
            } => 32600 + u32::from(*zone),
            Crs::Utm {
                zone,
                hemisphere: Hemisphere::South,
            } => 32700 + u32::from(*zone),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// OGC URN used in the `crs` member of persisted GeoJSON.
    pub fn urn(&self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.epsg())
    }

    /// Parses `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326` and the legacy
    /// `urn:ogc:def:crs:OGC:1.3:CRS84` spelling.
    pub fn from_urn(value: &str) -> Result<Self, BasinError> {
        let trimmed = value.trim();
        if trimmed.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        let code = trimmed
            .rsplit(':')
            .next()
            .and_then(|code| code.parse::<u32>().ok())
            .ok_or_else(|| BasinError::InvalidGeometry(format!("unrecognized crs {trimmed}")))?;
        Self::from_epsg(code)
    }

    /// Maps a longitude/latitude pair (degrees) into this system.
    pub fn project(&self, lonlat: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => lonlat,
            Crs::WebMercator => {
                let lat = lonlat.y.clamp(-85.051_128_78, 85.051_128_78).to_radians();
                coord! {
                    x: WGS84_A * lonlat.x.to_radians(),
                    y: WGS84_A * (FRAC_PI_4 + lat / 2.0).tan().ln(),
                }
            }
            Crs::Utm { zone, hemisphere } => utm_forward(lonlat, *zone, *hemisphere),
        }
    }

    /// Maps a coordinate of this system back to longitude/latitude (degrees).
    pub fn unproject(&self, xy: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => xy,
            Crs::WebMercator => coord! {
                x: (xy.x / WGS84_A).to_degrees(),
                y: (2.0 * (xy.y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees(),
            },
            Crs::Utm { zone, hemisphere } => utm_inverse(xy, *zone, *hemisphere),
        }
    }

    pub fn transform(from: Crs, to: Crs, xy: Coord<f64>) -> Coord<f64> {
        if from == to {
            return xy;
        }
        to.project(from.unproject(xy))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl TryFrom<u32> for Crs {
    type Error = BasinError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::from_epsg(code)
    }
}

impl From<Crs> for u32 {
    fn from(crs: Crs) -> Self {
        crs.epsg()
    }
}

fn central_meridian(zone: u8) -> f64 {
    f64::from(zone) * 6.0 - 183.0
}

struct KrugerSeries {
    a_rect: f64,
    e: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
}

fn kruger() -> KrugerSeries {
    let n = WGS84_F / (2.0 - WGS84_F);
    let n2 = n * n;
    let n3 = n2 * n;
    let n4 = n3 * n;
    let n5 = n4 * n;
    let n6 = n5 * n;

    let a_rect = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);
    let alpha = [
        n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0 - 127.0 * n5 / 288.0
            + 7891.0 * n6 / 37800.0,
        13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0 + 281.0 * n5 / 630.0
            - 1_983_433.0 * n6 / 1_935_360.0,
        61.0 * n3 / 240.0 - 103.0 * n4 / 140.0 + 15061.0 * n5 / 26880.0
            + 167_603.0 * n6 / 181_440.0,
        49561.0 * n4 / 161_280.0 - 179.0 * n5 / 168.0 + 6_601_661.0 * n6 / 7_257_600.0,
        34729.0 * n5 / 80640.0 - 3_418_889.0 * n6 / 1_995_840.0,
        212_378_941.0 * n6 / 319_334_400.0,
    ];
    let beta = [
        n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0 - 81.0 * n5 / 512.0
            + 96199.0 * n6 / 604_800.0,
        n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0 + 46.0 * n5 / 105.0
            - 1_118_711.0 * n6 / 3_870_720.0,
        17.0 * n3 / 480.0 - 37.0 * n4 / 840.0 - 209.0 * n5 / 4480.0 + 5569.0 * n6 / 90720.0,
        4397.0 * n4 / 161_280.0 - 11.0 * n5 / 504.0 - 830_251.0 * n6 / 7_257_600.0,
        4583.0 * n5 / 161_280.0 - 108_847.0 * n6 / 3_991_680.0,
        20_648_693.0 * n6 / 638_668_800.0,
    ];

    KrugerSeries {
        a_rect,
        e: (WGS84_F * (2.0 - WGS84_F)).sqrt(),
        alpha,
        beta,
    }
}

fn utm_forward(lonlat: Coord<f64>, zone: u8, hemisphere: Hemisphere) -> Coord<f64> {
    let series = &*KRUGER;
    let phi = lonlat.y.to_radians();
    let lambda = (lonlat.x - central_meridian(zone)).to_radians();

    let e = series.e;
    let sin_phi = phi.sin();
    // tangent of the conformal latitude
    let tau = (sin_phi.atanh() - e * (e * sin_phi).atanh()).sinh();
    let xi_p = tau.atan2(lambda.cos());
    let eta_p = (lambda.sin() / (1.0 + tau * tau).sqrt()).atanh();

    let mut xi = xi_p;
    let mut eta = eta_p;
    for (j, alpha) in series.alpha.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
        eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
    }

    let easting = UTM_K0 * series.a_rect * eta + UTM_FALSE_EASTING;
    let mut northing = UTM_K0 * series.a_rect * xi;
    if hemisphere == Hemisphere::South {
        northing += UTM_FALSE_NORTHING_SOUTH;
    }
    coord! { x: easting, y: northing }
}

fn utm_inverse(xy: Coord<f64>, zone: u8, hemisphere: Hemisphere) -> Coord<f64> {
    let series = &*KRUGER;
    let northing = match hemisphere {
        Hemisphere::North => xy.y,
        Hemisphere::South => xy.y - UTM_FALSE_NORTHING_SOUTH,
    };
    let eta = (xy.x - UTM_FALSE_EASTING) / (UTM_K0 * series.a_rect);
    let xi = northing / (UTM_K0 * series.a_rect);

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in series.beta.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
        eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let sinh_eta_p = eta_p.sinh();
    let sin_xi_p = xi_p.sin();
    let cos_xi_p = xi_p.cos();
    let tau_p = sin_xi_p / (sinh_eta_p * sinh_eta_p + cos_xi_p * cos_xi_p).sqrt();

    // Newton iteration from conformal back to geodetic latitude.
    let e = series.e;
    let e2 = e * e;
    let mut tau = tau_p;
    for _ in 0..10 {
        let sigma = (e * (e * tau / (1.0 + tau * tau).sqrt()).atanh()).sinh();
        let tau_i = tau * (1.0 + sigma * sigma).sqrt() - sigma * (1.0 + tau * tau).sqrt();
        let delta = (tau_p - tau_i) / (1.0 + tau_i * tau_i).sqrt() * (1.0 + (1.0 - e2) * tau * tau)
            / ((1.0 - e2) * (1.0 + tau * tau).sqrt());
        tau += delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }

    let lambda = sinh_eta_p.atan2(cos_xi_p);
    coord! {
        x: central_meridian(zone) + lambda.to_degrees(),
        y: tau.atan().to_degrees(),
    }
}

/// A value that carries its coordinate system and can be moved to another.
pub trait Reproject: Sized {
    fn crs(&self) -> Crs;
    fn reprojected(&self, to: Crs) -> Self;
}

impl Reproject for BasinGeometry {
    fn crs(&self) -> Crs {
        self.crs
    }

    fn reprojected(&self, to: Crs) -> Self {
        if self.crs == to {
            return self.clone();
        }
        let from = self.crs;
        BasinGeometry::from_parts(to, self.shape.map_coords(|c| Crs::transform(from, to, c)))
    }
}

impl Reproject for VectorArtifact {
    fn crs(&self) -> Crs {
        self.crs
    }

    fn reprojected(&self, to: Crs) -> Self {
        if self.crs == to {
            return self.clone();
        }
        let from = self.crs;
        let features = self
            .features
            .iter()
            .map(|feature| {
                let mut feature = feature.clone();
                feature.geometry = feature.geometry.map_coords(|c| Crs::transform(from, to, c));
                feature
            })
            .collect();
        VectorArtifact {
            layer: self.layer,
            crs: to,
            features,
        }
    }
}

/// Holds the two system-wide coordinate systems and converts values between
/// them. Every conversion checks the tag explicitly; equal systems are a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    geographic: Crs,
    projected: Crs,
}

impl Normalizer {
    pub fn new(geographic: Crs, projected: Crs) -> Result<Self, BasinError> {
        if !geographic.is_geographic() {
            return Err(BasinError::InvalidGeometry(format!(
                "{geographic} is not a geographic coordinate system"
            )));
        }
        if projected.is_geographic() {
            return Err(BasinError::InvalidGeometry(format!(
                "{projected} is not a projected coordinate system"
            )));
        }
        Ok(Self {
            geographic,
            projected,
        })
    }

    pub fn geographic(&self) -> Crs {
        self.geographic
    }

    pub fn projected(&self) -> Crs {
        self.projected
    }

    pub fn to_geographic<T: Reproject>(&self, value: &T) -> T {
        value.reprojected(self.geographic)
    }

    pub fn to_projected<T: Reproject>(&self, value: &T) -> T {
        value.reprojected(self.projected)
    }

    /// Reprojects a rectangle by transforming densified edges, so the result
    /// bounds the curved image of the input.
    pub fn reproject_rect(rect: Rect<f64>, from: Crs, to: Crs) -> Rect<f64> {
        if from == to {
            return rect;
        }
        let min = rect.min();
        let max = rect.max();
        let mut lo = coord! { x: f64::INFINITY, y: f64::INFINITY };
        let mut hi = coord! { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
        for i in 0..EDGE_SAMPLES {
            let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let x = min.x + t * (max.x - min.x);
            let y = min.y + t * (max.y - min.y);
            for sample in [
                coord! { x: x, y: min.y },
                coord! { x: x, y: max.y },
                coord! { x: min.x, y: y },
                coord! { x: max.x, y: y },
            ] {
                let p = Crs::transform(from, to, sample);
                lo.x = lo.x.min(p.x);
                lo.y = lo.y.min(p.y);
                hi.x = hi.x.max(p.x);
                hi.y = hi.y.max(p.y);
            }
        }
        Rect::new(lo, hi)
    }

    /// Warps a raster onto a grid in the projected system whose cell edges are
    /// multiples of `resolution`. Nearest-neighbour sampling; cells that fall
    /// outside the source or on source nodata become `nodata`.
    pub fn raster_to_projected(
        &self,
        raster: &RasterArtifact,
        resolution: f64,
        nodata: f32,
    ) -> RasterArtifact {
        if raster.crs == self.projected {
            return raster.clone();
        }

        let source = raster.grid;
        let extent = Self::reproject_rect(source.extent(), raster.crs, self.projected);
        let min_x = (extent.min().x / resolution).floor() * resolution;
        let max_x = (extent.max().x / resolution).ceil() * resolution;
        let min_y = (extent.min().y / resolution).floor() * resolution;
        let max_y = (extent.max().y / resolution).ceil() * resolution;
        let width = ((max_x - min_x) / resolution).round().max(1.0) as usize;
        let height = ((max_y - min_y) / resolution).round().max(1.0) as usize;

        let grid = GridSpec {
            origin_x: min_x,
            origin_y: max_y,
            pixel_width: resolution,
            pixel_height: resolution,
            width,
            height,
        };

        let from = self.projected;
        let to = raster.crs;
        let mut data = vec![nodata; width * height];
        data.par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, cells)| {
                for (col, cell) in cells.iter_mut().enumerate() {
                    let center = grid.cell_center(row, col);
                    let src = Crs::transform(from, to, center);
                    if let Some((src_row, src_col)) = source.cell_at(src) {
                        let value = raster.value(src_row, src_col);
                        if !raster.is_nodata(value) {
                            *cell = value;
                        }
                    }
                }
            });

        RasterArtifact {
            crs: self.projected,
            grid,
            nodata,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_epsg_codes() {
        assert_eq!(Crs::from_epsg(4326).unwrap(), Crs::Wgs84);
        assert_eq!(
            Crs::from_epsg(32612).unwrap(),
            Crs::Utm {
                zone: 12,
                hemisphere: Hemisphere::North
            }
        );
        assert_eq!(Crs::from_epsg(32733).unwrap().epsg(), 32733);
        assert!(matches!(
            Crs::from_epsg(2154),
            Err(BasinError::UnsupportedCrs(2154))
        ));
    }

    #[test]
    fn parse_urns() {
        assert_eq!(Crs::from_urn("urn:ogc:def:crs:EPSG::32612").unwrap().epsg(), 32612);
        assert_eq!(Crs::from_urn("EPSG:3857").unwrap(), Crs::WebMercator);
        assert_eq!(
            Crs::from_urn("urn:ogc:def:crs:OGC:1.3:CRS84").unwrap(),
            Crs::Wgs84
        );
    }

    #[test]
    fn web_mercator_antimeridian() {
        let p = Crs::WebMercator.project(coord! { x: 180.0, y: 0.0 });
        assert!((p.x - 20_037_508.342_789_244).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
    }

    #[test]
    fn utm_central_meridian_has_false_easting() {
        let utm12 = Crs::from_epsg(32612).unwrap();
        let p = utm12.project(coord! { x: -111.0, y: 34.0 });
        assert!((p.x - 500_000.0).abs() < 1e-6);

        let equator = utm12.project(coord! { x: -111.0, y: 0.0 });
        assert!(equator.y.abs() < 1e-6);

        let south = Crs::from_epsg(32712).unwrap().project(coord! { x: -111.0, y: 0.0 });
        assert!((south.y - 10_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn utm_is_symmetric_about_central_meridian() {
        let utm12 = Crs::from_epsg(32612).unwrap();
        let east = utm12.project(coord! { x: -109.5, y: 35.1 });
        let west = utm12.project(coord! { x: -112.5, y: 35.1 });
        assert!((east.x - 500_000.0 + (west.x - 500_000.0)).abs() < 1e-6);
        assert!((east.y - west.y).abs() < 1e-6);
    }

    #[test]
    fn normalizer_rejects_swapped_systems() {
        assert!(Normalizer::new(Crs::WebMercator, Crs::Wgs84).is_err());
        assert!(Normalizer::new(Crs::Wgs84, Crs::Wgs84).is_err());
        assert!(Normalizer::new(Crs::Wgs84, Crs::from_epsg(32612).unwrap()).is_ok());
    }
}
