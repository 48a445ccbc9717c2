//! Single-band float32 GeoTIFF reading and writing.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use geo::Rect;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::crs::Crs;
use crate::domain::{GridSpec, RasterArtifact};
use crate::error::BasinError;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// Where the raster is expected to sit when the file carries no
/// georeferencing of its own.
#[derive(Debug, Clone, Copy)]
pub struct Georeference {
    pub crs: Crs,
    pub extent: Rect<f64>,
}

pub fn decode_dem(
    bytes: &[u8],
    fallback: Georeference,
    default_nodata: f32,
) -> Result<RasterArtifact, String> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    decoder = decoder.with_limits(limits);

    let (width, height) = decoder.dimensions().map_err(|err| err.to_string())?;
    let (width, height) = (width as usize, height as usize);

    let grid = read_grid(&mut decoder, width, height)
        .unwrap_or_else(|| GridSpec::from_extent(fallback.extent, width, height));
    let crs = read_epsg(&mut decoder)
        .and_then(|code| Crs::from_epsg(code).ok())
        .unwrap_or(fallback.crs);
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|value| value.trim().trim_end_matches('\0').parse::<f32>().ok())
        .unwrap_or(default_nodata);

    let data: Vec<f32> = match decoder.read_image().map_err(|err| err.to_string())? {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    };
    if data.len() != width * height {
        return Err(format!(
            "expected {} samples for a {width}x{height} single-band image, found {}",
            width * height,
            data.len()
        ));
    }

    Ok(RasterArtifact {
        crs,
        grid,
        nodata,
        data,
    })
}

fn read_grid<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    width: usize,
    height: usize,
) -> Option<GridSpec> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    if tiepoint.len() < 6 || scale.len() < 2 || scale[0] <= 0.0 || scale[1] <= 0.0 {
        return None;
    }
    // tiepoint is [i, j, k, x, y, z]: raster (i, j) maps to model (x, y)
    Some(GridSpec {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
        width,
        height,
    })
}

/// EPSG code of the system the raster coordinates are in. The model type key
/// decides between the projected and geographic code, since projected files
/// usually carry a geographic datum key as well.
fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    epsg_from_geo_keys(&keys)
}

fn epsg_from_geo_keys(keys: &[u16]) -> Option<u32> {
    // only keys whose value sits inline (location 0, count 1)
    let inline = |id: u16| {
        keys.get(4..)?
            .chunks_exact(4)
            .find(|key| key[0] == id && key[1] == 0 && key[2] == 1)
            .map(|key| key[3])
    };
    let crs_key = match inline(GT_MODEL_TYPE)? {
        MODEL_TYPE_PROJECTED => PROJECTED_CS_TYPE,
        MODEL_TYPE_GEOGRAPHIC => GEOGRAPHIC_TYPE,
        _ => return None,
    };
    inline(crs_key).map(u32::from)
}

/// Writes the raster uncompressed with model tiepoint, pixel scale, GeoKeys
/// naming the EPSG code, and the GDAL nodata tag.
pub fn encode_dem<W: Write + Seek>(writer: W, raster: &RasterArtifact) -> Result<(), String> {
    let (rows, cols) = raster.shape();
    if raster.data.len() != rows * cols {
        return Err(format!(
            "raster holds {} samples for a {cols}x{rows} grid",
            raster.data.len()
        ));
    }

    let grid = raster.grid;
    let scale = [grid.pixel_width, grid.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, grid.origin_x, grid.origin_y, 0.0];
    let epsg = u16::try_from(raster.crs.epsg()).map_err(|err| err.to_string())?;
    let (model_type, crs_key) = if raster.crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    #[rustfmt::skip]
    let geo_keys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, model_type,
        GT_RASTER_TYPE, 0, 1, 1,
        crs_key, 0, 1, epsg,
    ];
    let nodata = raster.nodata.to_string();

    let mut encoder = TiffEncoder::new(writer).map_err(|err| err.to_string())?;
    let mut image = encoder
        .new_image::<colortype::Gray32Float>(cols as u32, rows as u32)
        .map_err(|err| err.to_string())?;
    let directory = image.encoder();
    directory
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(|err| err.to_string())?;
    directory
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(|err| err.to_string())?;
    directory
        .write_tag(Tag::GeoKeyDirectoryTag, &geo_keys[..])
        .map_err(|err| err.to_string())?;
    directory
        .write_tag(Tag::GdalNodata, nodata.as_str())
        .map_err(|err| err.to_string())?;
    image
        .write_data(&raster.data)
        .map_err(|err| err.to_string())
}

pub fn write_dem(path: &Path, raster: &RasterArtifact) -> Result<(), BasinError> {
    let file = File::create(path).map_err(|err| BasinError::Persistence(err.to_string()))?;
    let mut writer = BufWriter::new(file);
    encode_dem(&mut writer, raster)
        .map_err(|err| BasinError::Persistence(format!("{}: {err}", path.display())))?;
    writer
        .flush()
        .map_err(|err| BasinError::Persistence(err.to_string()))
}
