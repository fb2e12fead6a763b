// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/raster.rs - GeoTIFF 栅格读写
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 ADAF Contributors

use std::{
  fmt,
  fs::File,
  io::{BufReader, BufWriter, Read, Seek, Write},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tiff::{
  TiffError, TiffResult,
  decoder::{Decoder, DecodingResult},
  encoder::{DirectoryEncoder, TiffEncoder, TiffKind, colortype},
  tags::Tag,
};
use tracing::debug;

// GeoKey 编号
const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("TIFF 错误 {path}: {source}")]
  Tiff { path: PathBuf, source: TiffError },
  #[error("{0} 缺少地理参考信息")]
  MissingGeoreference(PathBuf),
  #[error("{0} 的像元类型不受支持")]
  UnsupportedSampleFormat(PathBuf),
  #[error("{path} 应为单波段栅格，实际为 {bands} 个波段")]
  NotSingleBand { path: PathBuf, bands: usize },
  #[error("{path} 像元数量不匹配: 期望 {expected} 的整数倍, 实际 {found}")]
  SizeMismatch {
    path: PathBuf,
    expected: usize,
    found: usize,
  },
}

/// 以 EPSG 编码表示的坐标参考系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u32);

impl Crs {
  pub fn from_epsg(code: u32) -> Self {
    Crs(code)
  }

  pub fn epsg(&self) -> u32 {
    self.0
  }

  /// EPSG 4000-4999 为地理坐标系
  pub fn is_geographic(&self) -> bool {
    (4000..5000).contains(&self.0)
  }
}

impl fmt::Display for Crs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "EPSG:{}", self.0)
  }
}

/// 仿射变换，系数顺序与 GDAL 一致
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
  pub origin_x: f64,
  pub pixel_width: f64,
  pub row_rotation: f64,
  pub origin_y: f64,
  pub col_rotation: f64,
  pub pixel_height: f64,
}

impl GeoTransform {
  /// 北向上栅格，`resolution` 为正值
  pub fn north_up(origin_x: f64, origin_y: f64, resolution: f64) -> Self {
    Self {
      origin_x,
      pixel_width: resolution,
      row_rotation: 0.0,
      origin_y,
      col_rotation: 0.0,
      pixel_height: -resolution,
    }
  }

  /// 像素坐标（列、行）到世界坐标
  pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
    (
      self.origin_x + col * self.pixel_width + row * self.row_rotation,
      self.origin_y + col * self.col_rotation + row * self.pixel_height,
    )
  }

  pub fn resolution(&self) -> f64 {
    self.pixel_width.abs()
  }

  pub fn is_north_up(&self) -> bool {
    self.row_rotation == 0.0 && self.col_rotation == 0.0
  }

  pub fn as_gdal(&self) -> [f64; 6] {
    [
      self.origin_x,
      self.pixel_width,
      self.row_rotation,
      self.origin_y,
      self.col_rotation,
      self.pixel_height,
    ]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
  pub width: u32,
  pub height: u32,
  pub transform: GeoTransform,
  pub crs: Option<Crs>,
}

impl RasterMeta {
  pub fn pixel_count(&self) -> usize {
    self.width as usize * self.height as usize
  }
}

/// 解码后的栅格，像元按像素交错存储。整数像元按位深归一化到 [0, 1]。
#[derive(Debug, Clone)]
pub struct RasterData {
  pub meta: RasterMeta,
  pub bands: usize,
  pub samples: Vec<f32>,
}

/// 单波段概率栅格，行优先存储
#[derive(Debug, Clone)]
pub struct ProbabilityRaster {
  pub path: PathBuf,
  pub meta: RasterMeta,
  pub data: Vec<f32>,
}

impl ProbabilityRaster {
  pub fn get(&self, col: u32, row: u32) -> f32 {
    self.data[row as usize * self.meta.width as usize + col as usize]
  }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RasterError + '_ {
  move |source| RasterError::Io {
    path: path.to_path_buf(),
    source,
  }
}

fn tiff_error(path: &Path) -> impl Fn(TiffError) -> RasterError + '_ {
  move |source| RasterError::Tiff {
    path: path.to_path_buf(),
    source,
  }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, RasterError> {
  let file = File::open(path).map_err(io_error(path))?;
  Decoder::new(BufReader::new(file)).map_err(tiff_error(path))
}

fn read_header<R: Read + Seek>(
  decoder: &mut Decoder<R>,
  path: &Path,
) -> Result<RasterMeta, RasterError> {
  let (width, height) = decoder.dimensions().map_err(tiff_error(path))?;
  let transform = read_geo_transform(decoder)
    .map_err(tiff_error(path))?
    .ok_or_else(|| RasterError::MissingGeoreference(path.to_path_buf()))?;
  let crs = read_crs(decoder).map_err(tiff_error(path))?;
  Ok(RasterMeta {
    width,
    height,
    transform,
    crs,
  })
}

/// 只读取尺寸与地理参考，不解码像元
pub fn read_meta(path: &Path) -> Result<RasterMeta, RasterError> {
  let mut decoder = open_decoder(path)?;
  read_header(&mut decoder, path)
}

pub fn read_raster(path: &Path) -> Result<RasterData, RasterError> {
  let mut decoder = open_decoder(path)?;
  let meta = read_header(&mut decoder, path)?;

  let samples: Vec<f32> = match decoder.read_image().map_err(tiff_error(path))? {
    DecodingResult::U8(values) => values
      .into_iter()
      .map(|v| f32::from(v) / f32::from(u8::MAX))
      .collect(),
    DecodingResult::U16(values) => values
      .into_iter()
      .map(|v| f32::from(v) / f32::from(u16::MAX))
      .collect(),
    DecodingResult::I16(values) => values.into_iter().map(f32::from).collect(),
    DecodingResult::I32(values) => values.into_iter().map(|v| v as f32).collect(),
    DecodingResult::F32(values) => values,
    DecodingResult::F64(values) => values.into_iter().map(|v| v as f32).collect(),
    _ => return Err(RasterError::UnsupportedSampleFormat(path.to_path_buf())),
  };

  let pixels = meta.pixel_count();
  if pixels == 0 || samples.is_empty() || samples.len() % pixels != 0 {
    return Err(RasterError::SizeMismatch {
      path: path.to_path_buf(),
      expected: pixels,
      found: samples.len(),
    });
  }
  let bands = samples.len() / pixels;
  debug!(
    "读取栅格 {}: {}x{}, {} 个波段",
    path.display(),
    meta.width,
    meta.height,
    bands
  );

  Ok(RasterData {
    meta,
    bands,
    samples,
  })
}

pub fn read_probability_raster(path: &Path) -> Result<ProbabilityRaster, RasterError> {
  let raster = read_raster(path)?;
  if raster.bands != 1 {
    return Err(RasterError::NotSingleBand {
      path: path.to_path_buf(),
      bands: raster.bands,
    });
  }
  Ok(ProbabilityRaster {
    path: path.to_path_buf(),
    meta: raster.meta,
    data: raster.samples,
  })
}

/// 写出单波段 Float32 GeoTIFF
pub fn write_probability_raster(
  path: &Path,
  meta: &RasterMeta,
  data: &[f32],
) -> Result<(), RasterError> {
  if data.len() != meta.pixel_count() {
    return Err(RasterError::SizeMismatch {
      path: path.to_path_buf(),
      expected: meta.pixel_count(),
      found: data.len(),
    });
  }

  let file = File::create(path).map_err(io_error(path))?;
  let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_error(path))?;
  let mut image = encoder
    .new_image::<colortype::Gray32Float>(meta.width, meta.height)
    .map_err(tiff_error(path))?;
  write_geo_tags(image.encoder(), meta).map_err(tiff_error(path))?;
  image.write_data(data).map_err(tiff_error(path))?;
  Ok(())
}

fn read_geo_transform<R: Read + Seek>(
  decoder: &mut Decoder<R>,
) -> TiffResult<Option<GeoTransform>> {
  if let Some(matrix) = decoder.find_tag(Tag::ModelTransformationTag)? {
    let m = matrix.into_f64_vec()?;
    if m.len() >= 8 {
      return Ok(Some(GeoTransform {
        origin_x: m[3],
        pixel_width: m[0],
        row_rotation: m[1],
        origin_y: m[7],
        col_rotation: m[4],
        pixel_height: m[5],
      }));
    }
  }

  let scale = decoder
    .find_tag(Tag::ModelPixelScaleTag)?
    .map(|v| v.into_f64_vec())
    .transpose()?;
  let tiepoint = decoder
    .find_tag(Tag::ModelTiepointTag)?
    .map(|v| v.into_f64_vec())
    .transpose()?;

  match (scale, tiepoint) {
    (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => Ok(Some(GeoTransform {
      origin_x: t[3] - t[0] * s[0],
      pixel_width: s[0],
      row_rotation: 0.0,
      origin_y: t[4] + t[1] * s[1],
      col_rotation: 0.0,
      pixel_height: -s[1],
    })),
    _ => Ok(None),
  }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Option<Crs>> {
  match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
    Some(keys) => Ok(crs_from_geo_keys(&keys.into_u16_vec()?)),
    None => Ok(None),
  }
}

/// 从 GeoKeyDirectory 中取投影坐标系编码，缺失时退回地理坐标系编码
fn crs_from_geo_keys(keys: &[u16]) -> Option<Crs> {
  let count = *keys.get(3)? as usize;
  let entries: Vec<&[u16]> = keys[4..].chunks_exact(4).take(count).collect();

  [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY]
    .into_iter()
    .find_map(|key| {
      entries
        .iter()
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
        .filter(|code| *code != 0 && *code != USER_DEFINED)
    })
    .map(|code| Crs(u32::from(code)))
}

fn geo_keys_for(crs: Crs) -> Option<Vec<u16>> {
  let code = u16::try_from(crs.epsg()).ok()?;
  let (model_type, crs_key) = if crs.is_geographic() {
    (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
  } else {
    (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
  };
  Some(vec![
    1, 1, 0, 3,
    GT_MODEL_TYPE_KEY, 0, 1, model_type,
    GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
    crs_key, 0, 1, code,
  ])
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
  directory: &mut DirectoryEncoder<'_, W, K>,
  meta: &RasterMeta,
) -> TiffResult<()> {
  let t = &meta.transform;
  if t.is_north_up() {
    let scale = [t.pixel_width, -t.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    directory.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    directory.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
  } else {
    let matrix = [
      t.pixel_width, t.row_rotation, 0.0, t.origin_x,
      t.col_rotation, t.pixel_height, 0.0, t.origin_y,
      0.0, 0.0, 0.0, 0.0,
      0.0, 0.0, 0.0, 1.0,
    ];
    directory.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
  }

  if let Some(crs) = meta.crs {
    match geo_keys_for(crs) {
      Some(keys) => directory.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?,
      None => debug!("{} 超出 GeoKey 取值范围，不写入坐标系", crs),
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn meta(width: u32, height: u32) -> RasterMeta {
    RasterMeta {
      width,
      height,
      transform: GeoTransform::north_up(500_000.0, 100_000.0, 0.5),
      crs: Some(Crs::from_epsg(3794)),
    }
  }

  #[test]
  fn transform_flips_rows_downwards() {
    let t = GeoTransform::north_up(100.0, 200.0, 0.5);
    assert_eq!(t.apply(0.0, 0.0), (100.0, 200.0));
    assert_eq!(t.apply(10.0, 20.0), (105.0, 190.0));
    assert_eq!(t.resolution(), 0.5);
  }

  #[test]
  fn geo_keys_round_trip_projected_and_geographic() {
    let projected = Crs::from_epsg(3794);
    assert_eq!(crs_from_geo_keys(&geo_keys_for(projected).unwrap()), Some(projected));
    let geographic = Crs::from_epsg(4326);
    assert_eq!(crs_from_geo_keys(&geo_keys_for(geographic).unwrap()), Some(geographic));
  }

  #[test]
  fn user_defined_crs_is_ignored() {
    let keys = [1, 1, 0, 1, PROJECTED_CS_TYPE_KEY, 0, 1, USER_DEFINED];
    assert_eq!(crs_from_geo_keys(&keys), None);
    assert_eq!(crs_from_geo_keys(&[1, 1]), None);
  }

  #[test]
  fn probability_raster_survives_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tile_barrow.tif");
    let meta = meta(3, 2);
    let data = [0.0, 0.25, 0.5, 0.75, 1.0, 0.1];
    write_probability_raster(&path, &meta, &data).unwrap();

    let raster = read_probability_raster(&path).unwrap();
    assert_eq!(raster.meta, meta);
    assert_eq!(raster.data, data);
    assert_eq!(raster.get(1, 1), 1.0);
    assert_eq!(read_meta(&path).unwrap(), meta);
  }

  #[test]
  fn write_rejects_wrong_pixel_count() {
    let dir = tempfile::tempdir().unwrap();
    let err = write_probability_raster(&dir.path().join("x.tif"), &meta(2, 2), &[0.0; 3])
      .unwrap_err();
    assert!(matches!(err, RasterError::SizeMismatch { expected: 4, found: 3, .. }));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let err = read_meta(Path::new("/nonexistent/tile.tif")).unwrap_err();
    assert!(matches!(err, RasterError::Io { .. }));
  }
}
