// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/output/vrt.rs - 概率栅格虚拟镶嵌（VRT）
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

use std::path::{Path, PathBuf};

use quick_xml::{
  Writer,
  events::{BytesEnd, BytesStart, BytesText, Event},
};
use thiserror::Error;
use tracing::info;

use crate::raster::{self, Crs, GeoTransform, RasterError, RasterMeta};

#[derive(Error, Debug)]
pub enum VrtError {
  #[error("没有可镶嵌的栅格")]
  NoSources,
  #[error("栅格 {path} 无法镶嵌: {reason}")]
  Inconsistent { path: PathBuf, reason: String },
  #[error("读取栅格错误: {0}")]
  Raster(#[from] RasterError),
  #[error("XML 写入错误: {0}")]
  Xml(#[from] quick_xml::Error),
  #[error("无法写入 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

struct Source {
  path: PathBuf,
  meta: RasterMeta,
}

struct Mosaic {
  transform: GeoTransform,
  width: u32,
  height: u32,
  crs: Option<Crs>,
}

fn mosaic_extent(sources: &[Source]) -> Result<Mosaic, VrtError> {
  let first = sources.first().ok_or(VrtError::NoSources)?;
  let resolution = first.meta.transform.resolution();
  let crs = first.meta.crs;

  let (mut min_x, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
  let (mut max_x, mut min_y) = (f64::NEG_INFINITY, f64::INFINITY);
  for source in sources {
    let transform = &source.meta.transform;
    let inconsistent = |reason: &str| VrtError::Inconsistent {
      path: source.path.clone(),
      reason: reason.to_string(),
    };
    if !transform.is_north_up() {
      return Err(inconsistent("带旋转的仿射变换"));
    }
    if (transform.resolution() - resolution).abs() > resolution * 1e-9 {
      return Err(inconsistent("分辨率不一致"));
    }
    if source.meta.crs != crs {
      return Err(inconsistent("坐标参考系不一致"));
    }
    let (left, top) = transform.apply(0.0, 0.0);
    let (right, bottom) =
      transform.apply(f64::from(source.meta.width), f64::from(source.meta.height));
    min_x = min_x.min(left.min(right));
    max_x = max_x.max(left.max(right));
    min_y = min_y.min(top.min(bottom));
    max_y = max_y.max(top.max(bottom));
  }

  Ok(Mosaic {
    transform: GeoTransform::north_up(min_x, max_y, resolution),
    width: ((max_x - min_x) / resolution).round() as u32,
    height: ((max_y - min_y) / resolution).round() as u32,
    crs,
  })
}

fn text_element<W: std::io::Write>(
  writer: &mut Writer<W>,
  name: &str,
  attributes: &[(&str, &str)],
  text: &str,
) -> Result<(), quick_xml::Error> {
  writer.write_event(Event::Start(
    BytesStart::new(name).with_attributes(attributes.iter().copied()),
  ))?;
  writer.write_event(Event::Text(BytesText::new(text)))?;
  writer.write_event(Event::End(BytesEnd::new(name)))?;
  Ok(())
}

fn rect_element<W: std::io::Write>(
  writer: &mut Writer<W>,
  name: &str,
  x: i64,
  y: i64,
  width: u32,
  height: u32,
) -> Result<(), quick_xml::Error> {
  let (x, y, w, h) = (x.to_string(), y.to_string(), width.to_string(), height.to_string());
  writer.write_event(Event::Empty(BytesStart::new(name).with_attributes([
    ("xOff", x.as_str()),
    ("yOff", y.as_str()),
    ("xSize", w.as_str()),
    ("ySize", h.as_str()),
  ])))?;
  Ok(())
}

fn render(vrt_path: &Path, sources: &[Source], mosaic: &Mosaic) -> Result<Vec<u8>, VrtError> {
  let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
  let (width, height) = (mosaic.width.to_string(), mosaic.height.to_string());
  writer.write_event(Event::Start(BytesStart::new("VRTDataset").with_attributes([
    ("rasterXSize", width.as_str()),
    ("rasterYSize", height.as_str()),
  ])))?;

  if let Some(crs) = mosaic.crs {
    text_element(&mut writer, "SRS", &[], &crs.to_string())?;
  }
  let transform = mosaic
    .transform
    .as_gdal()
    .iter()
    .map(|v| format!("{:.16e}", v))
    .collect::<Vec<_>>()
    .join(", ");
  text_element(&mut writer, "GeoTransform", &[], &transform)?;

  writer.write_event(Event::Start(BytesStart::new("VRTRasterBand").with_attributes([
    ("dataType", "Float32"),
    ("band", "1"),
  ])))?;
  text_element(&mut writer, "ColorInterp", &[], "Gray")?;

  let base = vrt_path.parent().unwrap_or(Path::new(""));
  let resolution = mosaic.transform.resolution();
  for source in sources {
    let (relative, file) = match source.path.strip_prefix(base) {
      Ok(rel) if !base.as_os_str().is_empty() => ("1", rel.to_string_lossy().into_owned()),
      _ => ("0", source.path.to_string_lossy().into_owned()),
    };
    let (left, top) = source.meta.transform.apply(0.0, 0.0);
    let x_off = ((left - mosaic.transform.origin_x) / resolution).round() as i64;
    let y_off = ((mosaic.transform.origin_y - top) / resolution).round() as i64;

    writer.write_event(Event::Start(BytesStart::new("SimpleSource")))?;
    text_element(
      &mut writer,
      "SourceFilename",
      &[("relativeToVRT", relative)],
      &file,
    )?;
    text_element(&mut writer, "SourceBand", &[], "1")?;
    rect_element(&mut writer, "SrcRect", 0, 0, source.meta.width, source.meta.height)?;
    rect_element(
      &mut writer,
      "DstRect",
      x_off,
      y_off,
      source.meta.width,
      source.meta.height,
    )?;
    writer.write_event(Event::End(BytesEnd::new("SimpleSource")))?;
  }

  writer.write_event(Event::End(BytesEnd::new("VRTRasterBand")))?;
  writer.write_event(Event::End(BytesEnd::new("VRTDataset")))?;
  Ok(writer.into_inner())
}

/// 为一组单波段概率栅格生成 VRT 镶嵌
pub fn build_vrt(tiles: &[PathBuf], vrt_path: &Path) -> Result<PathBuf, VrtError> {
  let sources = tiles
    .iter()
    .map(|path| {
      Ok(Source {
        path: path.clone(),
        meta: raster::read_meta(path)?,
      })
    })
    .collect::<Result<Vec<_>, VrtError>>()?;
  let mosaic = mosaic_extent(&sources)?;
  let xml = render(vrt_path, &sources, &mosaic)?;
  std::fs::write(vrt_path, xml).map_err(|source| VrtError::Io {
    path: vrt_path.to_path_buf(),
    source,
  })?;
  info!(
    "生成 VRT {}: {} 个栅格, {}x{}",
    vrt_path.display(),
    sources.len(),
    mosaic.width,
    mosaic.height
  );
  Ok(vrt_path.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::write_probability_raster;

  fn tile(dir: &Path, name: &str, origin_x: f64, crs: u32) -> PathBuf {
    let path = dir.join(name);
    let meta = RasterMeta {
      width: 4,
      height: 2,
      transform: GeoTransform::north_up(origin_x, 100.0, 0.5),
      crs: Some(Crs::from_epsg(crs)),
    };
    write_probability_raster(&path, &meta, &[0.25; 8]).unwrap();
    path
  }

  #[test]
  fn mosaic_covers_all_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let predictions = dir.path().join("predictions_barrow");
    std::fs::create_dir(&predictions).unwrap();
    let tiles = vec![
      tile(&predictions, "a_barrow.tif", 0.0, 3794),
      tile(&predictions, "b_barrow.tif", 2.0, 3794),
    ];
    let vrt = dir.path().join("predictions_barrow_barrow.vrt");
    build_vrt(&tiles, &vrt).unwrap();

    let xml = std::fs::read_to_string(&vrt).unwrap();
    assert!(xml.contains(r#"<VRTDataset rasterXSize="8" rasterYSize="2">"#));
    assert!(xml.contains("<SRS>EPSG:3794</SRS>"));
    assert!(xml.contains(r#"<SourceFilename relativeToVRT="1">predictions_barrow/a_barrow.tif</SourceFilename>"#));
    assert!(xml.contains(r#"<DstRect xOff="4" yOff="0" xSize="4" ySize="2"/>"#));
  }

  #[test]
  fn mixed_crs_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tiles = vec![
      tile(dir.path(), "a.tif", 0.0, 3794),
      tile(dir.path(), "b.tif", 2.0, 2154),
    ];
    assert!(matches!(
      build_vrt(&tiles, &dir.path().join("m.vrt")),
      Err(VrtError::Inconsistent { .. })
    ));
  }

  #[test]
  fn empty_source_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      build_vrt(&[], &dir.path().join("m.vrt")),
      Err(VrtError::NoSources)
    ));
  }
}
