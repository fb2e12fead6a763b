// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/extract.rs - 预测结果到几何记录
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

pub mod polygonize;

use geo::{Coord, Polygon, Rect};
use tracing::debug;

use crate::{
  prediction::{self, DetectionFile, DetectionRecord},
  raster::ProbabilityRaster,
};

/// 默认置信度阈值
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// 世界坐标下的单个预测几何
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
  pub polygon: Polygon<f64>,
  pub label: String,
  pub score: Option<f64>,
  pub provenance: Option<String>,
}

/// 检测框转为世界坐标矩形；分数不高于阈值或面积为零时返回 None
pub fn detection_geometry(record: &DetectionRecord, threshold: f64) -> Option<GeometryRecord> {
  if record.score.is_nan() || record.score <= threshold {
    return None;
  }

  let [x0, y0, x1, y1] = record.bbox;
  let res = record.resolution;
  let rect = Rect::new(
    Coord {
      x: record.x_min + res * x0,
      y: record.y_max - res * y0,
    },
    Coord {
      x: record.x_min + res * x1,
      y: record.y_max - res * y1,
    },
  );
  if rect.width() <= 0.0 || rect.height() <= 0.0 {
    debug!("丢弃退化检测框: {:?}", record.bbox);
    return None;
  }

  Some(GeometryRecord {
    polygon: rect.to_polygon(),
    label: record.label.clone(),
    score: Some(record.score),
    provenance: None,
  })
}

pub fn detection_geometries(
  file: &DetectionFile,
  threshold: f64,
  keep_paths: bool,
) -> Vec<GeometryRecord> {
  let source = keep_paths.then(|| prediction::provenance(&file.path));
  file
    .records
    .iter()
    .filter_map(|record| detection_geometry(record, threshold))
    .map(|mut geometry| {
      geometry.provenance = source.clone();
      geometry
    })
    .collect()
}

/// 概率栅格按 `value >= threshold` 二值化并追踪区域
pub fn segmentation_geometries(
  raster: &ProbabilityRaster,
  label: &str,
  threshold: f64,
  keep_paths: bool,
) -> Vec<GeometryRecord> {
  let mask = polygonize::binarize(
    &raster.data,
    raster.meta.width,
    raster.meta.height,
    threshold as f32,
  );
  let source = keep_paths.then(|| prediction::provenance(&raster.path));
  let records: Vec<GeometryRecord> = polygonize::polygonize(&mask, &raster.meta.transform)
    .into_iter()
    .map(|polygon| GeometryRecord {
      polygon,
      label: label.to_string(),
      score: None,
      provenance: source.clone(),
    })
    .collect();
  debug!("{}: 提取 {} 个区域", raster.path.display(), records.len());
  records
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::{GeoTransform, RasterMeta};
  use geo::{Area, BoundingRect};
  use std::path::PathBuf;

  fn record(score: f64) -> DetectionRecord {
    DetectionRecord {
      bbox: [10.0, 10.0, 20.0, 20.0],
      label: "barrow".to_string(),
      score,
      epsg: 3794,
      resolution: 0.5,
      x_min: 100.0,
      y_max: 200.0,
    }
  }

  #[test]
  fn box_maps_to_world_coordinates() {
    let geometry = detection_geometry(&record(0.9), DEFAULT_THRESHOLD).unwrap();
    let rect = geometry.polygon.bounding_rect().unwrap();
    assert_eq!(rect.min(), Coord { x: 105.0, y: 190.0 });
    assert_eq!(rect.max(), Coord { x: 110.0, y: 195.0 });
    assert_eq!(geometry.score, Some(0.9));
  }

  #[test]
  fn scores_at_threshold_are_discarded() {
    assert!(detection_geometry(&record(0.5), 0.5).is_none());
    assert!(detection_geometry(&record(0.51), 0.5).is_some());
  }

  #[test]
  fn nan_score_is_discarded() {
    assert!(detection_geometry(&record(f64::NAN), 0.5).is_none());
    assert!(detection_geometry(&record(f64::NAN), 0.0).is_none());
  }

  #[test]
  fn higher_threshold_never_adds_geometries() {
    let file = DetectionFile {
      path: PathBuf::from("run/predictions_barrow/t.txt"),
      records: [0.2, 0.55, 0.7, 0.95].into_iter().map(record).collect(),
    };
    let mut last = usize::MAX;
    for threshold in [0.0, 0.3, 0.5, 0.6, 0.8, 0.99] {
      let count = detection_geometries(&file, threshold, false).len();
      assert!(count <= last);
      last = count;
    }
  }

  #[test]
  fn provenance_is_attached_on_request() {
    let file = DetectionFile {
      path: PathBuf::from("/abs/run/predictions_barrow/t.txt"),
      records: vec![record(0.9)],
    };
    let kept = detection_geometries(&file, 0.5, true);
    assert_eq!(kept[0].provenance.as_deref(), Some("run/predictions_barrow/t.txt"));
    assert!(detection_geometries(&file, 0.5, false)[0].provenance.is_none());
  }

  #[test]
  fn segmentation_keeps_only_foreground() {
    let raster = ProbabilityRaster {
      path: PathBuf::from("t_barrow.tif"),
      meta: RasterMeta {
        width: 4,
        height: 2,
        transform: GeoTransform::north_up(0.0, 2.0, 1.0),
        crs: None,
      },
      data: vec![0.9, 0.8, 0.1, 0.7, 0.6, 0.2, 0.0, 0.95],
    };
    let records = segmentation_geometries(&raster, "barrow", 0.5, false);
    assert_eq!(records.len(), 2);
    let area: f64 = records.iter().map(|r| r.polygon.unsigned_area()).sum();
    assert_eq!(area, 5.0);
    assert!(records.iter().all(|r| r.label == "barrow" && r.score.is_none()));
  }

  #[test]
  fn empty_tile_contributes_nothing() {
    let raster = ProbabilityRaster {
      path: PathBuf::from("t_barrow.tif"),
      meta: RasterMeta {
        width: 2,
        height: 2,
        transform: GeoTransform::north_up(0.0, 2.0, 1.0),
        crs: None,
      },
      data: vec![0.0; 4],
    };
    assert!(segmentation_geometries(&raster, "barrow", 0.5, true).is_empty());
  }
}
