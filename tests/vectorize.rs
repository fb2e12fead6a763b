// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// tests/vectorize.rs - 预测目录到 GeoPackage 的集成测试
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

use adaf::{
  aggregate::AggregateError,
  config::InferenceMode,
  label::Label,
  output::VectorOutput,
  prediction::PredictionError,
  raster::{Crs, GeoTransform, RasterMeta, write_probability_raster},
  vectorize::{self, LabelDir, VectorizeError, VectorizeOptions},
};
use rusqlite::Connection;

struct Row {
  label: String,
  envelope: [f64; 4],
  prediction_path: Option<String>,
}

fn read_layer(path: &Path, layer: &str) -> Vec<Row> {
  let conn = Connection::open(path).unwrap();
  let mut stmt = conn
    .prepare(&format!(
      "SELECT geom, label, prediction_path FROM {} ORDER BY fid",
      layer
    ))
    .unwrap();
  stmt
    .query_map([], |row| {
      let geom: Vec<u8> = row.get(0)?;
      let mut envelope = [0.0; 4];
      for (i, chunk) in geom[8..40].chunks_exact(8).enumerate() {
        envelope[i] = f64::from_le_bytes(chunk.try_into().unwrap());
      }
      Ok(Row {
        label: row.get(1)?,
        envelope,
        prediction_path: row.get(2)?,
      })
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

fn prediction_dir(root: &Path, label: &str) -> PathBuf {
  let dir = root.join(format!("predictions_{}", label));
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn write_lines(dir: &Path, name: &str, lines: &[&str]) {
  let mut text = lines.join("\n");
  if !text.is_empty() {
    text.push('\n');
  }
  std::fs::write(dir.join(name), text).unwrap();
}

#[test]
fn overlapping_boxes_across_tiles_become_one_feature() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "barrow");
  write_lines(&dir, "tile_a.txt", &["0 0 20 20 barrow 0.9 3794 0.5 100 200"]);
  write_lines(&dir, "tile_b.txt", &["0 0 20 20 barrow 0.9 3794 0.5 105 200"]);

  let output = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::Barrow, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap();

  let path = root.path().join("object_detection.gpkg");
  assert_eq!(output, VectorOutput::Written(path.clone()));
  let rows = read_layer(&path, "object_detection");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].label, "barrow");
  assert_eq!(rows[0].envelope, [100.0, 115.0, 190.0, 200.0]);
  assert!(rows[0].prediction_path.is_none());
}

#[test]
fn empty_predictions_write_no_file() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "barrow");
  write_lines(&dir, "tile_a.txt", &[]);
  write_lines(&dir, "tile_b.txt", &[]);

  let output = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::Barrow, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap();
  assert_eq!(output, VectorOutput::NoDetections);
  assert_eq!(output.to_sentinel_string(), "");
  assert!(!root.path().join("object_detection.gpkg").exists());
}

#[test]
fn below_threshold_detections_count_as_none() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "enclosure");
  write_lines(&dir, "tile_a.txt", &["0 0 20 20 enclosure 0.4 3794 0.5 100 200"]);

  let output = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::Enclosure, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap();
  assert_eq!(output, VectorOutput::NoDetections);
}

#[test]
fn malformed_record_aborts_the_batch() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "barrow");
  write_lines(&dir, "tile_a.txt", &["0 0 20 20 barrow 0.9 3794 0.5 100"]);

  let err = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::Barrow, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap_err();
  match err {
    VectorizeError::Prediction(PredictionError::MalformedRecord { path, line, .. }) => {
      assert_eq!(path, dir.join("tile_a.txt"));
      assert_eq!(line, 1);
    }
    other => panic!("unexpected error: {:?}", other),
  }
  assert!(!root.path().join("object_detection.gpkg").exists());
}

#[test]
fn labels_stay_separate_features() {
  let root = tempfile::tempdir().unwrap();
  let barrow = prediction_dir(root.path(), "barrow");
  let enclosure = prediction_dir(root.path(), "enclosure");
  write_lines(&barrow, "tile_a.txt", &["0 0 20 20 barrow 0.9 3794 0.5 100 200"]);
  write_lines(&enclosure, "tile_a.txt", &["0 0 20 20 enclosure 0.8 3794 0.5 100 200"]);

  let output = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[
      LabelDir::new(Label::Barrow, &barrow),
      LabelDir::new(Label::Enclosure, &enclosure),
    ],
    &VectorizeOptions::default(),
  )
  .unwrap();

  let path = output.path().unwrap().to_path_buf();
  let rows = read_layer(&path, "object_detection");
  let labels: Vec<_> = rows.iter().map(|r| r.label.as_str()).collect();
  assert_eq!(labels, ["barrow", "enclosure"]);
  assert_eq!(rows[0].envelope, rows[1].envelope);
}

#[test]
fn raising_the_threshold_never_adds_features() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "ringfort");
  write_lines(
    &dir,
    "tile_a.txt",
    &[
      "0 0 10 10 ringfort 0.55 3794 1 0 1000",
      "100 100 110 110 ringfort 0.75 3794 1 0 1000",
      "200 200 210 210 ringfort 0.95 3794 1 0 1000",
    ],
  );
  let dirs = [LabelDir::new(Label::Ringfort, &dir)];

  let mut last = usize::MAX;
  for threshold in [0.5, 0.6, 0.8, 0.99] {
    let output = vectorize::vectorize(
      InferenceMode::ObjectDetection,
      &dirs,
      &VectorizeOptions::default().with_threshold(threshold),
    )
    .unwrap();
    let count = match output {
      VectorOutput::Written(path) => read_layer(&path, "object_detection").len(),
      VectorOutput::NoDetections => 0,
    };
    assert!(count <= last, "threshold {} gave {} > {}", threshold, count, last);
    last = count;
  }
  assert_eq!(last, 0);
}

#[test]
fn mixed_crs_is_fatal() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "AO");
  write_lines(&dir, "tile_a.txt", &["0 0 20 20 AO 0.9 3794 0.5 100 200"]);
  write_lines(&dir, "tile_b.txt", &["0 0 20 20 AO 0.9 2154 0.5 100 200"]);

  let err = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::ArchaeologicalObject, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap_err();
  assert!(matches!(
    err,
    VectorizeError::Aggregate(AggregateError::CrsMismatch { .. })
  ));
}

#[test]
fn provenance_is_recorded_on_request() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "barrow");
  write_lines(&dir, "tile_a.txt", &["0 0 20 20 barrow 0.9 3794 0.5 100 200"]);

  let output = vectorize::vectorize(
    InferenceMode::ObjectDetection,
    &[LabelDir::new(Label::Barrow, &dir)],
    &VectorizeOptions::default().with_ml_paths(true),
  )
  .unwrap();
  let rows = read_layer(output.path().unwrap(), "object_detection");
  let recorded = rows[0].prediction_path.as_deref().unwrap();
  assert!(recorded.ends_with("predictions_barrow/tile_a.txt"));
}

fn probability_tile(dir: &Path, name: &str, origin_x: f64, data: &[f32]) {
  let meta = RasterMeta {
    width: 4,
    height: 4,
    transform: GeoTransform::north_up(origin_x, 4.0, 1.0),
    crs: Some(Crs::from_epsg(3794)),
  };
  write_probability_raster(&dir.join(name), &meta, data).unwrap();
}

#[test]
fn segmentation_regions_merge_across_tile_edges() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "barrow");
  #[rustfmt::skip]
  let left = [
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.9,
    0.0, 0.0, 0.0, 0.8,
    0.0, 0.0, 0.0, 0.0,
  ];
  #[rustfmt::skip]
  let right = [
    0.0, 0.0, 0.0, 0.0,
    0.7, 0.0, 0.0, 0.0,
    0.6, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
  ];
  probability_tile(&dir, "t1_barrow.tif", 0.0, &left);
  probability_tile(&dir, "t2_barrow.tif", 4.0, &right);
  // 其他标签的栅格不参与
  probability_tile(&dir, "t1_enclosure.tif", 0.0, &[1.0; 16]);

  let output = vectorize::vectorize(
    InferenceMode::Segmentation,
    &[LabelDir::new(Label::Barrow, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap();

  let path = root.path().join("semantic_segmentation.gpkg");
  assert_eq!(output, VectorOutput::Written(path.clone()));
  let rows = read_layer(&path, "semantic_segmentation");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].label, "barrow");
  assert_eq!(rows[0].envelope, [3.0, 5.0, 1.0, 3.0]);
}

#[test]
fn empty_segmentation_writes_no_file() {
  let root = tempfile::tempdir().unwrap();
  let dir = prediction_dir(root.path(), "AO");
  probability_tile(&dir, "t1_AO.tif", 0.0, &[0.1; 16]);

  let output = vectorize::vectorize(
    InferenceMode::Segmentation,
    &[LabelDir::new(Label::ArchaeologicalObject, &dir)],
    &VectorizeOptions::default(),
  )
  .unwrap();
  assert_eq!(output, VectorOutput::NoDetections);
  assert!(!root.path().join("semantic_segmentation.gpkg").exists());
}
