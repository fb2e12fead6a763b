// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/infer.rs - 逐标签切片推理
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
  path::{Path, PathBuf},
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{ConfigError, InferenceMode, ModelTable},
  input::{InputError, TileDirectoryInput},
  label::Label,
  model::{DetectItem, InferenceBackend, Model, ModelError, RawPrediction},
  prediction::{self, DetectionRecord, PredictionError},
  raster::{self, RasterError},
  tile::Tile,
  vectorize::LabelDir,
};

#[derive(Error, Debug)]
pub enum InferError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("读取切片错误: {0}")]
  Input(#[from] InputError),
  #[error("写出预测结果错误: {0}")]
  Prediction(#[from] PredictionError),
  #[error("写出概率栅格错误: {0}")]
  Raster(#[from] RasterError),
  #[error("切片 {0} 缺少坐标参考系，无法记录检测结果")]
  MissingCrs(PathBuf),
  #[error("{mode} 模式下模型输出类型不符")]
  UnexpectedOutput { mode: InferenceMode },
  #[error("无法创建目录 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 某个标签的预测目录：`<save_dir>/predictions_<label>`
pub fn prediction_dir(save_dir: &Path, label: Label) -> PathBuf {
  save_dir.join(format!("predictions_{}", label))
}

fn detection_records(
  tile: &Tile,
  label: Label,
  items: &[DetectItem],
) -> Result<Vec<DetectionRecord>, InferError> {
  let crs = tile
    .meta()
    .crs
    .ok_or_else(|| InferError::MissingCrs(tile.path().to_path_buf()))?;
  let transform = &tile.meta().transform;
  Ok(
    items
      .iter()
      .map(|item| DetectionRecord {
        bbox: item.bbox.map(f64::from),
        label: label.to_string(),
        score: f64::from(item.score),
        epsg: crs.epsg(),
        resolution: transform.resolution(),
        x_min: transform.origin_x,
        y_max: transform.origin_y,
      })
      .collect(),
  )
}

/// 写出单个切片的预测结果
pub fn save_prediction(
  tile: &Tile,
  label: Label,
  mode: InferenceMode,
  prediction: &RawPrediction,
  dir: &Path,
) -> Result<PathBuf, InferError> {
  match (mode, prediction) {
    (InferenceMode::ObjectDetection, RawPrediction::Boxes(items)) => {
      let path = dir.join(format!("{}.txt", tile.stem()));
      let records = detection_records(tile, label, items)?;
      prediction::write_detection_file(&path, &records)?;
      Ok(path)
    }
    (InferenceMode::Segmentation, RawPrediction::Probability(values)) => {
      let path = dir.join(format!("{}_{}.tif", tile.stem(), label));
      raster::write_probability_raster(&path, tile.meta(), values)?;
      Ok(path)
    }
    _ => Err(InferError::UnexpectedOutput { mode }),
  }
}

/// 按标签顺序推理：加载模型、预测全部切片、释放模型后再处理下一个标签
pub fn run_inference<B: InferenceBackend>(
  backend: &B,
  table: &ModelTable,
  mode: InferenceMode,
  labels: &[Label],
  tiles: &TileDirectoryInput,
  save_dir: &Path,
) -> Result<Vec<LabelDir>, InferError> {
  let mut outputs = Vec::with_capacity(labels.len());
  for &label in labels {
    let spec = table.lookup(mode, label)?;
    let now = Instant::now();
    let model = backend.load(mode, spec)?;
    debug!("标签 {} 模型加载耗时: {:.2?}", label, now.elapsed());

    let dir = prediction_dir(save_dir, label);
    std::fs::create_dir_all(&dir).map_err(|source| InferError::Io {
      path: dir.clone(),
      source,
    })?;

    let now = Instant::now();
    let mut count = 0;
    for tile in tiles {
      let tile = tile?;
      let result = model.infer(&tile)?;
      let path = save_prediction(&tile, label, mode, &result, &dir)?;
      debug!("{} -> {}", tile.path().display(), path.display());
      count += 1;
    }
    drop(model);
    info!(
      "标签 {} 推理完成: {} 个切片，耗时: {:.2?}",
      label,
      count,
      now.elapsed()
    );

    outputs.push(LabelDir::new(label, dir));
  }
  Ok(outputs)
}
