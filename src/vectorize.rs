// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/vectorize.rs - 预测目录到矢量数据集
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
  str::FromStr,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  aggregate::{AggregateError, LabelAggregator},
  config::InferenceMode,
  extract::{self, DEFAULT_THRESHOLD},
  label::{Label, UnknownLabelError},
  output::{GpkgError, GpkgWriter, VectorOutput, VectorWriter},
  prediction::{self, PredictionError},
  raster::{self, RasterError},
  resolve,
};

#[derive(Error, Debug)]
pub enum VectorizeError {
  #[error("没有提供任何预测目录")]
  NoInputs,
  #[error("读取预测结果错误: {0}")]
  Prediction(#[from] PredictionError),
  #[error("读取概率栅格错误: {0}")]
  Raster(#[from] RasterError),
  #[error(transparent)]
  Aggregate(#[from] AggregateError),
  #[error("写出矢量数据集错误: {0}")]
  Gpkg(#[from] GpkgError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelDirParseError {
  #[error("'{0}' 格式错误，应为 <标签>=<预测目录>，例如 barrow=run/predictions_barrow")]
  MissingSeparator(String),
  #[error("'{0}' 缺少预测目录")]
  EmptyPath(String),
  #[error(transparent)]
  Label(#[from] UnknownLabelError),
}

/// 某个标签的逐切片预测目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDir {
  pub label: Label,
  pub dir: PathBuf,
}

impl LabelDir {
  pub fn new(label: Label, dir: impl Into<PathBuf>) -> Self {
    Self {
      label,
      dir: dir.into(),
    }
  }
}

/// 解析 `label=path`
impl FromStr for LabelDir {
  type Err = LabelDirParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (label, dir) = s
      .split_once('=')
      .ok_or_else(|| LabelDirParseError::MissingSeparator(s.to_string()))?;
    if dir.trim().is_empty() {
      return Err(LabelDirParseError::EmptyPath(s.to_string()));
    }
    Ok(Self::new(label.parse()?, dir))
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorizeOptions {
  pub threshold: f64,
  /// 在属性表中记录每个要素的来源预测文件
  pub keep_ml_paths: bool,
}

impl Default for VectorizeOptions {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      keep_ml_paths: false,
    }
  }
}

impl VectorizeOptions {
  pub fn with_threshold(mut self, threshold: f64) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_ml_paths(mut self, keep: bool) -> Self {
    self.keep_ml_paths = keep;
    self
  }
}

/// 输出文件位于第一个预测目录的上一级
pub fn output_path(mode: InferenceMode, dirs: &[LabelDir]) -> Result<PathBuf, VectorizeError> {
  let first = dirs.first().ok_or(VectorizeError::NoInputs)?;
  let parent = first.dir.parent().unwrap_or(Path::new(""));
  Ok(parent.join(mode.output_file_name()))
}

fn collect_object_detection(
  dirs: &[LabelDir],
  options: &VectorizeOptions,
  aggregator: &mut LabelAggregator,
) -> Result<(), VectorizeError> {
  for label_dir in dirs {
    let files = prediction::read_detection_dir(&label_dir.dir)?;
    let before = aggregator.len();
    for file in &files {
      for record in &file.records {
        aggregator.observe_crs(Some(record.crs()), &file.path)?;
      }
      aggregator.extend(extract::detection_geometries(
        file,
        options.threshold,
        options.keep_ml_paths,
      ));
    }
    info!(
      "标签 {}: {} 个预测文件，{} 个检测框",
      label_dir.label,
      files.len(),
      aggregator.len() - before
    );
  }
  Ok(())
}

fn collect_segmentation(
  dirs: &[LabelDir],
  options: &VectorizeOptions,
  aggregator: &mut LabelAggregator,
) -> Result<(), VectorizeError> {
  for label_dir in dirs {
    let label = label_dir.label.as_str();
    let rasters = prediction::list_segmentation_rasters(&label_dir.dir, label)?;
    let before = aggregator.len();
    for path in &rasters {
      let raster = raster::read_probability_raster(path)?;
      aggregator.observe_crs(raster.meta.crs, path)?;
      aggregator.extend(extract::segmentation_geometries(
        &raster,
        label,
        options.threshold,
        options.keep_ml_paths,
      ));
    }
    info!(
      "标签 {}: {} 个概率栅格，{} 个区域",
      label_dir.label,
      rasters.len(),
      aggregator.len() - before
    );
  }
  Ok(())
}

fn finish(
  mode: InferenceMode,
  dirs: &[LabelDir],
  aggregator: LabelAggregator,
) -> Result<VectorOutput, VectorizeError> {
  let output = output_path(mode, dirs)?;
  let Some(aggregation) = aggregator.finish() else {
    warn!("没有任何检测结果");
    return Ok(VectorOutput::NoDetections);
  };
  let features = resolve::resolve_overlaps(aggregation.records);
  Ok(GpkgWriter::new(output).write_features(aggregation.crs, &features)?)
}

pub fn object_detection_vectors(
  dirs: &[LabelDir],
  options: &VectorizeOptions,
) -> Result<VectorOutput, VectorizeError> {
  let mut aggregator = LabelAggregator::new();
  collect_object_detection(dirs, options, &mut aggregator)?;
  finish(InferenceMode::ObjectDetection, dirs, aggregator)
}

pub fn semantic_segmentation_vectors(
  dirs: &[LabelDir],
  options: &VectorizeOptions,
) -> Result<VectorOutput, VectorizeError> {
  let mut aggregator = LabelAggregator::new();
  collect_segmentation(dirs, options, &mut aggregator)?;
  finish(InferenceMode::Segmentation, dirs, aggregator)
}

pub fn vectorize(
  mode: InferenceMode,
  dirs: &[LabelDir],
  options: &VectorizeOptions,
) -> Result<VectorOutput, VectorizeError> {
  if dirs.is_empty() {
    return Err(VectorizeError::NoInputs);
  }
  info!("矢量化（{}）: {} 个标签目录", mode, dirs.len());
  match mode {
    InferenceMode::ObjectDetection => object_detection_vectors(dirs, options),
    InferenceMode::Segmentation => semantic_segmentation_vectors(dirs, options),
  }
}
