// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/task.rs - 流水线任务：可视化、推理、矢量化、清理
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
  path::{Path, PathBuf},
  time::Instant,
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{error, info};

use crate::{
  artifact::{ArtifactError, ArtifactKind, ArtifactRegistry, RetentionPolicy},
  config::{self, ConfigError, InferenceMode, ModelTable, TILE_SIZE_PX},
  extract::DEFAULT_THRESHOLD,
  infer::{self, InferError},
  input::{InputError, TileDirectoryInput},
  label::Label,
  model::InferenceBackend,
  output::{VectorOutput, VrtError, build_vrt},
  prediction::{self, PredictionError},
  runlog::{RunLog, RunLogError},
  vectorize::{self, LabelDir, VectorizeError, VectorizeOptions},
  visualize::{
    PrecomputedVisualization, VisualizationOutput, VisualizationRequest, VisualizeError, Visualizer,
  },
};

pub trait Task<V, B>: Sized {
  type Output;
  type Error;
  fn run_task(self, visualizer: Option<V>, backend: B) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("可视化错误: {0}")]
  Visualize(#[from] VisualizeError),
  #[error("切片输入错误: {0}")]
  Input(#[from] InputError),
  #[error("推理错误: {0}")]
  Infer(#[from] InferError),
  #[error("矢量化错误: {0}")]
  Vectorize(#[from] VectorizeError),
  #[error("预测结果错误: {0}")]
  Prediction(#[from] PredictionError),
  #[error("VRT 错误: {0}")]
  Vrt(#[from] VrtError),
  #[error("清理错误: {0}")]
  Artifact(#[from] ArtifactError),
  #[error(transparent)]
  RunLog(#[from] RunLogError),
  #[error("无法创建运行目录 {path}: {source}")]
  RunDir {
    path: PathBuf,
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Init,
  Visualize,
  Infer,
  Vectorize,
  Cleanup,
  Done,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Init => "初始化",
      Stage::Visualize => "可视化",
      Stage::Infer => "推理",
      Stage::Vectorize => "矢量化",
      Stage::Cleanup => "清理",
      Stage::Done => "完成",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
  pub dem_path: PathBuf,
  pub labels: Vec<Label>,
  pub mode: InferenceMode,
  /// 输入已是可视化结果，跳过可视化
  pub vis_exist_ok: bool,
  pub save_vis: bool,
  /// 保留逐切片预测结果，同时在矢量属性中记录来源文件
  pub save_ml_output: bool,
  pub threshold: f64,
}

impl RunConfig {
  pub fn new(dem_path: impl Into<PathBuf>, labels: Vec<Label>, mode: InferenceMode) -> Self {
    Self {
      dem_path: dem_path.into(),
      labels,
      mode,
      vis_exist_ok: false,
      save_vis: false,
      save_ml_output: false,
      threshold: DEFAULT_THRESHOLD,
    }
  }

  pub fn with_vis_exist_ok(mut self, vis_exist_ok: bool) -> Self {
    self.vis_exist_ok = vis_exist_ok;
    self
  }

  pub fn with_save_vis(mut self, save_vis: bool) -> Self {
    self.save_vis = save_vis;
    self
  }

  pub fn with_save_ml_output(mut self, save_ml_output: bool) -> Self {
    self.save_ml_output = save_ml_output;
    self
  }

  pub fn with_threshold(mut self, threshold: f64) -> Self {
    self.threshold = threshold;
    self
  }
}

/// 一次运行的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
  pub run_dir: PathBuf,
  pub output: VectorOutput,
}

/// 运行目录：`<DEM 所在目录>/<DEM 文件名>_%Y%m%d_%H%M%S`
pub fn run_dir_for(dem: &Path, started_at: &DateTime<Local>) -> PathBuf {
  let parent = dem.parent().unwrap_or(Path::new(""));
  let stem = dem
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  parent.join(format!("{}_{}", stem, started_at.format("%Y%m%d_%H%M%S")))
}

pub struct InferenceTask {
  config: RunConfig,
  table: ModelTable,
  started_at: DateTime<Local>,
}

impl InferenceTask {
  pub fn new(config: RunConfig, table: ModelTable) -> Self {
    Self {
      config,
      table,
      started_at: Local::now(),
    }
  }

  pub fn with_started_at(mut self, started_at: DateTime<Local>) -> Self {
    self.started_at = started_at;
    self
  }

  fn enter(stage: Stage) {
    info!("进入阶段: {}", stage);
  }

  fn init<V>(&self, visualizer: &Option<V>) -> Result<(PathBuf, RunLog), TaskError> {
    Self::enter(Stage::Init);
    self.table.validate(self.config.mode, &self.config.labels)?;
    config::validate_tile_size(TILE_SIZE_PX)?;
    if !self.config.vis_exist_ok && visualizer.is_none() {
      return Err(ConfigError::MissingVisualizer.into());
    }

    let run_dir = run_dir_for(&self.config.dem_path, &self.started_at);
    std::fs::create_dir(&run_dir).map_err(|source| TaskError::RunDir {
      path: run_dir.clone(),
      source,
    })?;
    info!("运行目录: {}", run_dir.display());
    let log = RunLog::create(&run_dir)?;
    Ok((run_dir, log))
  }

  fn visualize<V: Visualizer>(
    &self,
    visualizer: Option<V>,
    run_dir: &Path,
    log: &RunLog,
    registry: &mut ArtifactRegistry,
  ) -> Result<VisualizationOutput, TaskError> {
    Self::enter(Stage::Visualize);
    let output_dir = run_dir.join("visualization");
    registry.register(ArtifactKind::Visualization, &output_dir);

    let request = VisualizationRequest {
      dem: &self.config.dem_path,
      output_dir: &output_dir,
      tile_size: TILE_SIZE_PX,
      workers: config::worker_count(),
    };
    log.log_vis_inputs(
      request.dem,
      self.config.vis_exist_ok,
      request.tile_size,
      request.workers,
    )?;

    let now = Instant::now();
    let output = match visualizer {
      Some(visualizer) if !self.config.vis_exist_ok => visualizer.visualize(&request)?,
      _ => PrecomputedVisualization.visualize(&request)?,
    };
    log.log_vis_results(&output, now.elapsed())?;
    Ok(output)
  }

  fn infer<B: InferenceBackend>(
    &self,
    backend: &B,
    tiles_dir: &Path,
    run_dir: &Path,
    log: &RunLog,
    registry: &mut ArtifactRegistry,
  ) -> Result<Vec<LabelDir>, TaskError> {
    Self::enter(Stage::Infer);
    let tiles = TileDirectoryInput::open(tiles_dir)?;
    log.log_inference_inputs(self.config.mode, &self.config.labels, tiles.len())?;

    let now = Instant::now();
    let dirs = infer::run_inference(
      backend,
      &self.table,
      self.config.mode,
      &self.config.labels,
      &tiles,
      run_dir,
    )?;
    for dir in &dirs {
      registry.register(ArtifactKind::Predictions, &dir.dir);
    }
    log.log_inference_results(&dirs, now.elapsed())?;
    Ok(dirs)
  }

  /// 保留的分割结果生成 VRT：`<run>/predictions_<label>_<label>.vrt`
  fn build_mosaics(
    &self,
    dirs: &[LabelDir],
    run_dir: &Path,
    registry: &ArtifactRegistry,
  ) -> Result<Vec<PathBuf>, TaskError> {
    if self.config.mode != InferenceMode::Segmentation {
      return Ok(Vec::new());
    }
    let retained: Vec<&Path> = registry.retained(ArtifactKind::Predictions).collect();
    let mut mosaics = Vec::new();
    for dir in dirs.iter().filter(|d| retained.contains(&d.dir.as_path())) {
      let rasters = prediction::list_segmentation_rasters(&dir.dir, dir.label.as_str())?;
      if rasters.is_empty() {
        continue;
      }
      let vrt = run_dir.join(format!("predictions_{0}_{0}.vrt", dir.label));
      mosaics.push(build_vrt(&rasters, &vrt)?);
    }
    Ok(mosaics)
  }
}

impl<V: Visualizer, B: InferenceBackend> Task<V, B> for InferenceTask {
  type Output = RunOutcome;
  type Error = TaskError;

  fn run_task(self, visualizer: Option<V>, backend: B) -> Result<RunOutcome, TaskError> {
    let started = Instant::now();
    info!(
      "开始任务: {} ({}, {} 个标签)",
      self.config.dem_path.display(),
      self.config.mode,
      self.config.labels.len()
    );

    let (run_dir, log) = self.init(&visualizer)?;
    let mut registry = ArtifactRegistry::new(RetentionPolicy {
      keep_visualization: self.config.save_vis,
      keep_predictions: self.config.save_ml_output,
    });

    let result = (|| {
      let vis = self.visualize(visualizer, &run_dir, &log, &mut registry)?;
      let dirs = self.infer(&backend, &vis.directory, &run_dir, &log, &mut registry)?;

      Self::enter(Stage::Vectorize);
      let now = Instant::now();
      let options = VectorizeOptions::default()
        .with_threshold(self.config.threshold)
        .with_ml_paths(self.config.save_ml_output);
      let output = vectorize::vectorize(self.config.mode, &dirs, &options)?;
      log.log_vectorization_results(&output, now.elapsed())?;
      Ok::<_, TaskError>((dirs, output))
    })();

    let (dirs, output) = match result {
      Ok(done) => done,
      Err(e) => {
        error!("任务失败，保留中间产物于 {}: {}", run_dir.display(), e);
        return Err(e);
      }
    };

    Self::enter(Stage::Cleanup);
    let mosaics = self.build_mosaics(&dirs, &run_dir, &registry)?;
    let report = registry.cleanup()?;
    log.log_cleanup(&report, &mosaics)?;

    Self::enter(Stage::Done);
    log.log_finished(started.elapsed())?;
    info!("任务完成，总耗时: {:.2?}", started.elapsed());
    Ok(RunOutcome { run_dir, output })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn run_dir_is_named_after_dem_and_start_time() {
    let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
    assert_eq!(
      run_dir_for(Path::new("/data/dem/ISA-147_SLRM.tif"), &started),
      PathBuf::from("/data/dem/ISA-147_SLRM_20240309_140507")
    );
  }

  #[test]
  fn config_builder_sets_flags() {
    let config = RunConfig::new("dem.tif", vec![Label::Barrow], InferenceMode::Segmentation)
      .with_vis_exist_ok(true)
      .with_save_vis(true)
      .with_save_ml_output(true)
      .with_threshold(0.8);
    assert!(config.vis_exist_ok && config.save_vis && config.save_ml_output);
    assert_eq!(config.threshold, 0.8);
  }
}
