// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/runlog.rs - 运行目录中的文本日志
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::Local;
use thiserror::Error;

use crate::{
  artifact::CleanupReport, config::InferenceMode, label::Label, output::VectorOutput,
  vectorize::LabelDir, visualize::VisualizationOutput,
};

pub const LOG_FILE_NAME: &str = "logfile.txt";

#[derive(Error, Debug)]
#[error("无法写入运行日志 {path}: {source}")]
pub struct RunLogError {
  pub path: PathBuf,
  pub source: std::io::Error,
}

/// 追加写入的运行日志，记录输入、各阶段耗时与结果路径
#[derive(Debug, Clone)]
pub struct RunLog {
  path: PathBuf,
}

impl RunLog {
  pub fn create(run_dir: &Path) -> Result<Self, RunLogError> {
    let log = Self {
      path: run_dir.join(LOG_FILE_NAME),
    };
    log.entry(
      "ADAF 运行日志",
      &[format!("运行目录: {}", run_dir.display())],
    )?;
    Ok(log)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn entry(&self, title: &str, lines: &[String]) -> Result<(), RunLogError> {
    let error = |source| RunLogError {
      path: self.path.clone(),
      source,
    };
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .map_err(error)?;
    let mut text = format!("[{}] {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), title);
    for line in lines {
      text.push_str("    ");
      text.push_str(line);
      text.push('\n');
    }
    text.push('\n');
    file.write_all(text.as_bytes()).map_err(error)
  }

  pub fn log_vis_inputs(
    &self,
    dem: &Path,
    precomputed: bool,
    tile_size: u32,
    workers: usize,
  ) -> Result<(), RunLogError> {
    self.entry(
      "可视化输入",
      &[
        format!("DEM: {}", dem.display()),
        format!("使用已有可视化: {}", precomputed),
        format!("切片尺寸: {} px", tile_size),
        format!("并行进程数: {}", workers),
      ],
    )
  }

  pub fn log_vis_results(
    &self,
    output: &VisualizationOutput,
    elapsed: Duration,
  ) -> Result<(), RunLogError> {
    let mut lines = vec![format!("切片目录: {}", output.directory.display())];
    if let Some(mosaic) = &output.mosaic {
      lines.push(format!("镶嵌: {}", mosaic.display()));
    }
    lines.push(format!("耗时: {:.2?}", elapsed));
    self.entry("可视化完成", &lines)
  }

  pub fn log_inference_inputs(
    &self,
    mode: InferenceMode,
    labels: &[Label],
    tiles: usize,
  ) -> Result<(), RunLogError> {
    let labels = labels
      .iter()
      .map(Label::as_str)
      .collect::<Vec<_>>()
      .join(", ");
    self.entry(
      "推理输入",
      &[
        format!("模式: {}", mode),
        format!("标签: {}", labels),
        format!("切片数: {}", tiles),
      ],
    )
  }

  pub fn log_inference_results(
    &self,
    dirs: &[LabelDir],
    elapsed: Duration,
  ) -> Result<(), RunLogError> {
    let mut lines: Vec<String> = dirs
      .iter()
      .map(|d| format!("{}: {}", d.label, d.dir.display()))
      .collect();
    lines.push(format!("耗时: {:.2?}", elapsed));
    self.entry("推理完成", &lines)
  }

  pub fn log_vectorization_results(
    &self,
    output: &VectorOutput,
    elapsed: Duration,
  ) -> Result<(), RunLogError> {
    let result = match output {
      VectorOutput::Written(path) => format!("矢量结果: {}", path.display()),
      VectorOutput::NoDetections => "没有检测结果，未生成矢量文件".to_string(),
    };
    self.entry(
      "矢量化完成",
      &[result, format!("耗时: {:.2?}", elapsed)],
    )
  }

  pub fn log_cleanup(
    &self,
    report: &CleanupReport,
    mosaics: &[PathBuf],
  ) -> Result<(), RunLogError> {
    let lines: Vec<String> = report
      .removed
      .iter()
      .map(|p| format!("已删除: {}", p.display()))
      .chain(report.kept.iter().map(|p| format!("已保留: {}", p.display())))
      .chain(mosaics.iter().map(|p| format!("VRT: {}", p.display())))
      .collect();
    self.entry("清理中间产物", &lines)
  }

  pub fn log_finished(&self, elapsed: Duration) -> Result<(), RunLogError> {
    self.entry("运行结束", &[format!("总耗时: {:.2?}", elapsed)])
  }
}
