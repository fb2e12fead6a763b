// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/bin/adaf.rs - 完整流水线：可视化、推理、矢量化
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use adaf::{
  FromUrl,
  config::{InferenceMode, ModelTable},
  label::Label,
  model::BackendWrapper,
  task::{InferenceTask, RunConfig, Task},
  visualize::VisualizerWrapper,
};

/// ADAF 考古地物自动检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// DEM 栅格（GeoTIFF 或 VRT）；使用 --vis-exist-ok 时为已有的可视化结果
  #[arg(long, value_name = "FILE")]
  pub dem: PathBuf,

  /// 检测的标签，可重复: barrow, enclosure, ringfort, AO
  #[arg(long = "label", value_name = "LABEL", required = true)]
  pub labels: Vec<Label>,

  /// 推理模式: "object detection" 或 "segmentation"
  #[arg(long, default_value = "object detection", value_name = "MODE")]
  pub mode: String,

  /// 输入已是可视化结果，跳过可视化
  #[arg(long)]
  pub vis_exist_ok: bool,

  /// 保留可视化切片
  #[arg(long)]
  pub save_vis: bool,

  /// 保留逐切片预测结果
  #[arg(long)]
  pub save_ml_output: bool,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub threshold: f64,

  /// 可视化工具，例如 command:///usr/local/bin/rvt-tiles
  #[arg(long, value_name = "VISUALIZER")]
  pub visualizer: Option<Url>,

  /// 推理后端与模型目录
  #[arg(long, default_value = "onnx:ml_models", value_name = "BACKEND")]
  pub backend: Url,

  /// JSON 模型表，缺省使用内置模型表
  #[arg(long, value_name = "FILE")]
  pub model_table: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mode: InferenceMode = args.mode.parse()?;
  info!("DEM: {}", args.dem.display());
  info!("推理模式: {}", mode);
  info!("推理后端: {}", args.backend);

  let table = match &args.model_table {
    Some(path) => ModelTable::from_json_file(path)?,
    None => ModelTable::builtin(),
  };
  let visualizer = args
    .visualizer
    .as_ref()
    .map(VisualizerWrapper::from_url)
    .transpose()?;
  let backend = BackendWrapper::from_url(&args.backend)?;

  let config = RunConfig::new(args.dem, args.labels, mode)
    .with_vis_exist_ok(args.vis_exist_ok)
    .with_save_vis(args.save_vis)
    .with_save_ml_output(args.save_ml_output)
    .with_threshold(args.threshold);

  let outcome = InferenceTask::new(config, table).run_task(visualizer, backend)?;
  info!("运行目录: {}", outcome.run_dir.display());
  println!("{}", outcome.output.to_sentinel_string());

  Ok(())
}
