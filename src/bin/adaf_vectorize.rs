// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/bin/adaf_vectorize.rs - 由已有预测目录生成矢量结果
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use adaf::{
  config::InferenceMode,
  vectorize::{self, LabelDir, VectorizeOptions},
};

/// 重新汇总逐切片预测结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 标签与预测目录，形如 barrow=/run/predictions_barrow，可重复
  #[arg(long = "label-dir", value_name = "LABEL=DIR", required = true)]
  pub label_dirs: Vec<LabelDir>,

  /// 推理模式: "object detection" 或 "segmentation"
  #[arg(long, default_value = "object detection", value_name = "MODE")]
  pub mode: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub threshold: f64,

  /// 在属性表中记录来源预测文件
  #[arg(long)]
  pub keep_ml_paths: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mode: InferenceMode = args.mode.parse()?;
  for dir in &args.label_dirs {
    info!("{}: {}", dir.label, dir.dir.display());
  }

  let options = VectorizeOptions::default()
    .with_threshold(args.threshold)
    .with_ml_paths(args.keep_ml_paths);
  let output = vectorize::vectorize(mode, &args.label_dirs, &options)?;
  println!("{}", output.to_sentinel_string());

  Ok(())
}
