// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/config.rs - 运行配置与模型表
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
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::label::{Label, UnknownLabelError};

/// 切片尺寸（像素）。模型按此尺寸训练，改变它会让推理结果失效，因此不开放配置。
pub const TILE_SIZE_PX: u32 = 1024;

/// 为系统保留的 CPU 核心数
const RESERVED_CPUS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("不支持的推理模式: '{0}'，请选择 'object detection' 或 'segmentation'")]
  UnsupportedMode(String),
  #[error(transparent)]
  UnknownLabel(#[from] UnknownLabelError),
  #[error("模型表中没有 {mode} 模式下标签 {label} 的模型")]
  MissingModel { mode: InferenceMode, label: Label },
  #[error("切片尺寸 {0} 不是 2 的幂，与模型输入不兼容")]
  TileSize(u32),
  #[error("未指定任何标签")]
  NoLabels,
  #[error("未指定可视化工具，且未声明已有可视化结果")]
  MissingVisualizer,
  #[error("无法读取模型表 {path}: {source}")]
  TableIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型表格式错误: {0}")]
  TableFormat(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceMode {
  ObjectDetection,
  Segmentation,
}

impl InferenceMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      InferenceMode::ObjectDetection => "object detection",
      InferenceMode::Segmentation => "segmentation",
    }
  }

  /// 矢量结果文件名，位于预测目录的上一级
  pub fn output_file_name(&self) -> &'static str {
    match self {
      InferenceMode::ObjectDetection => "object_detection.gpkg",
      InferenceMode::Segmentation => "semantic_segmentation.gpkg",
    }
  }

  pub fn default_architecture(&self) -> Architecture {
    match self {
      InferenceMode::ObjectDetection => Architecture::FasterRcnn,
      InferenceMode::Segmentation => Architecture::HrNet,
    }
  }
}

impl fmt::Display for InferenceMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for InferenceMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "object detection" | "object-detection" | "object_detection" | "od" => {
        Ok(InferenceMode::ObjectDetection)
      }
      "segmentation" | "seg" => Ok(InferenceMode::Segmentation),
      _ => Err(ConfigError::UnsupportedMode(s.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
  FasterRcnn,
  #[serde(rename = "hrnet")]
  HrNet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
  pub architecture: Architecture,
  pub weights: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelEntry {
  Weights(PathBuf),
  Full {
    weights: PathBuf,
    architecture: Option<Architecture>,
  },
}

#[derive(Debug, Default, Deserialize)]
struct ModelTableFile {
  #[serde(default)]
  object_detection: BTreeMap<String, ModelEntry>,
  #[serde(default)]
  segmentation: BTreeMap<String, ModelEntry>,
}

/// 标签到模型的映射表，启动时按标签词表校验
#[derive(Debug, Clone, Default)]
pub struct ModelTable {
  object_detection: BTreeMap<Label, ModelSpec>,
  segmentation: BTreeMap<Label, ModelSpec>,
}

impl ModelTable {
  /// 内置模型表，权重路径相对于推理后端的模型目录
  pub fn builtin() -> Self {
    let mut table = ModelTable::default();
    for label in Label::ALL {
      table.insert(
        InferenceMode::ObjectDetection,
        label,
        ModelSpec {
          architecture: Architecture::FasterRcnn,
          weights: PathBuf::from(format!("OD_{}.onnx", label)),
        },
      );
      table.insert(
        InferenceMode::Segmentation,
        label,
        ModelSpec {
          architecture: Architecture::HrNet,
          weights: PathBuf::from(format!(
            "{}_HRNet_SLRM_512px_pretrained_train_12_val_124_with_Transformation.onnx",
            label
          )),
        },
      );
    }
    table
  }

  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let file: ModelTableFile = serde_json::from_str(json)?;
    let mut table = ModelTable::default();
    for (mode, entries) in [
      (InferenceMode::ObjectDetection, file.object_detection),
      (InferenceMode::Segmentation, file.segmentation),
    ] {
      for (name, entry) in entries {
        let label: Label = name.parse()?;
        let spec = match entry {
          ModelEntry::Weights(weights) => ModelSpec {
            architecture: mode.default_architecture(),
            weights,
          },
          ModelEntry::Full {
            weights,
            architecture,
          } => ModelSpec {
            architecture: architecture.unwrap_or_else(|| mode.default_architecture()),
            weights,
          },
        };
        debug!("模型表: {} / {} -> {}", mode, label, spec.weights.display());
        table.insert(mode, label, spec);
      }
    }
    Ok(table)
  }

  pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
    info!("读取模型表: {}", path.display());
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::TableIo {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&json)
  }

  pub fn insert(&mut self, mode: InferenceMode, label: Label, spec: ModelSpec) {
    self.entries_mut(mode).insert(label, spec);
  }

  pub fn lookup(&self, mode: InferenceMode, label: Label) -> Result<&ModelSpec, ConfigError> {
    self
      .entries(mode)
      .get(&label)
      .ok_or(ConfigError::MissingModel { mode, label })
  }

  /// 在任何耗时阶段开始前确认每个请求的标签都有模型
  pub fn validate(&self, mode: InferenceMode, labels: &[Label]) -> Result<(), ConfigError> {
    if labels.is_empty() {
      return Err(ConfigError::NoLabels);
    }
    for label in labels {
      self.lookup(mode, *label)?;
    }
    Ok(())
  }

  fn entries(&self, mode: InferenceMode) -> &BTreeMap<Label, ModelSpec> {
    match mode {
      InferenceMode::ObjectDetection => &self.object_detection,
      InferenceMode::Segmentation => &self.segmentation,
    }
  }

  fn entries_mut(&mut self, mode: InferenceMode) -> &mut BTreeMap<Label, ModelSpec> {
    match mode {
      InferenceMode::ObjectDetection => &mut self.object_detection,
      InferenceMode::Segmentation => &mut self.segmentation,
    }
  }
}

pub fn validate_tile_size(tile_size: u32) -> Result<(), ConfigError> {
  if tile_size.is_power_of_two() {
    Ok(())
  } else {
    Err(ConfigError::TileSize(tile_size))
  }
}

/// 可视化阶段的并行进程数：保留两个核心，至少为 1
pub fn workers_from_cpus(cpus: usize) -> usize {
  cpus.saturating_sub(RESERVED_CPUS).max(1)
}

pub fn worker_count() -> usize {
  workers_from_cpus(num_cpus::get())
}
