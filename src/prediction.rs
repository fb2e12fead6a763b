// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/prediction.rs - 切片预测结果读写
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  input::{self, InputError},
  raster::{Crs, RasterError},
};

/// 检测记录的字段数：x0 y0 x1 y1 label score epsg res x_min y_max
pub const DETECTION_FIELDS: usize = 10;

#[derive(Error, Debug)]
pub enum PredictionError {
  #[error("预测文件 {path} 第 {line} 行格式错误: {reason}")]
  MalformedRecord {
    path: PathBuf,
    line: usize,
    reason: String,
  },
  #[error("无法读写预测文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("预测目录错误: {0}")]
  Listing(#[from] InputError),
  #[error("预测栅格错误: {0}")]
  Raster(#[from] RasterError),
}

/// 一条目标检测结果，像素坐标相对于切片左上角
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
  pub bbox: [f64; 4],
  pub label: String,
  pub score: f64,
  pub epsg: u32,
  pub resolution: f64,
  pub x_min: f64,
  pub y_max: f64,
}

impl DetectionRecord {
  /// 解析一行记录；错误信息不含文件位置，由调用者补充
  pub fn parse_line(line: &str) -> Result<Self, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != DETECTION_FIELDS {
      return Err(format!(
        "应有 {} 个字段，实际 {} 个",
        DETECTION_FIELDS,
        fields.len()
      ));
    }

    let number = |index: usize, name: &str| -> Result<f64, String> {
      match fields[index].parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("字段 {} 不是有限数值: '{}'", name, fields[index])),
      }
    };

    let bbox = [
      number(0, "x0")?,
      number(1, "y0")?,
      number(2, "x1")?,
      number(3, "y1")?,
    ];
    let score = number(5, "score")?;
    if !(0.0..=1.0).contains(&score) {
      return Err(format!("字段 score 超出 [0, 1]: {}", score));
    }
    let epsg = parse_epsg(fields[6])?;
    let resolution = number(7, "res")?;
    let x_min = number(8, "x_min")?;
    let y_max = number(9, "y_max")?;

    Ok(Self {
      bbox,
      label: fields[4].to_string(),
      score,
      epsg,
      resolution,
      x_min,
      y_max,
    })
  }

  pub fn to_line(&self) -> String {
    format!(
      "{:.6} {:.6} {:.6} {:.6} {} {:.6} {} {:.6} {:.6} {:.6}",
      self.bbox[0],
      self.bbox[1],
      self.bbox[2],
      self.bbox[3],
      self.label,
      self.score,
      self.epsg,
      self.resolution,
      self.x_min,
      self.y_max
    )
  }

  pub fn crs(&self) -> Crs {
    Crs::from_epsg(self.epsg)
  }
}

// 部分导出工具把 EPSG 写成浮点数，例如 3794.0
fn parse_epsg(field: &str) -> Result<u32, String> {
  if let Ok(code) = field.parse::<u32>() {
    return Ok(code);
  }
  match field.parse::<f64>() {
    Ok(value) if value.fract() == 0.0 && value > 0.0 && value <= f64::from(u32::MAX) => {
      Ok(value as u32)
    }
    _ => Err(format!("字段 epsg 不是有效的 EPSG 编码: '{}'", field)),
  }
}

/// 单个切片的检测结果文件
#[derive(Debug, Clone)]
pub struct DetectionFile {
  pub path: PathBuf,
  pub records: Vec<DetectionRecord>,
}

pub fn read_detection_file(path: &Path) -> Result<DetectionFile, PredictionError> {
  let text = std::fs::read_to_string(path).map_err(|source| PredictionError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let mut records = Vec::new();
  for (index, line) in text.lines().enumerate() {
    if line.trim().is_empty() {
      continue;
    }
    let record =
      DetectionRecord::parse_line(line).map_err(|reason| PredictionError::MalformedRecord {
        path: path.to_path_buf(),
        line: index + 1,
        reason,
      })?;
    records.push(record);
  }

  Ok(DetectionFile {
    path: path.to_path_buf(),
    records,
  })
}

/// 读取某个标签目录下的全部检测结果，跳过空文件
pub fn read_detection_dir(dir: &Path) -> Result<Vec<DetectionFile>, PredictionError> {
  let mut files = Vec::new();
  for path in input::list_files(dir, "txt")? {
    let empty = std::fs::metadata(&path)
      .map(|m| m.len() == 0)
      .map_err(|source| PredictionError::Io {
        path: path.clone(),
        source,
      })?;
    if empty {
      debug!("跳过空预测文件: {}", path.display());
      continue;
    }
    files.push(read_detection_file(&path)?);
  }
  if files.is_empty() {
    warn!("目录 {} 中没有检测结果", dir.display());
  }
  Ok(files)
}

pub fn write_detection_file(
  path: &Path,
  records: &[DetectionRecord],
) -> Result<(), PredictionError> {
  let mut text = String::new();
  for record in records {
    text.push_str(&record.to_line());
    text.push('\n');
  }
  std::fs::write(path, text).map_err(|source| PredictionError::Io {
    path: path.to_path_buf(),
    source,
  })
}

/// 分割模式：目录中文件名包含标签的概率栅格，延迟到提取阶段再解码
pub fn list_segmentation_rasters(dir: &Path, label: &str) -> Result<Vec<PathBuf>, PredictionError> {
  let rasters = input::list_files(dir, "tif")?
    .into_iter()
    .filter(|path| {
      path
        .file_name()
        .map(|name| name.to_string_lossy().contains(label))
        .unwrap_or(false)
    })
    .collect::<Vec<_>>();
  if rasters.is_empty() {
    warn!("目录 {} 中没有标签 {} 的概率栅格", dir.display(), label);
  }
  Ok(rasters)
}

/// 结果中记录的来源路径：保留最后三级，避免写入机器相关的绝对路径
pub fn provenance(path: &Path) -> String {
  let parts: Vec<String> = path
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  let start = parts.len().saturating_sub(3);
  parts[start..].join("/")
}
