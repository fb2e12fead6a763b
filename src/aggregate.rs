// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/aggregate.rs - 跨切片、跨标签汇总几何记录
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
use tracing::{debug, error};

use crate::{extract::GeometryRecord, raster::Crs};

#[derive(Error, Debug)]
pub enum AggregateError {
  #[error("{source_path} 的坐标参考系 {found} 与先前切片的 {expected} 不一致")]
  CrsMismatch {
    expected: CrsLabel,
    found: CrsLabel,
    source_path: PathBuf,
  },
}

/// 便于报错显示的可选 CRS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsLabel(pub Option<Crs>);

impl std::fmt::Display for CrsLabel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      Some(crs) => write!(f, "{}", crs),
      None => f.write_str("（无）"),
    }
  }
}

/// 汇总结果，所有记录共享同一 CRS
#[derive(Debug, Clone)]
pub struct Aggregation {
  pub crs: Option<Crs>,
  pub records: Vec<GeometryRecord>,
}

#[derive(Debug, Default)]
pub struct LabelAggregator {
  crs: Option<Option<Crs>>,
  records: Vec<GeometryRecord>,
}

impl LabelAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  /// 记录一个切片的 CRS；第一个切片决定整个结果的 CRS
  pub fn observe_crs(&mut self, crs: Option<Crs>, source: &Path) -> Result<(), AggregateError> {
    match self.crs {
      None => {
        debug!("结果坐标参考系: {} (来自 {})", CrsLabel(crs), source.display());
        self.crs = Some(crs);
        Ok(())
      }
      Some(expected) if expected == crs => Ok(()),
      Some(expected) => {
        error!(
          "坐标参考系不一致: {} 为 {}，应为 {}",
          source.display(),
          CrsLabel(crs),
          CrsLabel(expected)
        );
        Err(AggregateError::CrsMismatch {
          expected: CrsLabel(expected),
          found: CrsLabel(crs),
          source_path: source.to_path_buf(),
        })
      }
    }
  }

  pub fn extend(&mut self, records: impl IntoIterator<Item = GeometryRecord>) {
    self.records.extend(records);
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// 没有任何记录时返回 None，即“无检测结果”
  pub fn finish(self) -> Option<Aggregation> {
    if self.records.is_empty() {
      return None;
    }
    Some(Aggregation {
      crs: self.crs.flatten(),
      records: self.records,
    })
  }
}
