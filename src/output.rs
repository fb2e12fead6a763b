// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{raster::Crs, resolve::Feature};

pub mod gpkg;
pub mod vrt;

pub use self::gpkg::{GpkgError, GpkgWriter};
pub use self::vrt::{VrtError, build_vrt};

/// 矢量化的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorOutput {
  Written(PathBuf),
  /// 没有任何检测结果，未生成文件
  NoDetections,
}

impl VectorOutput {
  pub fn path(&self) -> Option<&Path> {
    match self {
      VectorOutput::Written(path) => Some(path),
      VectorOutput::NoDetections => None,
    }
  }

  /// 命令行输出：文件路径，或无结果时为空字符串
  pub fn to_sentinel_string(&self) -> String {
    self
      .path()
      .map(|p| p.display().to_string())
      .unwrap_or_default()
  }
}

pub trait VectorWriter {
  type Error;
  fn write_features(
    &self,
    crs: Option<Crs>,
    features: &[Feature],
  ) -> Result<VectorOutput, Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentinel_is_empty_without_detections() {
    assert_eq!(VectorOutput::NoDetections.to_sentinel_string(), "");
    assert_eq!(
      VectorOutput::Written(PathBuf::from("/run/object_detection.gpkg")).to_sentinel_string(),
      "/run/object_detection.gpkg"
    );
  }
}
