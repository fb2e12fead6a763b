// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/tile.rs - CHW 切片定义
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

use crate::raster::{RasterData, RasterMeta};

/// 可视化切片，波段按平面（CHW）存储，附带地理参考
#[derive(Debug, Clone)]
pub struct Tile {
  path: PathBuf,
  meta: RasterMeta,
  channels: usize,
  data: Box<[f32]>,
}

impl Tile {
  pub fn new(path: PathBuf, meta: RasterMeta, channels: usize, data: Vec<f32>) -> Self {
    if data.len() != channels * meta.pixel_count() {
      panic!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        channels * meta.pixel_count(),
        data.len()
      );
    }
    Self {
      path,
      meta,
      channels,
      data: data.into_boxed_slice(),
    }
  }

  /// 由像素交错的栅格数据构建
  pub fn from_raster(path: PathBuf, raster: RasterData) -> Self {
    let channels = raster.bands;
    let plane = raster.meta.pixel_count();
    let mut data = vec![0.0f32; channels * plane];

    for (i, pixel) in raster.samples.chunks_exact(channels).enumerate() {
      for (c, value) in pixel.iter().enumerate() {
        data[c * plane + i] = *value;
      }
    }

    Self::new(path, raster.meta, channels, data)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 文件名（不含扩展名），用于命名预测结果
  pub fn stem(&self) -> String {
    self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  }

  pub fn meta(&self) -> &RasterMeta {
    &self.meta
  }

  pub fn width(&self) -> usize {
    self.meta.width as usize
  }

  pub fn height(&self) -> usize {
    self.meta.height as usize
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn plane(&self, channel: usize) -> &[f32] {
    let size = self.width() * self.height();
    &self.data[channel * size..(channel + 1) * size]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::GeoTransform;

  #[test]
  fn interleaved_samples_become_planes() {
    let meta = RasterMeta {
      width: 2,
      height: 1,
      transform: GeoTransform::north_up(0.0, 0.0, 1.0),
      crs: None,
    };
    let raster = RasterData {
      meta,
      bands: 3,
      samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
    };
    let tile = Tile::from_raster(PathBuf::from("vis/tile_0_0.tif"), raster);
    assert_eq!(tile.channels(), 3);
    assert_eq!(tile.plane(0), &[0.1, 0.4]);
    assert_eq!(tile.plane(2), &[0.3, 0.6]);
    assert_eq!(tile.stem(), "tile_0_0");
  }
}
