// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/input.rs - 可视化切片输入
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

use crate::{
  raster::{self, RasterError},
  tile::Tile,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("切片目录不存在: {0}")]
  MissingDirectory(PathBuf),
  #[error("切片目录中没有 GeoTIFF 文件: {0}")]
  NoTiles(PathBuf),
  #[error("路径包含非 UTF-8 字符: {0}")]
  NonUtf8Path(PathBuf),
  #[error("通配符错误: {0}")]
  Pattern(#[from] glob::PatternError),
  #[error("遍历目录错误: {0}")]
  Glob(#[from] glob::GlobError),
  #[error("切片读取错误: {0}")]
  Raster(#[from] RasterError),
}

/// 列出目录下匹配扩展名的文件，按路径排序
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, InputError> {
  let dir_str = dir
    .to_str()
    .ok_or_else(|| InputError::NonUtf8Path(dir.to_path_buf()))?;
  let pattern = format!("{}/*.{}", glob::Pattern::escape(dir_str), extension);
  let mut files = glob::glob(&pattern)?
    .collect::<Result<Vec<_>, _>>()?
    .into_iter()
    .filter(|path| path.is_file())
    .collect::<Vec<_>>();
  files.sort();
  Ok(files)
}

/// 可视化结果目录中的切片，按需逐个解码
pub struct TileDirectoryInput {
  tiles: Vec<PathBuf>,
}

impl TileDirectoryInput {
  pub fn open(dir: &Path) -> Result<Self, InputError> {
    if !dir.is_dir() {
      error!("切片目录不存在: {}", dir.display());
      return Err(InputError::MissingDirectory(dir.to_path_buf()));
    }
    let tiles = list_files(dir, "tif")?;
    if tiles.is_empty() {
      return Err(InputError::NoTiles(dir.to_path_buf()));
    }
    debug!("切片目录 {} 中共有 {} 个切片", dir.display(), tiles.len());
    Ok(Self { tiles })
  }

  pub fn len(&self) -> usize {
    self.tiles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tiles.is_empty()
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.tiles
  }

  pub fn iter(&self) -> TileIter<'_> {
    TileIter {
      paths: self.tiles.iter(),
    }
  }
}

pub struct TileIter<'a> {
  paths: std::slice::Iter<'a, PathBuf>,
}

impl Iterator for TileIter<'_> {
  type Item = Result<Tile, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.next().map(|path| {
      let raster = raster::read_raster(path)?;
      Ok(Tile::from_raster(path.clone(), raster))
    })
  }
}

impl<'a> IntoIterator for &'a TileDirectoryInput {
  type Item = Result<Tile, InputError>;
  type IntoIter = TileIter<'a>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}
