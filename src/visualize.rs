// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/visualize.rs - DEM 可视化切片
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
  path::{Path, PathBuf},
  process::Command,
};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{self, InputError},
};

#[derive(Error, Debug)]
pub enum VisualizeError {
  #[error("不支持的可视化方案: {0}")]
  SchemeMismatch(String),
  #[error("可视化工具路径为空")]
  MissingProgram,
  #[error("可视化 I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("可视化工具 {program} 执行失败: {status}")]
  CommandFailed { program: PathBuf, status: String },
  #[error("可视化结果目录错误: {0}")]
  Output(#[from] InputError),
}

/// 一次可视化请求
#[derive(Debug, Clone)]
pub struct VisualizationRequest<'a> {
  pub dem: &'a Path,
  pub output_dir: &'a Path,
  pub tile_size: u32,
  pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizationOutput {
  /// 切片所在目录
  pub directory: PathBuf,
  /// 切片的虚拟镶嵌（如果有）
  pub mosaic: Option<PathBuf>,
}

pub trait Visualizer {
  fn visualize(&self, request: &VisualizationRequest) -> Result<VisualizationOutput, VisualizeError>;
}

fn create_dir(dir: &Path) -> Result<(), VisualizeError> {
  std::fs::create_dir_all(dir).map_err(|source| VisualizeError::Io {
    path: dir.to_path_buf(),
    source,
  })
}

/// 输入已是可视化结果：原样复制到运行目录
#[derive(Debug, Default, Clone)]
pub struct PrecomputedVisualization;

impl FromUrl for PrecomputedVisualization {
  type Error = VisualizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(VisualizeError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self)
  }
}

impl FromUrlWithScheme for PrecomputedVisualization {
  const SCHEME: &'static str = "copy";
}

impl Visualizer for PrecomputedVisualization {
  fn visualize(&self, request: &VisualizationRequest) -> Result<VisualizationOutput, VisualizeError> {
    create_dir(request.output_dir)?;
    let name = request
      .dem
      .file_name()
      .ok_or_else(|| VisualizeError::Io {
        path: request.dem.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "不是文件"),
      })?;
    let target = request.output_dir.join(name);
    std::fs::copy(request.dem, &target).map_err(|source| VisualizeError::Io {
      path: request.dem.to_path_buf(),
      source,
    })?;
    info!("使用已有可视化结果: {}", target.display());
    Ok(VisualizationOutput {
      directory: request.output_dir.to_path_buf(),
      mosaic: Some(target),
    })
  }
}

/// 外部可视化工具，例如 `command:///usr/local/bin/rvt-tiles?arg=--slrm`
///
/// 调用形式：`<program> [arg...] --dem <dem> --tile-size <n> --processes <n> --output <dir>`，
/// 工具需在输出目录写出 GeoTIFF 切片，可选写出一个 VRT 镶嵌。
#[derive(Debug, Clone)]
pub struct CommandVisualizer {
  program: PathBuf,
  args: Vec<String>,
}

impl CommandVisualizer {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  fn command(&self, request: &VisualizationRequest) -> Command {
    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .arg("--dem")
      .arg(request.dem)
      .arg("--tile-size")
      .arg(request.tile_size.to_string())
      .arg("--processes")
      .arg(request.workers.to_string())
      .arg("--output")
      .arg(request.output_dir);
    command
  }
}

impl FromUrl for CommandVisualizer {
  type Error = VisualizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(VisualizeError::SchemeMismatch(url.scheme().to_string()));
    }
    if url.path().is_empty() {
      return Err(VisualizeError::MissingProgram);
    }
    let visualizer = url
      .query_pairs()
      .filter(|(key, _)| key == "arg")
      .fold(Self::new(url.path()), |v, (_, value)| v.with_arg(value));
    Ok(visualizer)
  }
}

impl FromUrlWithScheme for CommandVisualizer {
  const SCHEME: &'static str = "command";
}

impl Visualizer for CommandVisualizer {
  fn visualize(&self, request: &VisualizationRequest) -> Result<VisualizationOutput, VisualizeError> {
    create_dir(request.output_dir)?;
    let mut command = self.command(request);
    debug!("执行可视化工具: {:?}", command);
    let status = command.status().map_err(|source| VisualizeError::Io {
      path: self.program.clone(),
      source,
    })?;
    if !status.success() {
      error!("可视化工具退出状态: {}", status);
      return Err(VisualizeError::CommandFailed {
        program: self.program.clone(),
        status: status.to_string(),
      });
    }
    let mosaic = input::list_files(request.output_dir, "vrt")?.into_iter().next();
    info!("可视化完成: {}", request.output_dir.display());
    Ok(VisualizationOutput {
      directory: request.output_dir.to_path_buf(),
      mosaic,
    })
  }
}

pub enum VisualizerWrapper {
  Precomputed(PrecomputedVisualization),
  Command(CommandVisualizer),
}

impl FromUrl for VisualizerWrapper {
  type Error = VisualizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      PrecomputedVisualization::SCHEME => Ok(VisualizerWrapper::Precomputed(
        PrecomputedVisualization::from_url(url)?,
      )),
      CommandVisualizer::SCHEME => Ok(VisualizerWrapper::Command(CommandVisualizer::from_url(url)?)),
      scheme => Err(VisualizeError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Visualizer for VisualizerWrapper {
  fn visualize(&self, request: &VisualizationRequest) -> Result<VisualizationOutput, VisualizeError> {
    match self {
      VisualizerWrapper::Precomputed(v) => v.visualize(request),
      VisualizerWrapper::Command(v) => v.visualize(request),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_url_carries_program_and_args() {
    let url = Url::parse("command:///opt/rvt/tiles?arg=--slrm&arg=--normalize").unwrap();
    let visualizer = CommandVisualizer::from_url(&url).unwrap();
    assert_eq!(visualizer.program, PathBuf::from("/opt/rvt/tiles"));
    assert_eq!(visualizer.args, ["--slrm", "--normalize"]);

    let request = VisualizationRequest {
      dem: Path::new("/data/dem.tif"),
      output_dir: Path::new("/data/run/visualization"),
      tile_size: 1024,
      workers: 6,
    };
    let command = visualizer.command(&request);
    let args: Vec<_> = command
      .get_args()
      .map(|a| a.to_string_lossy().into_owned())
      .collect();
    assert_eq!(
      args,
      [
        "--slrm",
        "--normalize",
        "--dem",
        "/data/dem.tif",
        "--tile-size",
        "1024",
        "--processes",
        "6",
        "--output",
        "/data/run/visualization"
      ]
    );
  }

  #[test]
  fn wrapper_dispatches_on_scheme() {
    assert!(matches!(
      VisualizerWrapper::from_url(&Url::parse("copy:").unwrap()),
      Ok(VisualizerWrapper::Precomputed(_))
    ));
    assert!(matches!(
      VisualizerWrapper::from_url(&Url::parse("rvt:///x").unwrap()),
      Err(VisualizeError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn precomputed_visualization_is_copied() {
    let dir = tempfile::tempdir().unwrap();
    let dem = dir.path().join("dem.tif");
    std::fs::write(&dem, b"raster").unwrap();
    let out = dir.path().join("run").join("visualization");
    let result = PrecomputedVisualization
      .visualize(&VisualizationRequest {
        dem: &dem,
        output_dir: &out,
        tile_size: 1024,
        workers: 1,
      })
      .unwrap();
    assert_eq!(result.directory, out);
    assert_eq!(std::fs::read(out.join("dem.tif")).unwrap(), b"raster");
  }

  #[test]
  fn failing_command_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let visualizer = CommandVisualizer::new("/nonexistent/adaf-visualizer");
    let result = visualizer.visualize(&VisualizationRequest {
      dem: Path::new("dem.tif"),
      output_dir: &dir.path().join("vis"),
      tile_size: 1024,
      workers: 1,
    });
    assert!(matches!(result, Err(VisualizeError::Io { .. })));
  }
}
