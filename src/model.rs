// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/model.rs - 模型与推理后端
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

use thiserror::Error;
use url::Url;

#[cfg(feature = "model_onnx")]
use crate::FromUrlWithScheme;
use crate::{
  FromUrl,
  config::{InferenceMode, ModelSpec},
  tile::Tile,
};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxBackend, OnnxModel};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，切片像素坐标
}

/// 单个切片的原始模型输出
#[derive(Debug, Clone, PartialEq)]
pub enum RawPrediction {
  Boxes(Box<[DetectItem]>),
  /// 与切片同尺寸的前景概率，行优先
  Probability(Box<[f32]>),
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型权重不存在: {0}")]
  WeightsNotFound(PathBuf),
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("模型输出形状错误: {0}")]
  OutputShape(String),
  #[error("不支持的推理后端: {0}")]
  SchemeMismatch(String),
  #[error("推理后端 {scheme} 未编译，请启用 feature `{feature}` 重新构建")]
  FeatureDisabled {
    scheme: String,
    feature: &'static str,
  },
}

/// 已知后端及其 Cargo feature
const KNOWN_BACKENDS: &[(&str, &str)] = &[("onnx", "model_onnx")];

/// 按模型表条目加载模型。加载的模型在下一个标签开始前释放。
pub trait InferenceBackend {
  type Model: Model<Input = Tile, Output = RawPrediction, Error = ModelError>;

  fn load(&self, mode: InferenceMode, spec: &ModelSpec) -> Result<Self::Model, ModelError>;
}

pub enum BackendWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxBackend),
}

pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for BackendWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "model_onnx")]
      OnnxBackend::SCHEME => Ok(BackendWrapper::Onnx(OnnxBackend::from_url(url)?)),
      scheme => match KNOWN_BACKENDS.iter().find(|(known, _)| *known == scheme) {
        Some((_, feature)) => Err(ModelError::FeatureDisabled {
          scheme: scheme.to_string(),
          feature: *feature,
        }),
        None => Err(ModelError::SchemeMismatch(scheme.to_string())),
      },
    }
  }
}

impl InferenceBackend for BackendWrapper {
  type Model = ModelWrapper;

  #[allow(unused_variables)]
  fn load(&self, mode: InferenceMode, spec: &ModelSpec) -> Result<Self::Model, ModelError> {
    match *self {
      #[cfg(feature = "model_onnx")]
      BackendWrapper::Onnx(ref backend) => backend.load(mode, spec).map(ModelWrapper::Onnx),
    }
  }
}

impl Model for ModelWrapper {
  type Input = Tile;
  type Output = RawPrediction;
  type Error = ModelError;

  #[allow(unused_variables)]
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match *self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(ref model) => model.infer(input),
    }
  }
}
