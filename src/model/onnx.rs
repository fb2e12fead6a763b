// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::{path::PathBuf, sync::Mutex};

use ndarray::Array4;
use ort::{session::Session, value::Value};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{InferenceMode, ModelSpec},
  model::{DetectItem, InferenceBackend, Model, ModelError, RawPrediction},
  tile::Tile,
};

/// 模型输入通道数
const INPUT_CHANNELS: usize = 3;

fn runtime_error(e: ort::Error) -> ModelError {
  error!("ONNX Runtime 错误: {}", e);
  ModelError::Runtime(e.to_string())
}

/// 模型目录由 URL 路径给出，例如 `onnx:ml_models` 或 `onnx:///opt/adaf/models`
pub struct OnnxBackend {
  root: PathBuf,
  intra_threads: usize,
}

impl FromUrl for OnnxBackend {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(url.scheme().to_string()));
    }
    let threads = url
      .query_pairs()
      .find(|(key, _)| key == "threads")
      .and_then(|(_, value)| value.parse().ok())
      .unwrap_or(4);
    Ok(Self {
      root: PathBuf::from(url.path()),
      intra_threads: threads,
    })
  }
}

impl FromUrlWithScheme for OnnxBackend {
  const SCHEME: &'static str = "onnx";
}

impl InferenceBackend for OnnxBackend {
  type Model = OnnxModel;

  fn load(&self, mode: InferenceMode, spec: &ModelSpec) -> Result<OnnxModel, ModelError> {
    let path = if spec.weights.is_absolute() {
      spec.weights.clone()
    } else {
      self.root.join(&spec.weights)
    };
    if !path.is_file() {
      error!("模型权重不存在: {}", path.display());
      return Err(ModelError::WeightsNotFound(path));
    }

    info!("加载模型文件: {} ({:?})", path.display(), spec.architecture);
    let session = Session::builder()
      .map_err(runtime_error)?
      .with_intra_threads(self.intra_threads)
      .map_err(runtime_error)?
      .commit_from_file(&path)
      .map_err(runtime_error)?;
    debug!(
      "模型输入数量: {}, 输出数量: {}",
      session.inputs.len(),
      session.outputs.len()
    );
    info!("模型加载完成");

    Ok(OnnxModel {
      session: Mutex::new(session),
      mode,
    })
  }
}

pub struct OnnxModel {
  session: Mutex<Session>,
  mode: InferenceMode,
}

impl OnnxModel {
  /// 单波段可视化重复为三通道
  fn input_tensor(tile: &Tile) -> Result<Array4<f32>, ModelError> {
    let (h, w) = (tile.height(), tile.width());
    let mut data = Vec::with_capacity(INPUT_CHANNELS * h * w);
    for c in 0..INPUT_CHANNELS {
      data.extend_from_slice(tile.plane(c.min(tile.channels() - 1)));
    }
    Array4::from_shape_vec((1, INPUT_CHANNELS, h, w), data)
      .map_err(|e| ModelError::OutputShape(e.to_string()))
  }

  fn postprocess_boxes(
    shape: &[i64],
    boxes: &[f32],
    scores: &[f32],
  ) -> Result<RawPrediction, ModelError> {
    if shape.last() != Some(&4) || boxes.len() != scores.len() * 4 {
      return Err(ModelError::OutputShape(format!(
        "检测框形状 {:?} 与 {} 个分数不匹配",
        shape,
        scores.len()
      )));
    }
    let items = boxes
      .chunks_exact(4)
      .zip(scores)
      .map(|(bbox, score)| DetectItem {
        score: *score,
        bbox: [bbox[0], bbox[1], bbox[2], bbox[3]],
      })
      .collect();
    Ok(RawPrediction::Boxes(items))
  }

  /// 二分类输出取第 1 通道的 softmax，单通道输出取 sigmoid
  fn postprocess_probability(
    shape: &[i64],
    logits: &[f32],
    tile: &Tile,
  ) -> Result<RawPrediction, ModelError> {
    let plane = tile.width() * tile.height();
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    let channels = match dims.as_slice() {
      [1, c, h, w]
        if *c >= 1 && *h == tile.height() && *w == tile.width() && logits.len() == c * plane =>
      {
        *c
      }
      _ => {
        return Err(ModelError::OutputShape(format!(
          "分割输出形状 {:?} 与切片 {}x{} 不匹配",
          dims,
          tile.width(),
          tile.height()
        )));
      }
    };

    let probability: Vec<f32> = if channels == 1 {
      logits.iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect()
    } else {
      (0..plane)
        .map(|i| {
          let max = (0..channels)
            .map(|c| logits[c * plane + i])
            .fold(f32::NEG_INFINITY, f32::max);
          let sum: f32 = (0..channels).map(|c| (logits[c * plane + i] - max).exp()).sum();
          (logits[plane + i] - max).exp() / sum
        })
        .collect()
    };
    Ok(RawPrediction::Probability(probability.into_boxed_slice()))
  }
}

impl Model for OnnxModel {
  type Input = Tile;
  type Output = RawPrediction;
  type Error = ModelError;

  fn infer(&self, input: &Tile) -> Result<RawPrediction, ModelError> {
    let tensor = Value::from_array(Self::input_tensor(input)?).map_err(runtime_error)?;
    let mut session = self
      .session
      .lock()
      .map_err(|_| ModelError::Runtime("推理会话锁已损坏".to_string()))?;
    let outputs = session.run(ort::inputs![tensor]).map_err(runtime_error)?;

    match self.mode {
      InferenceMode::ObjectDetection => {
        // torchvision 导出顺序：boxes, labels, scores
        let score_index = if outputs.len() >= 3 { 2 } else { 1 };
        let (shape, boxes) = outputs[0]
          .try_extract_tensor::<f32>()
          .map_err(runtime_error)?;
        let (_, scores) = outputs[score_index]
          .try_extract_tensor::<f32>()
          .map_err(runtime_error)?;
        Self::postprocess_boxes(shape, boxes, scores)
      }
      InferenceMode::Segmentation => {
        let (shape, logits) = outputs[0]
          .try_extract_tensor::<f32>()
          .map_err(runtime_error)?;
        Self::postprocess_probability(shape, logits, input)
      }
    }
  }
}
