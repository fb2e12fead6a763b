// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/artifact.rs - 运行中间产物登记与清理
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
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("无法删除中间产物 {path}: {source}")]
  Remove {
    path: PathBuf,
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
  Keep,
  Discard,
}

impl Retention {
  pub fn keep_if(keep: bool) -> Self {
    if keep { Retention::Keep } else { Retention::Discard }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
  Visualization,
  Predictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
  pub keep_visualization: bool,
  pub keep_predictions: bool,
}

impl RetentionPolicy {
  pub fn retention(&self, kind: ArtifactKind) -> Retention {
    match kind {
      ArtifactKind::Visualization => Retention::keep_if(self.keep_visualization),
      ArtifactKind::Predictions => Retention::keep_if(self.keep_predictions),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub kind: ArtifactKind,
  pub path: PathBuf,
  pub retention: Retention,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
  pub removed: Vec<PathBuf>,
  pub kept: Vec<PathBuf>,
}

/// 中间产物在创建时登记，清理时一次性按保留策略处理
#[derive(Debug)]
pub struct ArtifactRegistry {
  policy: RetentionPolicy,
  artifacts: Vec<Artifact>,
}

impl ArtifactRegistry {
  pub fn new(policy: RetentionPolicy) -> Self {
    Self {
      policy,
      artifacts: Vec::new(),
    }
  }

  pub fn register(&mut self, kind: ArtifactKind, path: impl Into<PathBuf>) {
    let path = path.into();
    let retention = self.policy.retention(kind);
    debug!("登记中间产物 {:?} {} ({:?})", kind, path.display(), retention);
    self.artifacts.push(Artifact {
      kind,
      path,
      retention,
    });
  }

  pub fn artifacts(&self) -> &[Artifact] {
    &self.artifacts
  }

  /// 将被保留的某类产物
  pub fn retained(&self, kind: ArtifactKind) -> impl Iterator<Item = &Path> {
    self
      .artifacts
      .iter()
      .filter(move |a| a.kind == kind && a.retention == Retention::Keep)
      .map(|a| a.path.as_path())
  }

  /// 删除所有未保留的产物；已不存在的路径跳过
  pub fn cleanup(self) -> Result<CleanupReport, ArtifactError> {
    let mut report = CleanupReport::default();
    for artifact in self.artifacts {
      if artifact.retention == Retention::Keep {
        report.kept.push(artifact.path);
        continue;
      }
      let result = if artifact.path.is_dir() {
        std::fs::remove_dir_all(&artifact.path)
      } else if artifact.path.exists() {
        std::fs::remove_file(&artifact.path)
      } else {
        debug!("中间产物已不存在: {}", artifact.path.display());
        continue;
      };
      result.map_err(|source| ArtifactError::Remove {
        path: artifact.path.clone(),
        source,
      })?;
      info!("删除中间产物: {}", artifact.path.display());
      report.removed.push(artifact.path);
    }
    Ok(report)
  }
}
