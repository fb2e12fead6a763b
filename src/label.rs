// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/label.rs - 考古地物标签
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

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("不支持的标签: {0}（可选: barrow, enclosure, ringfort, AO）")]
pub struct UnknownLabelError(pub String);

/// 固定的标签词表，每个标签对应一组独立训练的模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
  Barrow,
  Enclosure,
  Ringfort,
  /// 其他考古地物
  ArchaeologicalObject,
}

impl Label {
  pub const ALL: [Label; 4] = [
    Label::Barrow,
    Label::Enclosure,
    Label::Ringfort,
    Label::ArchaeologicalObject,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Label::Barrow => "barrow",
      Label::Enclosure => "enclosure",
      Label::Ringfort => "ringfort",
      Label::ArchaeologicalObject => "AO",
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Label {
  type Err = UnknownLabelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Label::ALL
      .into_iter()
      .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| UnknownLabelError(s.to_string()))
  }
}
