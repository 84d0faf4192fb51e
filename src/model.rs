// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/model.rs - 模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 PPE Compliance Contributors

use std::collections::BTreeSet;

use serde::Serialize;

pub mod postprocess;

#[cfg(feature = "model_yolov5")]
mod yolov5;
#[cfg(feature = "model_yolov5")]
pub use self::yolov5::{Yolov5, Yolov5Builder, Yolov5Error};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;

  fn polarity(&self) -> Polarity {
    Polarity::Neutral
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对原图归一化
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl<T: WithLabel> DetectResult<T> {
  /// 去重并排序后的标签名
  pub fn labels(&self) -> Vec<String> {
    self
      .items
      .iter()
      .map(|item| item.kind.to_label_str())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }
}

/// 工地安全数据集的十个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PpeLabel {
  Hardhat,
  Mask,
  NoHardhat,
  NoMask,
  NoSafetyVest,
  Person,
  SafetyCone,
  SafetyVest,
  Machinery,
  Vehicle,
  Unknown(u32),
}

pub const PPE_CLASS_NUM: usize = 10;

const PPE_LABELS: [PpeLabel; PPE_CLASS_NUM] = [
  PpeLabel::Hardhat,
  PpeLabel::Mask,
  PpeLabel::NoHardhat,
  PpeLabel::NoMask,
  PpeLabel::NoSafetyVest,
  PpeLabel::Person,
  PpeLabel::SafetyCone,
  PpeLabel::SafetyVest,
  PpeLabel::Machinery,
  PpeLabel::Vehicle,
];

/// 标签的语义极性，用于绘制配色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
  Worn,
  Missing,
  Neutral,
}

impl WithLabel for PpeLabel {
  fn to_label_str(&self) -> String {
    match self {
      PpeLabel::Hardhat => "Hardhat".to_string(),
      PpeLabel::Mask => "Mask".to_string(),
      PpeLabel::NoHardhat => "NO-Hardhat".to_string(),
      PpeLabel::NoMask => "NO-Mask".to_string(),
      PpeLabel::NoSafetyVest => "NO-Safety Vest".to_string(),
      PpeLabel::Person => "Person".to_string(),
      PpeLabel::SafetyCone => "Safety Cone".to_string(),
      PpeLabel::SafetyVest => "Safety Vest".to_string(),
      PpeLabel::Machinery => "machinery".to_string(),
      PpeLabel::Vehicle => "vehicle".to_string(),
      PpeLabel::Unknown(id) => format!("unknown-{}", id),
    }
  }

  fn to_label_id(&self) -> u32 {
    match self {
      PpeLabel::Unknown(id) => *id,
      known => PPE_LABELS
        .iter()
        .position(|label| label == known)
        .map(|idx| idx as u32)
        .unwrap_or(u32::MAX),
    }
  }

  fn from_label_id(id: u32) -> Self {
    PPE_LABELS
      .get(id as usize)
      .copied()
      .unwrap_or(PpeLabel::Unknown(id))
  }

  fn polarity(&self) -> Polarity {
    match self {
      PpeLabel::Hardhat | PpeLabel::Mask | PpeLabel::SafetyVest => Polarity::Worn,
      PpeLabel::NoHardhat | PpeLabel::NoMask | PpeLabel::NoSafetyVest => Polarity::Missing,
      _ => Polarity::Neutral,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::compliance::{ComplianceStatus, classify};

  fn item(id: u32, score: f32) -> DetectItem<PpeLabel> {
    DetectItem {
      kind: PpeLabel::from_label_id(id),
      score,
      bbox: [0.1, 0.1, 0.2, 0.2],
    }
  }

  #[test]
  fn label_ids_follow_dataset_order() {
    assert_eq!(PpeLabel::from_label_id(0), PpeLabel::Hardhat);
    assert_eq!(PpeLabel::from_label_id(4), PpeLabel::NoSafetyVest);
    assert_eq!(PpeLabel::from_label_id(7), PpeLabel::SafetyVest);
    assert_eq!(PpeLabel::from_label_id(42), PpeLabel::Unknown(42));
    for id in 0..PPE_CLASS_NUM as u32 {
      assert_eq!(PpeLabel::from_label_id(id).to_label_id(), id);
    }
  }

  #[test]
  fn labels_are_sorted_and_deduplicated() {
    let result = DetectResult::from(vec![item(7, 0.9), item(0, 0.8), item(7, 0.5), item(5, 0.4)]);
    assert_eq!(result.labels(), vec!["Hardhat", "Person", "Safety Vest"]);
  }

  #[test]
  fn label_strings_feed_the_classifier() {
    let result = DetectResult::from(vec![item(2, 0.9), item(3, 0.9), item(4, 0.9)]);
    assert_eq!(classify(result.labels()), ComplianceStatus::NonCompliant);
  }

  #[test]
  fn polarity_groups() {
    assert_eq!(PpeLabel::Mask.polarity(), Polarity::Worn);
    assert_eq!(PpeLabel::NoMask.polarity(), Polarity::Missing);
    assert_eq!(PpeLabel::Vehicle.polarity(), Polarity::Neutral);
  }
}
