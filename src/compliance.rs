// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/compliance.rs - 合规判定规则
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

use std::fmt;

use serde::Serialize;

pub const HARDHAT: &str = "Hardhat";
pub const MASK: &str = "Mask";
pub const SAFETY_VEST: &str = "Safety Vest";
pub const NO_HARDHAT: &str = "NO-Hardhat";
pub const NO_MASK: &str = "NO-Mask";
pub const NO_SAFETY_VEST: &str = "NO-Safety Vest";

/// 合规状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComplianceStatus {
  FullyCompliant,
  PartiallyCompliant,
  NonCompliant,
}

/// 展示用的严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
  Success,
  Warning,
  Error,
}

impl ComplianceStatus {
  pub fn label(&self) -> &'static str {
    match self {
      ComplianceStatus::FullyCompliant => "🟢 Fully Compliant",
      ComplianceStatus::PartiallyCompliant => "🟡 Partially Compliant",
      ComplianceStatus::NonCompliant => "🔴 Non-Compliant",
    }
  }

  pub fn severity(&self) -> Severity {
    match self {
      ComplianceStatus::FullyCompliant => Severity::Success,
      ComplianceStatus::PartiallyCompliant => Severity::Warning,
      ComplianceStatus::NonCompliant => Severity::Error,
    }
  }
}

impl fmt::Display for ComplianceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// 六个 PPE 标签的出现标记，只关心是否出现，不关心次数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LabelPresence {
  pub hardhat: bool,
  pub mask: bool,
  pub safety_vest: bool,
  pub no_hardhat: bool,
  pub no_mask: bool,
  pub no_safety_vest: bool,
}

impl LabelPresence {
  pub fn from_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut presence = LabelPresence::default();
    for label in labels {
      match label.as_ref() {
        HARDHAT => presence.hardhat = true,
        MASK => presence.mask = true,
        SAFETY_VEST => presence.safety_vest = true,
        NO_HARDHAT => presence.no_hardhat = true,
        NO_MASK => presence.no_mask = true,
        NO_SAFETY_VEST => presence.no_safety_vest = true,
        _ => {}
      }
    }
    presence
  }

  pub fn all_present(&self) -> bool {
    self.hardhat && self.mask && self.safety_vest
  }

  pub fn any_absent(&self) -> bool {
    self.no_hardhat || self.no_mask || self.no_safety_vest
  }

  pub fn all_absent(&self) -> bool {
    self.no_hardhat && self.no_mask && self.no_safety_vest
  }

  pub fn status(&self) -> ComplianceStatus {
    if self.all_present() && !self.any_absent() {
      ComplianceStatus::FullyCompliant
    } else if self.all_absent() {
      ComplianceStatus::NonCompliant
    } else {
      ComplianceStatus::PartiallyCompliant
    }
  }
}

/// 根据检测到的标签集合判定合规状态
///
/// 空集合落入 `PartiallyCompliant`。
pub fn classify<I, S>(labels: I) -> ComplianceStatus
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  LabelPresence::from_labels(labels).status()
}
