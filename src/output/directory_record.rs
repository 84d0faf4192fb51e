// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::compliance::{ComplianceStatus, Severity};
use crate::input::Upload;
use crate::model::WithLabel;
use crate::output::{Render, draw::Record};
use crate::service::Assessment;
use crate::{FromUrl, FromUrlWithScheme, url_path};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 保存的图像是标注图还是原图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
  Annotated,
  Original,
}

#[derive(Debug, Serialize)]
pub struct DetectionSummary {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// `.json` 摘要文件的内容
#[derive(Debug, Serialize)]
pub struct RecordSummary {
  pub source: String,
  pub labels: Vec<String>,
  pub status: ComplianceStatus,
  pub status_label: &'static str,
  pub severity: Severity,
  pub detections: Vec<DetectionSummary>,
}

impl RecordSummary {
  pub fn new<T: WithLabel>(source: &str, assessment: &Assessment<T>) -> Self {
    RecordSummary {
      source: source.to_string(),
      labels: assessment.labels.clone(),
      status: assessment.status,
      status_label: assessment.status.label(),
      severity: assessment.status.severity(),
      detections: assessment
        .result
        .items
        .iter()
        .map(|item| DetectionSummary {
          label: item.kind.to_label_str(),
          score: item.score,
          bbox: item.bbox,
        })
        .collect(),
    }
  }
}

/// `folder://<dir>?record=name|id`
///
/// 每张图像写入 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.{png,txt,json}`。
/// 默认保存标注图，带 `record` 参数时保存原图，文本记录中的标签按名称或编号书写。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  image_kind: ImageKind,
  record: Record,
  frame_counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let record_mode = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());

    let (image_kind, label_with_name) = match record_mode.as_deref() {
      None => (ImageKind::Annotated, true),
      Some("id") => (ImageKind::Original, false),
      Some(_) => (ImageKind::Original, true),
    };

    Ok(DirectoryRecordOutput::new(url_path(uri))
      .with_image_kind(image_kind)
      .with_label_names(label_with_name))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      image_kind: ImageKind::Annotated,
      record: Record {
        label_with_name: true,
      },
      frame_counter: AtomicU16::new(0),
    }
  }

  fn with_image_kind(mut self, image_kind: ImageKind) -> Self {
    self.image_kind = image_kind;
    self
  }

  fn with_label_names(mut self, label_with_name: bool) -> Self {
    self.record.label_with_name = label_with_name;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 不带扩展名的文件路径，按日期分目录。
  ///
  /// 先以 `create_new` 占住 `.png`，同一秒内的其他进程或实例会跳到下一个编号。
  fn frame_stem(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let time = now.format("%H-%M-%S").to_string();
    for _ in 0..=u16::MAX {
      let stem = directory.join(format!("{}-{:04X}", time, self.frame_id()));
      match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(stem.with_extension("png"))
      {
        Ok(_) => return Ok(stem),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          debug!("{} 已存在, 换下一个编号", stem.display());
        }
        Err(e) => return Err(e.into()),
      }
    }
    Err(DirectoryRecordOutputError::IoError(std::io::Error::new(
      ErrorKind::AlreadyExists,
      format!("{} 下同一秒的记录编号已用完", directory.display()),
    )))
  }
}

impl<T: WithLabel> Render<Upload, Assessment<T>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Upload, result: &Assessment<T>) -> Result<Vec<PathBuf>, Self::Error> {
    let stem = self.frame_stem(Local::now())?;
    let image_path = stem.with_extension("png");
    let record_path = stem.with_extension("txt");
    let summary_path = stem.with_extension("json");

    match self.image_kind {
      ImageKind::Annotated => result.annotated.save(&image_path)?,
      ImageKind::Original => frame.image.save(&image_path)?,
    }
    self.record.record(&result.result, &record_path)?;

    let summary = RecordSummary::new(&frame.name, result);
    let mut writer = BufWriter::new(File::create(&summary_path)?);
    serde_json::to_writer_pretty(&mut writer, &summary)?;
    writer.flush()?;

    debug!("{} 条检测记录写入 {}", result.result.len(), record_path.display());
    info!("检测结果已保存: {}", image_path.display());
    Ok(vec![image_path, record_path, summary_path])
  }
}
