// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::input::Upload;
use crate::model::WithLabel;
use crate::output::Render;
use crate::service::Assessment;
use crate::{FromUrl, FromUrlWithScheme, url_path};

/// `image://<file>`：每次覆盖写同一个标注图像文件
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput { path: url_path(uri) })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl<T: WithLabel> Render<Upload, Assessment<T>> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, _frame: &Upload, result: &Assessment<T>) -> Result<Vec<PathBuf>, Self::Error> {
    self.save_image(&result.annotated)?;
    Ok(vec![self.path.clone()])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::compliance::ComplianceStatus;
  use crate::model::{DetectResult, PpeLabel};
  use image::Rgb;

  #[test]
  fn saves_annotated_image_creating_parents() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("out.png");
    let url = crate::parse_url_or_path(&target.display().to_string(), "image").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), target.as_path());

    let upload = Upload {
      name: "a.png".to_string(),
      image: RgbImage::new(4, 4),
    };
    let assessment: Assessment<PpeLabel> = Assessment {
      result: DetectResult::default(),
      labels: Vec::new(),
      status: ComplianceStatus::PartiallyCompliant,
      annotated: RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])),
    };
    let paths = output.render_result(&upload, &assessment).unwrap();
    assert_eq!(paths, vec![target.clone()]);
    let saved = image::open(&target).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(3, 3), &Rgb([1, 2, 3]));
  }
}
