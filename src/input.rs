// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/input.rs - 上传图像输入
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

use std::io::Cursor;
use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

/// 支持上传的图像扩展名
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("不支持的图像格式 '{0}', 仅支持 jpg、jpeg、png")]
  UnsupportedFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 一次上传：名称 + 解码后的 RGB 图像
#[derive(Debug, Clone)]
pub struct Upload {
  pub name: String,
  pub image: RgbImage,
}

/// 仅按扩展名筛选上传，实际格式由文件内容决定
fn check_extension(name: &str) -> Result<(), InputError> {
  let extension = Path::new(name)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.to_ascii_lowercase())
    .unwrap_or_default();

  if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
    error!("拒绝上传 {}: 不支持的扩展名 '{}'", name, extension);
    return Err(InputError::UnsupportedFormat(extension));
  }
  Ok(())
}

impl Upload {
  /// 从内存中的文件内容构造，`name` 的扩展名必须是 jpg、jpeg 或 png
  pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, InputError> {
    let name = name.into();
    check_extension(&name)?;
    let image = ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    debug!("解码上传 {}: {}x{}", name, image.width(), image.height());
    Ok(Upload { name, image })
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    check_extension(&name)?;
    let bytes = std::fs::read(path)?;
    Self::from_bytes(name, &bytes)
  }
}

/// `image:///path/to/file.jpg` 形式的图像文件输入
pub struct ImageFileInput {
  upload: Option<Upload>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(ImageFileInput {
      upload: Some(upload_from_url(url)?),
    })
  }
}

fn upload_from_url(url: &Url) -> Result<Upload, InputError> {
  if url.scheme() != ImageFileInput::SCHEME {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际 '{}'",
      ImageFileInput::SCHEME,
      url.scheme()
    );
    return Err(InputError::SchemeMismatch {
      expected: ImageFileInput::SCHEME,
      found: url.scheme().to_string(),
    });
  }
  Upload::from_path(url_path(url))
}

impl Iterator for ImageFileInput {
  type Item = Upload;

  fn next(&mut self) -> Option<Self::Item> {
    self.upload.take()
  }
}

/// 多个图像 URL，逐个读取；单个文件的错误不影响后续文件
pub struct ImageListInput {
  urls: std::vec::IntoIter<Url>,
}

impl ImageListInput {
  pub fn new(urls: Vec<Url>) -> Self {
    ImageListInput {
      urls: urls.into_iter(),
    }
  }
}

impl Iterator for ImageListInput {
  type Item = Result<Upload, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let url = self.urls.next()?;
    Some(upload_from_url(&url))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.urls.size_hint()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb};

  fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decodes_supported_upload() {
    let upload = Upload::from_bytes("site.PNG", &png_bytes()).unwrap();
    assert_eq!(upload.image.dimensions(), (4, 3));
    assert_eq!(upload.image.get_pixel(0, 0), &Rgb([10, 20, 30]));
  }

  #[test]
  fn rejects_unsupported_extension() {
    let err = Upload::from_bytes("site.gif", &png_bytes()).unwrap_err();
    assert!(matches!(err, InputError::UnsupportedFormat(ext) if ext == "gif"));
    let err = Upload::from_bytes("no_extension", &png_bytes()).unwrap_err();
    assert!(matches!(err, InputError::UnsupportedFormat(_)));
  }

  #[test]
  fn content_decides_the_decoder() {
    // PNG 内容配 .jpg 扩展名
    let upload = Upload::from_bytes("photo.jpg", &png_bytes()).unwrap();
    assert_eq!(upload.image.dimensions(), (4, 3));
    assert_eq!(upload.image.get_pixel(3, 2), &Rgb([10, 20, 30]));

    // 扩展名仍然要检查
    let err = Upload::from_bytes("photo.bmp", &png_bytes()).unwrap_err();
    assert!(matches!(err, InputError::UnsupportedFormat(ext) if ext == "bmp"));
  }

  #[test]
  fn rejects_corrupt_image() {
    let err = Upload::from_bytes("broken.jpg", b"definitely not a jpeg").unwrap_err();
    assert!(matches!(err, InputError::ImageLoadError(_)));
  }

  #[test]
  fn image_file_input_yields_one_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.png");
    std::fs::write(&path, png_bytes()).unwrap();

    let url = crate::parse_url_or_path(&path.display().to_string(), "image").unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn image_list_input_reports_each_file() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("a.png");
    std::fs::write(&good, png_bytes()).unwrap();
    let bad = dir.path().join("b.gif");
    std::fs::write(&bad, png_bytes()).unwrap();
    let missing = dir.path().join("c.jpg");

    let urls = [&good, &bad, &missing, &good]
      .iter()
      .map(|p| crate::parse_url_or_path(&p.display().to_string(), "image").unwrap())
      .collect();
    let results: Vec<_> = ImageListInput::new(urls).collect();
    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(InputError::UnsupportedFormat(_))));
    assert!(matches!(results[2], Err(InputError::IoError(_))));
    assert!(results[3].is_ok());
  }

  #[test]
  fn image_file_input_checks_scheme() {
    let url = Url::parse("folder:///tmp/x.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::SchemeMismatch { .. })
    ));
  }
}
