// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/lib.rs - 库主文件
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

use std::path::PathBuf;

pub mod compliance;
pub mod config;
pub mod input;
pub mod model;
pub mod output;
pub mod service;
pub mod task;
pub mod weights;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// URL 路径部分解码为本地路径
pub fn url_path(url: &url::Url) -> PathBuf {
  let raw = url.path();
  let decoded = urlencoding::decode(raw)
    .map(|path| path.into_owned())
    .unwrap_or_else(|_| raw.to_string());
  // `folder://detections` 这类写法把目录名放在 host 中
  match url.host_str() {
    Some(host) if !host.is_empty() => PathBuf::from(format!("{}{}", host, decoded)),
    _ => PathBuf::from(decoded),
  }
}

/// 命令行参数既可以是 URL，也可以是裸路径
pub fn parse_url_or_path(value: &str, scheme: &str) -> Result<url::Url, url::ParseError> {
  match url::Url::parse(value) {
    Ok(url) if url.scheme().len() > 1 => Ok(url),
    _ => {
      let path = std::path::Path::new(value);
      let absolute = if path.is_absolute() {
        path.to_path_buf()
      } else {
        std::env::current_dir()
          .map(|dir| dir.join(path))
          .unwrap_or_else(|_| path.to_path_buf())
      };
      let encoded = absolute
        .to_string_lossy()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
      url::Url::parse(&format!("{}://{}", scheme, encoded))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_path_decodes_escapes() {
    let url = url::Url::parse("image:///tmp/site%20photos/a.jpg").unwrap();
    assert_eq!(url_path(&url), PathBuf::from("/tmp/site photos/a.jpg"));
  }

  #[test]
  fn url_path_keeps_relative_host() {
    let url = url::Url::parse("folder://detections").unwrap();
    assert_eq!(url_path(&url), PathBuf::from("detections"));
    let url = url::Url::parse("folder://out/runs").unwrap();
    assert_eq!(url_path(&url), PathBuf::from("out/runs"));
  }

  #[test]
  fn bare_paths_become_urls() {
    let url = parse_url_or_path("/tmp/site photos/a.jpg", "image").unwrap();
    assert_eq!(url.scheme(), "image");
    assert_eq!(url_path(&url), PathBuf::from("/tmp/site photos/a.jpg"));

    let url = parse_url_or_path("image:///tmp/b.png", "image").unwrap();
    assert_eq!(url_path(&url), PathBuf::from("/tmp/b.png"));
  }
}
