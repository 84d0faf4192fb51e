// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/weights.rs - 模型权重获取与校验
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
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

mod http_fetch;
pub use self::http_fetch::HttpFetcher;

const DRIVE_DOWNLOAD_ENDPOINT: &str = "https://drive.usercontent.google.com/download";
const HTML_SNIFF_BYTES: usize = 512;
/// 每个下载来源的尝试次数（首次 + 一次重试）
const DOWNLOAD_ATTEMPTS: usize = 2;

/// 权重来源描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
  Url(Url),
  DriveFileId(String),
  LocalPath(PathBuf),
}

impl WeightSource {
  /// 需要下载的来源对应的下载地址；本地路径返回 `None`
  pub fn download_url(&self) -> Result<Option<Url>, url::ParseError> {
    match self {
      WeightSource::Url(url) => Ok(Some(url.clone())),
      WeightSource::DriveFileId(id) => Url::parse(&format!(
        "{}?id={}&export=download&confirm=t",
        DRIVE_DOWNLOAD_ENDPOINT,
        urlencoding::encode(id)
      ))
      .map(Some),
      WeightSource::LocalPath(_) => Ok(None),
    }
  }
}

impl fmt::Display for WeightSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WeightSource::Url(url) => write!(f, "url {}", url),
      WeightSource::DriveFileId(id) => write!(f, "drive file {}", id),
      WeightSource::LocalPath(path) => write!(f, "local path {}", path.display()),
    }
  }
}

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] Box<ureq::Error>),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 把 `url` 的内容写入 `dest`，返回写入的字节数
pub trait Fetch: Send + Sync {
  fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, FetchError>;
}

/// 文件无效的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidWeights {
  #[error("文件不存在")]
  Missing,
  #[error("文件过小: {size} 字节 (至少 {min} 字节)")]
  TooSmall { size: u64, min: u64 },
  #[error("文件内容是 HTML 页面")]
  Html,
  #[error("SHA-256 不匹配: 期望 {expected}, 实际 {actual}")]
  DigestMismatch { expected: String, actual: String },
}

#[derive(Error, Debug)]
pub enum WeightsError {
  #[error("未配置模型权重来源, 请在 secrets 中设置 MODEL_URL、GDRIVE_FILE_ID 或 MODEL_PATH")]
  NoSource,
  #[error("模型权重获取失败: {}", .attempts.join("; "))]
  Acquisition { attempts: Vec<String> },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 已获取的权重文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
  pub path: PathBuf,
  /// 产生该文件的来源下标；复用已有缓存时为 `None`
  pub source: Option<usize>,
}

pub struct WeightsProvider {
  target: PathBuf,
  sources: Vec<WeightSource>,
  min_bytes: u64,
  sha256: Option<String>,
  fetcher: Box<dyn Fetch>,
}

impl WeightsProvider {
  pub fn new(target: impl Into<PathBuf>, sources: Vec<WeightSource>) -> Self {
    Self {
      target: target.into(),
      sources,
      min_bytes: 1_000_000,
      sha256: None,
      fetcher: Box::new(HttpFetcher::default()),
    }
  }

  pub fn min_bytes(mut self, min_bytes: u64) -> Self {
    self.min_bytes = min_bytes;
    self
  }

  pub fn sha256(mut self, digest: Option<String>) -> Self {
    self.sha256 = digest.map(|d| d.to_lowercase());
    self
  }

  pub fn fetcher(mut self, fetcher: impl Fetch + 'static) -> Self {
    self.fetcher = Box::new(fetcher);
    self
  }

  pub fn target(&self) -> &Path {
    &self.target
  }

  pub fn sources(&self) -> &[WeightSource] {
    &self.sources
  }

  /// 返回可用的本地权重路径，已有的有效文件直接复用
  pub fn ensure_local(&self) -> Result<PathBuf, WeightsError> {
    self.acquire().map(|acquired| acquired.path)
  }

  pub fn acquire(&self) -> Result<Acquired, WeightsError> {
    if self.sources.is_empty() {
      error!("未配置任何模型权重来源");
      return Err(WeightsError::NoSource);
    }

    match self.validate(&self.target) {
      Ok(()) => {
        info!("复用已有模型权重: {}", self.target.display());
        return Ok(Acquired {
          path: self.target.clone(),
          source: None,
        });
      }
      Err(InvalidWeights::Missing) => {}
      Err(reason) => {
        warn!("已有模型权重无效 ({}), 删除: {}", reason, self.target.display());
        std::fs::remove_file(&self.target)?;
      }
    }

    self.acquire_from(0)
  }

  /// 丢弃当前缓存，从 `previous` 之后的来源重新获取
  pub fn reacquire(&self, previous: Option<usize>) -> Result<Acquired, WeightsError> {
    if self.sources.is_empty() {
      return Err(WeightsError::NoSource);
    }
    if self.target.exists() {
      warn!("删除缓存的模型权重: {}", self.target.display());
      std::fs::remove_file(&self.target)?;
    }
    let start = previous.map(|idx| idx + 1).unwrap_or(0);
    self.acquire_from(start)
  }

  fn acquire_from(&self, start: usize) -> Result<Acquired, WeightsError> {
    let mut attempts = Vec::new();

    for (idx, source) in self.sources.iter().enumerate().skip(start) {
      info!("尝试获取模型权重: {}", source);
      match self.try_source(source) {
        Ok(path) => {
          return Ok(Acquired {
            path,
            source: Some(idx),
          });
        }
        Err(reason) => {
          warn!("来源 {} 不可用: {}", source, reason);
          attempts.push(format!("{}: {}", source, reason));
        }
      }
    }

    if attempts.is_empty() {
      attempts.push("没有剩余可尝试的来源".to_string());
    }
    error!("所有模型权重来源均失败");
    Err(WeightsError::Acquisition { attempts })
  }

  fn try_source(&self, source: &WeightSource) -> Result<PathBuf, String> {
    let url = match source {
      WeightSource::LocalPath(path) => {
        return self
          .validate(path)
          .map(|()| path.clone())
          .map_err(|reason| reason.to_string());
      }
      other => other
        .download_url()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "没有下载地址".to_string())?,
    };

    if let Some(parent) = self.target.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let partial = partial_path(&self.target);
    let mut last_error = String::new();
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
      info!("下载模型权重 (第 {} 次): {}", attempt, url);
      let outcome = self
        .fetcher
        .fetch(&url, &partial)
        .map_err(|e| e.to_string())
        .and_then(|size| {
          debug!("下载完成, {} 字节", size);
          self.validate(&partial).map_err(|reason| reason.to_string())
        });

      match outcome {
        Ok(()) => {
          std::fs::rename(&partial, &self.target).map_err(|e| e.to_string())?;
          info!("模型权重已就绪: {}", self.target.display());
          return Ok(self.target.clone());
        }
        Err(reason) => {
          warn!("下载的模型权重无效 ({}), 删除后重试", reason);
          if partial.exists() {
            std::fs::remove_file(&partial).map_err(|e| e.to_string())?;
          }
          last_error = reason;
        }
      }
    }

    Err(last_error)
  }

  /// 校验文件大小、内容类型和可选的 SHA-256
  pub fn validate(&self, path: &Path) -> Result<(), InvalidWeights> {
    let size = match std::fs::metadata(path) {
      Ok(meta) if meta.is_file() => meta.len(),
      _ => return Err(InvalidWeights::Missing),
    };
    if size < self.min_bytes {
      return Err(InvalidWeights::TooSmall {
        size,
        min: self.min_bytes,
      });
    }

    let mut file = File::open(path).map_err(|_| InvalidWeights::Missing)?;
    let mut head = vec![0u8; HTML_SNIFF_BYTES];
    let read = file.read(&mut head).map_err(|_| InvalidWeights::Missing)?;
    if looks_like_html(&head[..read]) {
      return Err(InvalidWeights::Html);
    }

    if let Some(expected) = &self.sha256 {
      let actual = sha256_file(path).map_err(|_| InvalidWeights::Missing)?;
      if &actual != expected {
        return Err(InvalidWeights::DigestMismatch {
          expected: expected.clone(),
          actual,
        });
      }
    }
    Ok(())
  }
}

fn partial_path(target: &Path) -> PathBuf {
  let mut name = target
    .file_name()
    .map(|n| n.to_os_string())
    .unwrap_or_default();
  name.push(".part");
  target.with_file_name(name)
}

fn looks_like_html(head: &[u8]) -> bool {
  let text = String::from_utf8_lossy(head);
  let lower = text.trim_start().to_ascii_lowercase();
  lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  std::io::copy(&mut file, &mut hasher)?;
  Ok(hex::encode(hasher.finalize()))
}
