// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/config.rs - 配置加载（secrets 文件 + 环境变量）
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
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::weights::{WeightSource, WeightsProvider};

pub const DEFAULT_CONFIG_PATH: &str = ".streamlit/secrets.toml";
pub const CONFIG_PATH_ENV: &str = "PPE_CONFIG";

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_MODEL_FILE: &str = "best.onnx";
const DEFAULT_MIN_WEIGHTS_BYTES: u64 = 1_000_000;
const DEFAULT_CONFIDENCE: f32 = 0.20;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_DETECTIONS_DIR: &str = "detections";
/// 检测模型 URL 的方案：`yolov5://<path>?conf=&iou=&size=`
pub const MODEL_URI_SCHEME: &str = "yolov5";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析配置文件 {path} 失败: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: &'static str, value: String },
  #[error("未配置模型权重来源, 请设置 MODEL_URL、GDRIVE_FILE_ID 或 MODEL_PATH（或用 MODEL_URI 直接指定模型）")]
  MissingWeightsSource,
}

#[derive(Debug, Deserialize, Default)]
struct SecretsFile {
  #[serde(rename = "MODEL_URL")]
  model_url: Option<String>,
  #[serde(rename = "GDRIVE_FILE_ID")]
  gdrive_file_id: Option<String>,
  #[serde(rename = "MODEL_PATH")]
  model_path: Option<PathBuf>,
  #[serde(rename = "MODEL_URI")]
  model_uri: Option<String>,
  #[serde(rename = "MODEL_SHA256")]
  model_sha256: Option<String>,
  #[serde(rename = "MODEL_DIR")]
  model_dir: Option<PathBuf>,
  #[serde(rename = "MODEL_FILE")]
  model_file: Option<String>,
  #[serde(rename = "MIN_WEIGHTS_BYTES")]
  min_weights_bytes: Option<u64>,
  #[serde(rename = "CONFIDENCE")]
  confidence: Option<f32>,
  #[serde(rename = "IOU")]
  iou: Option<f32>,
  #[serde(rename = "INPUT_SIZE")]
  input_size: Option<u32>,
  #[serde(rename = "DETECTIONS_DIR")]
  detections_dir: Option<PathBuf>,
  #[serde(rename = "FONT_PATH")]
  font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightsSettings {
  pub model_url: Option<Url>,
  pub gdrive_file_id: Option<String>,
  pub model_path: Option<PathBuf>,
  pub sha256: Option<String>,
  pub model_dir: PathBuf,
  pub model_file: String,
  pub min_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
  pub confidence: f32,
  pub iou: f32,
  pub input_size: u32,
}

impl DetectorSettings {
  /// 本地权重文件加上检测阈值，组成检测模型 URL
  pub fn model_url(&self, model: &Path) -> Result<Url, url::ParseError> {
    let mut url = crate::parse_url_or_path(&model.display().to_string(), MODEL_URI_SCHEME)?;
    url
      .query_pairs_mut()
      .append_pair("conf", &self.confidence.to_string())
      .append_pair("iou", &self.iou.to_string())
      .append_pair("size", &self.input_size.to_string());
    Ok(url)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
  pub weights: WeightsSettings,
  pub detector: DetectorSettings,
  /// 直接指定的检测模型，设置后不再获取权重，阈值以 URL 参数为准
  pub model_uri: Option<Url>,
  pub detections_dir: PathBuf,
  pub font_path: Option<PathBuf>,
}

impl AppConfig {
  /// 从 secrets 文件和进程环境变量加载配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    Self::load_with(path, |key| std::env::var(key).ok())
  }

  /// `lookup` 提供环境变量，优先级高于文件
  pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let (config_path, explicit) = match path {
      Some(path) => (path.to_path_buf(), true),
      None => match lookup(CONFIG_PATH_ENV) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
      },
    };
    let file = read_secrets_file(&config_path, explicit)?;
    let env = |key: &str| non_blank(lookup(key));
    let file = SecretsFile {
      model_url: non_blank(file.model_url),
      gdrive_file_id: non_blank(file.gdrive_file_id),
      model_uri: non_blank(file.model_uri),
      model_sha256: non_blank(file.model_sha256),
      model_file: non_blank(file.model_file),
      model_path: file.model_path.filter(|path| !path.as_os_str().is_empty()),
      model_dir: file.model_dir.filter(|path| !path.as_os_str().is_empty()),
      detections_dir: file.detections_dir.filter(|path| !path.as_os_str().is_empty()),
      font_path: file.font_path.filter(|path| !path.as_os_str().is_empty()),
      ..file
    };

    let model_url = match env("MODEL_URL").or(file.model_url) {
      Some(raw) => Some(
        Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidValue {
          key: "MODEL_URL",
          value: raw,
        })?,
      ),
      None => None,
    };

    let model_uri = match env("MODEL_URI").or(file.model_uri) {
      Some(raw) => match crate::parse_url_or_path(raw.trim(), MODEL_URI_SCHEME) {
        Ok(url) if url.scheme() == MODEL_URI_SCHEME => Some(url),
        _ => {
          return Err(ConfigError::InvalidValue {
            key: "MODEL_URI",
            value: raw,
          });
        }
      },
      None => None,
    };

    let sha256 = env("MODEL_SHA256").or(file.model_sha256);
    if let Some(digest) = &sha256
      && (digest.len() != 64 || hex::decode(digest).is_err())
    {
      return Err(ConfigError::InvalidValue {
        key: "MODEL_SHA256",
        value: digest.clone(),
      });
    }

    let weights = WeightsSettings {
      model_url,
      gdrive_file_id: env("GDRIVE_FILE_ID")
        .or(file.gdrive_file_id)
        .map(|id| id.trim().to_string()),
      model_path: env("MODEL_PATH").map(PathBuf::from).or(file.model_path),
      sha256: sha256.map(|digest| digest.to_lowercase()),
      model_dir: env("MODEL_DIR")
        .map(PathBuf::from)
        .or(file.model_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
      model_file: env("MODEL_FILE")
        .or(file.model_file)
        .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string()),
      min_bytes: parse_env(&env, "MIN_WEIGHTS_BYTES")?
        .or(file.min_weights_bytes)
        .unwrap_or(DEFAULT_MIN_WEIGHTS_BYTES),
    };

    let detector = DetectorSettings {
      confidence: parse_env(&env, "CONFIDENCE")?
        .or(file.confidence)
        .unwrap_or(DEFAULT_CONFIDENCE),
      iou: parse_env(&env, "IOU")?
        .or(file.iou)
        .unwrap_or(DEFAULT_IOU),
      input_size: parse_env(&env, "INPUT_SIZE")?
        .or(file.input_size)
        .unwrap_or(DEFAULT_INPUT_SIZE),
    };
    check_unit_range("CONFIDENCE", detector.confidence)?;
    check_unit_range("IOU", detector.iou)?;

    let config = AppConfig {
      weights,
      detector,
      model_uri,
      detections_dir: env("DETECTIONS_DIR")
        .map(PathBuf::from)
        .or(file.detections_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTIONS_DIR)),
      font_path: env("FONT_PATH").map(PathBuf::from).or(file.font_path),
    };
    debug!("配置: {:?}", config);
    Ok(config)
  }

  /// 按优先级排列的权重来源：直链 → Drive 文件 ID → 本地路径
  pub fn weight_sources(&self) -> Vec<WeightSource> {
    let mut sources = Vec::new();
    if let Some(url) = &self.weights.model_url {
      sources.push(WeightSource::Url(url.clone()));
    }
    if let Some(id) = &self.weights.gdrive_file_id {
      sources.push(WeightSource::DriveFileId(id.clone()));
    }
    if let Some(path) = &self.weights.model_path {
      sources.push(WeightSource::LocalPath(path.clone()));
    }
    sources
  }

  /// 与 `weight_sources` 相同，但没有任何来源时报配置错误
  pub fn require_weight_sources(&self) -> Result<Vec<WeightSource>, ConfigError> {
    let sources = self.weight_sources();
    if sources.is_empty() {
      return Err(ConfigError::MissingWeightsSource);
    }
    Ok(sources)
  }

  pub fn weights_target(&self) -> PathBuf {
    self.weights.model_dir.join(&self.weights.model_file)
  }

  /// 按配置构造权重提供者（使用 HTTP 下载）
  pub fn weights_provider(&self) -> WeightsProvider {
    WeightsProvider::new(self.weights_target(), self.weight_sources())
      .min_bytes(self.weights.min_bytes)
      .sha256(self.weights.sha256.clone())
  }
}

fn read_secrets_file(path: &Path, explicit: bool) -> Result<SecretsFile, ConfigError> {
  match std::fs::read_to_string(path) {
    Ok(content) => {
      info!("读取配置文件: {}", path.display());
      toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })
    }
    Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => {
      debug!("配置文件不存在, 仅使用环境变量: {}", path.display());
      Ok(SecretsFile::default())
    }
    Err(source) => Err(ConfigError::Io {
      path: path.to_path_buf(),
      source,
    }),
  }
}

fn non_blank(value: Option<String>) -> Option<String> {
  value.filter(|value| !value.trim().is_empty())
}

fn parse_env<T, F>(env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  F: Fn(&str) -> Option<String>,
{
  match env(key) {
    Some(raw) => raw
      .trim()
      .parse()
      .map(Some)
      .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    None => Ok(None),
  }
}

fn check_unit_range(key: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::InvalidValue {
      key,
      value: value.to_string(),
    })
  }
}
