// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/service.rs - 合规检测服务
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

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::compliance::{ComplianceStatus, classify};
use crate::config::ConfigError;
use crate::input::{InputError, Upload};
use crate::model::{DetectResult, Model, PpeLabel};
use crate::output::draw::Draw;
use crate::output::{OutputError, OutputWrapper, Render};
use crate::weights::{WeightsError, WeightsProvider};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("{0}")]
  Weights(#[from] WeightsError),
  #[error("模型加载失败 ({}): {source}", .path.display())]
  ModelLoad {
    path: PathBuf,
    #[source]
    source: BoxError,
  },
  #[error("模型不可用, 初始化已失败: {0}")]
  ModelUnavailable(#[source] Arc<ServiceError>),
  #[error("推理失败: {0}")]
  Inference(#[source] BoxError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

impl ServiceError {
  /// 致命错误会终止整个进程的处理；其余错误只影响当前图像
  pub fn is_fatal(&self) -> bool {
    match self {
      ServiceError::Config(_)
      | ServiceError::Weights(_)
      | ServiceError::ModelLoad { .. }
      | ServiceError::ModelUnavailable(_) => true,
      ServiceError::Inference(_) | ServiceError::Input(_) | ServiceError::Output(_) => false,
    }
  }
}

type Loader<M> = Box<dyn Fn() -> Result<M, ServiceError> + Send + Sync>;

/// 首次使用时加载模型，之后只读共享。
///
/// 并发的首次调用只会执行一次加载；加载失败的结果同样被缓存，
/// 后续调用直接得到 `ModelUnavailable`，不会重试。
pub struct LazyModel<M> {
  loader: Loader<M>,
  cell: OnceLock<Result<M, Arc<ServiceError>>>,
}

impl<M> LazyModel<M> {
  pub fn new<F>(loader: F) -> Self
  where
    F: Fn() -> Result<M, ServiceError> + Send + Sync + 'static,
  {
    LazyModel {
      loader: Box::new(loader),
      cell: OnceLock::new(),
    }
  }

  /// 已经加载好的模型
  pub fn ready(model: M) -> Self {
    let cell = OnceLock::new();
    let _ = cell.set(Ok(model));
    LazyModel {
      loader: Box::new(|| unreachable!("模型已加载")),
      cell,
    }
  }

  pub fn get(&self) -> Result<&M, ServiceError> {
    let loaded = self.cell.get_or_init(|| {
      info!("首次使用, 初始化模型...");
      let now = Instant::now();
      let loaded = (self.loader)();
      match &loaded {
        Ok(_) => info!("模型初始化完成, 耗时: {:.2?}", now.elapsed()),
        Err(e) => error!("模型初始化失败: {}", e),
      }
      loaded.map_err(Arc::new)
    });

    match loaded {
      Ok(model) => Ok(model),
      Err(e) => Err(ServiceError::ModelUnavailable(Arc::clone(e))),
    }
  }

  pub fn is_initialized(&self) -> bool {
    self.cell.get().is_some()
  }
}

/// 获取权重并构建模型；构建失败时换一个来源重新获取，再试一次
pub fn load_with_fallback<M, E, F>(provider: &WeightsProvider, build: F) -> Result<M, ServiceError>
where
  F: Fn(&Path) -> Result<M, E>,
  E: StdError + Send + Sync + 'static,
{
  let acquired = provider.acquire()?;
  let first = match build(&acquired.path) {
    Ok(model) => return Ok(model),
    Err(e) => e,
  };
  warn!(
    "模型加载失败 ({}): {}, 尝试重新获取权重",
    acquired.path.display(),
    first
  );

  let retry = match provider.reacquire(acquired.source) {
    Ok(retry) => retry,
    Err(e) => {
      error!("重新获取模型权重失败: {}", e);
      return Err(ServiceError::ModelLoad {
        path: acquired.path,
        source: Box::new(first),
      });
    }
  };

  build(&retry.path).map_err(|e| ServiceError::ModelLoad {
    path: retry.path,
    source: Box::new(e),
  })
}

/// 单张图像的判定结果，交给输出端渲染
#[derive(Debug, Clone)]
pub struct Assessment<T> {
  pub result: DetectResult<T>,
  /// 去重并排序后的标签
  pub labels: Vec<String>,
  pub status: ComplianceStatus,
  pub annotated: RgbImage,
}

#[derive(Debug, Clone)]
pub struct ComplianceReport {
  pub source: String,
  pub image: RgbImage,
  pub assessment: Assessment<PpeLabel>,
  pub saved: Vec<PathBuf>,
}

impl ComplianceReport {
  pub fn labels(&self) -> &[String] {
    &self.assessment.labels
  }

  pub fn status(&self) -> ComplianceStatus {
    self.assessment.status
  }

  pub fn detected_objects_line(&self) -> String {
    if self.assessment.labels.is_empty() {
      "Detected Objects: None".to_string()
    } else {
      format!("Detected Objects: {}", self.assessment.labels.join(", "))
    }
  }

  pub fn status_line(&self) -> String {
    format!("Compliance Status: {}", self.assessment.status.label())
  }

  pub fn summary(&self) -> String {
    format!("{}\n{}", self.detected_objects_line(), self.status_line())
  }
}

pub struct ComplianceService<M> {
  model: LazyModel<M>,
  draw: Draw,
  output: OutputWrapper,
}

impl<M, E> ComplianceService<M>
where
  M: Model<Input = RgbImage, Output = DetectResult<PpeLabel>, Error = E>,
  E: StdError + Send + Sync + 'static,
{
  pub fn new(model: LazyModel<M>, draw: Draw, output: OutputWrapper) -> Self {
    ComplianceService { model, draw, output }
  }

  /// 提前加载模型，让配置错误在处理第一张图像之前暴露
  pub fn warm_up(&self) -> Result<(), ServiceError> {
    self.model.get().map(|_| ())
  }

  pub fn process_bytes(&self, name: &str, bytes: &[u8]) -> Result<ComplianceReport, ServiceError> {
    let upload = Upload::from_bytes(name, bytes)?;
    self.process(upload)
  }

  pub fn process(&self, upload: Upload) -> Result<ComplianceReport, ServiceError> {
    let model = self.model.get()?;

    let now = Instant::now();
    let result = model
      .infer(&upload.image)
      .map_err(|e| ServiceError::Inference(Box::new(e)))?;
    info!("{}: 推理完成, {} 个目标, 耗时: {:.2?}", upload.name, result.len(), now.elapsed());
    for item in result.items.iter() {
      debug!("  {:?} {:.3} {:?}", item.kind, item.score, item.bbox);
    }

    let labels = result.labels();
    let status = classify(&labels);
    let annotated = self.draw.annotate(&upload.image, &result);
    let assessment = Assessment {
      result,
      labels,
      status,
      annotated,
    };

    let saved = self.output.render_result(&upload, &assessment)?;
    info!("{}: {}", upload.name, status.label());

    Ok(ComplianceReport {
      source: upload.name,
      image: upload.image,
      assessment,
      saved,
    })
  }
}

#[cfg(feature = "model_yolov5")]
mod yolov5_service {
  use super::*;
  use crate::FromUrl;
  use crate::config::AppConfig;
  use crate::model::{Yolov5, Yolov5Builder, Yolov5Error};

  impl ComplianceService<Yolov5<PpeLabel>> {
    /// 按配置组装服务；没有任何权重来源时直接报错，不等到第一张图像。
    ///
    /// 配置了 `MODEL_URI` 时直接加载该模型，跳过权重获取。
    pub fn from_config(config: &AppConfig, output: OutputWrapper) -> Result<Self, ServiceError> {
      let draw = Draw::with_optional_font(config.font_path.as_deref());

      if let Some(uri) = &config.model_uri {
        let builder = Yolov5Builder::from_url(uri).map_err(|e| {
          error!("模型 URL 无效 {}: {}", uri, e);
          ConfigError::InvalidValue {
            key: "MODEL_URI",
            value: format!("{} ({})", uri, e),
          }
        })?;
        info!("使用指定模型: {}", uri);
        let model = LazyModel::new(move || {
          builder
            .clone()
            .build::<PpeLabel>()
            .map_err(|e| ServiceError::ModelLoad {
              path: builder.model_path().to_path_buf(),
              source: Box::new(e),
            })
        });
        return Ok(ComplianceService::new(model, draw, output));
      }

      if let Err(e) = config.require_weight_sources() {
        error!("{}", e);
        return Err(e.into());
      }
      let provider = config.weights_provider();
      let detector = config.detector;
      let model = LazyModel::new(move || {
        load_with_fallback(&provider, |path| {
          let url = detector
            .model_url(path)
            .map_err(|e| Yolov5Error::ModelPathError(format!("{}: {}", path.display(), e)))?;
          debug!("检测模型: {}", url);
          Yolov5Builder::from_url(&url)?.build::<PpeLabel>()
        })
      });
      Ok(ComplianceService::new(model, draw, output))
    }
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    fn config_with(pairs: &'static [(&'static str, &'static str)]) -> AppConfig {
      AppConfig::load_with(None, |key| {
        pairs
          .iter()
          .find(|(k, _)| *k == key)
          .map(|(_, v)| v.to_string())
      })
      .unwrap()
    }

    #[test]
    fn missing_weight_source_is_a_configuration_error() {
      let config = config_with(&[]);
      let err = ComplianceService::from_config(&config, OutputWrapper::Discard)
        .err()
        .unwrap();
      assert!(matches!(err, ServiceError::Config(ConfigError::MissingWeightsSource)));
      assert!(err.is_fatal());
    }

    #[test]
    fn model_uri_skips_weight_acquisition() {
      let dir = tempfile::tempdir().unwrap();
      let missing = dir.path().join("missing.onnx");
      let uri = format!("yolov5://{}?conf=0.3", missing.display());
      let config = AppConfig::load_with(None, |key| (key == "MODEL_URI").then(|| uri.clone())).unwrap();

      // 没有权重来源也能组装，加载失败推迟到首次使用
      let service = ComplianceService::from_config(&config, OutputWrapper::Discard).unwrap();
      let err = service.warm_up().unwrap_err();
      match err {
        ServiceError::ModelUnavailable(cause) => {
          assert!(matches!(*cause, ServiceError::ModelLoad { ref path, .. } if *path == missing));
        }
        other => panic!("unexpected error: {:?}", other),
      }
    }

    #[test]
    fn invalid_model_uri_parameters_are_rejected_up_front() {
      let config = config_with(&[("MODEL_URI", "yolov5:///opt/ppe.onnx?conf=2")]);
      let err = ComplianceService::from_config(&config, OutputWrapper::Discard)
        .err()
        .unwrap();
      assert!(matches!(
        err,
        ServiceError::Config(ConfigError::InvalidValue { key: "MODEL_URI", .. })
      ));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, WithLabel};
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, Error)]
  #[error("fake inference failure")]
  struct FakeError;

  #[derive(Debug)]
  struct FakeModel {
    labels: Vec<u32>,
  }

  impl Model for FakeModel {
    type Input = RgbImage;
    type Output = DetectResult<PpeLabel>;
    type Error = FakeError;

    fn infer(&self, input: &RgbImage) -> Result<Self::Output, Self::Error> {
      if input.width() == 1 {
        return Err(FakeError);
      }
      Ok(DetectResult::from(
        self
          .labels
          .iter()
          .map(|&id| DetectItem {
            kind: PpeLabel::from_label_id(id),
            score: 0.9,
            bbox: [0.1, 0.1, 0.6, 0.6],
          })
          .collect::<Vec<_>>(),
      ))
    }
  }

  fn upload(width: u32) -> Upload {
    Upload {
      name: "site.png".to_string(),
      image: RgbImage::new(width, 32),
    }
  }

  #[test]
  fn report_summarises_labels_and_status() {
    let service = ComplianceService::new(
      LazyModel::ready(FakeModel {
        labels: vec![7, 0, 1, 0, 5],
      }),
      Draw::default(),
      OutputWrapper::Discard,
    );
    let report = service.process(upload(32)).unwrap();

    assert_eq!(report.labels(), ["Hardhat", "Mask", "Person", "Safety Vest"]);
    assert_eq!(report.status(), ComplianceStatus::FullyCompliant);
    assert_eq!(
      report.detected_objects_line(),
      "Detected Objects: Hardhat, Mask, Person, Safety Vest"
    );
    assert_eq!(report.status_line(), "Compliance Status: 🟢 Fully Compliant");
    assert_eq!(report.assessment.result.len(), 5);
    assert_ne!(report.assessment.annotated, report.image);
    assert!(report.saved.is_empty());
  }

  #[test]
  fn empty_detections_read_as_none() {
    let service = ComplianceService::new(
      LazyModel::ready(FakeModel { labels: vec![] }),
      Draw::default(),
      OutputWrapper::Discard,
    );
    let report = service.process(upload(32)).unwrap();
    assert_eq!(report.detected_objects_line(), "Detected Objects: None");
    assert_eq!(report.status(), ComplianceStatus::PartiallyCompliant);
  }

  #[test]
  fn per_image_errors_are_not_fatal() {
    let service = ComplianceService::new(
      LazyModel::ready(FakeModel { labels: vec![0] }),
      Draw::default(),
      OutputWrapper::Discard,
    );
    let err = service.process(upload(1)).unwrap_err();
    assert!(matches!(err, ServiceError::Inference(_)));
    assert!(!err.is_fatal());

    let err = service.process_bytes("photo.bmp", b"BM").unwrap_err();
    assert!(matches!(err, ServiceError::Input(_)));
    assert!(!err.is_fatal());

    assert!(service.process(upload(16)).is_ok());
  }

  #[test]
  fn failed_initialisation_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let model: LazyModel<FakeModel> = LazyModel::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Err(WeightsError::NoSource.into())
    });

    for _ in 0..3 {
      let err = model.get().unwrap_err();
      assert!(err.is_fatal());
      assert!(matches!(err, ServiceError::ModelUnavailable(_)));
      let cause = err.source().unwrap().to_string();
      assert!(cause.contains("MODEL_URL"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(model.is_initialized());
  }

  #[test]
  fn concurrent_first_use_initialises_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let model = LazyModel::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::thread::sleep(std::time::Duration::from_millis(50));
      Ok(FakeModel { labels: vec![2, 3, 4] })
    });

    std::thread::scope(|scope| {
      for _ in 0..8 {
        scope.spawn(|| {
          let model = model.get().unwrap();
          assert_eq!(model.labels.len(), 3);
        });
      }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
