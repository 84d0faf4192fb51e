// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// tests/compliance_pipeline.rs - 端到端检测流程测试
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
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use thiserror::Error;
use url::Url;

use ppe_compliance::FromUrl;
use ppe_compliance::compliance::ComplianceStatus;
use ppe_compliance::input::ImageListInput;
use ppe_compliance::model::{DetectItem, DetectResult, Model, PpeLabel, WithLabel};
use ppe_compliance::output::OutputWrapper;
use ppe_compliance::output::draw::Draw;
use ppe_compliance::service::{ComplianceService, LazyModel, ServiceError, load_with_fallback};
use ppe_compliance::task::{BatchTask, Task};
use ppe_compliance::weights::{Fetch, FetchError, WeightSource, WeightsProvider};

const MIN_BYTES: u64 = 64;

#[derive(Debug, Error)]
#[error("corrupt weights: first byte {0:#x}")]
struct CorruptWeights(u8);

/// 权重文件首字节决定检测出的类别
struct ByteModel {
  class_ids: Vec<u32>,
}

impl ByteModel {
  fn load(path: &Path) -> Result<Self, CorruptWeights> {
    let bytes = std::fs::read(path).map_err(|_| CorruptWeights(0))?;
    match bytes.first().copied() {
      Some(b'F') => Ok(ByteModel {
        class_ids: vec![0, 1, 7],
      }),
      Some(b'N') => Ok(ByteModel {
        class_ids: vec![2, 3, 4, 5],
      }),
      other => Err(CorruptWeights(other.unwrap_or(0))),
    }
  }
}

impl Model for ByteModel {
  type Input = RgbImage;
  type Output = DetectResult<PpeLabel>;
  type Error = CorruptWeights;

  fn infer(&self, _input: &RgbImage) -> Result<Self::Output, Self::Error> {
    Ok(DetectResult::from(
      self
        .class_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| DetectItem {
          kind: PpeLabel::from_label_id(id),
          score: 0.9 - i as f32 * 0.1,
          bbox: [0.1, 0.1, 0.4 + i as f32 * 0.1, 0.8],
        })
        .collect::<Vec<_>>(),
    ))
  }
}

/// 每个 URL 返回固定内容
#[derive(Clone)]
struct StaticFetcher {
  bodies: Arc<Vec<(String, Vec<u8>)>>,
  calls: Arc<Mutex<usize>>,
}

impl Fetch for StaticFetcher {
  fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
    *self.calls.lock().unwrap() += 1;
    let host = url.host_str().unwrap_or_default();
    let body = self
      .bodies
      .iter()
      .find(|(h, _)| h == host)
      .map(|(_, body)| body.clone())
      .unwrap_or_default();
    std::fs::write(dest, &body)?;
    Ok(body.len() as u64)
  }
}

fn weights(marker: u8) -> Vec<u8> {
  vec![marker; 2 * MIN_BYTES as usize]
}

fn fetcher(url_body: Vec<u8>, drive_body: Vec<u8>) -> StaticFetcher {
  StaticFetcher {
    bodies: Arc::new(vec![
      ("weights.example.com".to_string(), url_body),
      ("drive.usercontent.google.com".to_string(), drive_body),
    ]),
    calls: Arc::default(),
  }
}

fn provider(dir: &Path, fetcher: &StaticFetcher) -> WeightsProvider {
  WeightsProvider::new(
    dir.join("models").join("best.onnx"),
    vec![
      WeightSource::Url(Url::parse("https://weights.example.com/best.onnx").unwrap()),
      WeightSource::DriveFileId("drive-id".to_string()),
    ],
  )
  .min_bytes(MIN_BYTES)
  .fetcher(fetcher.clone())
}

fn png_bytes() -> Vec<u8> {
  let image = RgbImage::from_pixel(64, 48, Rgb([120, 120, 120]));
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

#[test]
fn model_load_failure_falls_back_to_the_next_source() {
  let dir = tempfile::tempdir().unwrap();
  let fetcher = fetcher(weights(b'X'), weights(b'F'));
  let provider = provider(dir.path(), &fetcher);

  let model = load_with_fallback(&provider, ByteModel::load).unwrap();
  assert_eq!(model.class_ids, vec![0, 1, 7]);
  assert_eq!(*fetcher.calls.lock().unwrap(), 2);
}

#[test]
fn model_load_failure_keeps_the_cause() {
  let dir = tempfile::tempdir().unwrap();
  let fetcher = fetcher(weights(b'X'), weights(b'Y'));
  let provider = provider(dir.path(), &fetcher);

  let err = load_with_fallback(&provider, ByteModel::load).err().unwrap();
  assert!(err.is_fatal());
  assert!(matches!(err, ServiceError::ModelLoad { .. }));
  let cause = err.source().unwrap();
  assert_eq!(cause.to_string(), "corrupt weights: first byte 0x59");
}

#[test]
fn uploads_are_classified_and_recorded() {
  let dir = tempfile::tempdir().unwrap();
  let fetcher = fetcher(weights(b'N'), Vec::new());
  let provider = provider(dir.path(), &fetcher);
  let detections = dir.path().join("detections");

  let output_url =
    ppe_compliance::parse_url_or_path(&detections.display().to_string(), "folder").unwrap();
  let service = ComplianceService::new(
    LazyModel::new(move || load_with_fallback(&provider, ByteModel::load)),
    Draw::default(),
    OutputWrapper::from_url(&output_url).unwrap(),
  );

  let report = service.process_bytes("crew.PNG", &png_bytes()).unwrap();
  assert_eq!(
    report.labels(),
    ["NO-Hardhat", "NO-Mask", "NO-Safety Vest", "Person"]
  );
  assert_eq!(report.status(), ComplianceStatus::NonCompliant);
  assert_eq!(
    report.summary(),
    "Detected Objects: NO-Hardhat, NO-Mask, NO-Safety Vest, Person\nCompliance Status: 🔴 Non-Compliant"
  );
  assert_eq!(report.saved.len(), 3);
  for path in &report.saved {
    assert!(path.starts_with(&detections));
    assert!(path.exists());
  }

  // 第二次上传复用已加载的模型
  service.process_bytes("crew.jpeg", &[]).unwrap_err();
  service.process_bytes("again.png", &png_bytes()).unwrap();
  assert_eq!(*fetcher.calls.lock().unwrap(), 1);
}

#[test]
fn batch_over_files_continues_past_bad_uploads() {
  let dir = tempfile::tempdir().unwrap();
  let fetcher = fetcher(weights(b'F'), Vec::new());
  let provider = provider(dir.path(), &fetcher);

  let good = dir.path().join("good.png");
  std::fs::write(&good, png_bytes()).unwrap();
  let unsupported = dir.path().join("scan.tiff");
  std::fs::write(&unsupported, png_bytes()).unwrap();
  let corrupt = dir.path().join("corrupt.jpg");
  std::fs::write(&corrupt, b"not a jpeg").unwrap();

  let urls = [&good, &unsupported, &corrupt, &good]
    .iter()
    .map(|p| ppe_compliance::parse_url_or_path(&p.display().to_string(), "image").unwrap())
    .collect();

  let service = ComplianceService::new(
    LazyModel::new(move || load_with_fallback(&provider, ByteModel::load)),
    Draw::default(),
    OutputWrapper::Discard,
  );
  let summary = BatchTask::default()
    .run_task(ImageListInput::new(urls), &service)
    .unwrap();

  assert_eq!(summary.reports.len(), 2);
  assert!(
    summary
      .reports
      .iter()
      .all(|r| r.status == ComplianceStatus::FullyCompliant)
  );
  assert_eq!(summary.failures.len(), 2);
}

#[test]
fn batch_stops_when_weights_cannot_be_acquired() {
  let dir = tempfile::tempdir().unwrap();
  let fetcher = fetcher(Vec::new(), Vec::new());
  let provider = provider(dir.path(), &fetcher);

  let good = dir.path().join("good.png");
  std::fs::write(&good, png_bytes()).unwrap();
  let url = ppe_compliance::parse_url_or_path(&good.display().to_string(), "image").unwrap();

  let service = ComplianceService::new(
    LazyModel::new(move || load_with_fallback(&provider, ByteModel::load)),
    Draw::default(),
    OutputWrapper::Discard,
  );
  let result = BatchTask::default().run_task(ImageListInput::new(vec![url.clone(), url]), &service);
  assert!(result.is_err());
  // 两个来源各尝试两次，之后不再重试
  assert_eq!(*fetcher.calls.lock().unwrap(), 4);
}
