// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 ONNX 模型（tract 推理后端）
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

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    DetectResult, Model, WithLabel,
    postprocess::{decode_rows, into_result, letterbox, nms},
  },
};

pub const YOLOV5_DEFAULT_INPUT_SIZE: u32 = 640;
pub const YOLOV5_DEFAULT_CONFIDENCE: f32 = 0.20;
pub const YOLOV5_DEFAULT_IOU: f32 = 0.45;

#[derive(Error, Debug)]
pub enum Yolov5Error {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误 {path}: {source}")]
  ModelLoadError {
    path: PathBuf,
    #[source]
    source: TractError,
  },
  #[error("推理错误: {0}")]
  InferenceError(#[from] TractError),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

type Plan = TypedRunnableModel<TypedModel>;

pub struct Yolov5<T> {
  plan: Plan,
  input_size: u32,
  confidence: f32,
  iou: f32,
  _phantom: PhantomData<fn() -> T>,
}

#[derive(Debug, Clone)]
pub struct Yolov5Builder {
  model_path: PathBuf,
  input_size: u32,
  confidence: f32,
  iou: f32,
}

impl FromUrlWithScheme for Yolov5Builder {
  const SCHEME: &'static str = "yolov5";
}

impl FromUrl for Yolov5Builder {
  type Error = Yolov5Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov5Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = Yolov5Builder::new(crate::url_path(url));
    for (key, value) in url.query_pairs() {
      let invalid = || Yolov5Error::InvalidParameter(format!("{}={}", key, value));
      match key.as_ref() {
        "conf" => builder.confidence = value.parse().map_err(|_| invalid())?,
        "iou" => builder.iou = value.parse().map_err(|_| invalid())?,
        "size" => builder.input_size = value.parse().map_err(|_| invalid())?,
        _ => debug!("忽略未知参数: {}={}", key, value),
      }
    }
    builder.validate()?;
    Ok(builder)
  }
}

impl Yolov5Builder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      input_size: YOLOV5_DEFAULT_INPUT_SIZE,
      confidence: YOLOV5_DEFAULT_CONFIDENCE,
      iou: YOLOV5_DEFAULT_IOU,
    }
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  fn validate(&self) -> Result<(), Yolov5Error> {
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(Yolov5Error::InvalidParameter(format!(
        "置信度阈值超出范围: {}",
        self.confidence
      )));
    }
    if !(0.0..=1.0).contains(&self.iou) {
      return Err(Yolov5Error::InvalidParameter(format!(
        "IoU 阈值超出范围: {}",
        self.iou
      )));
    }
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(Yolov5Error::InvalidParameter(format!(
        "输入尺寸必须为 32 的正整数倍: {}",
        self.input_size
      )));
    }
    Ok(())
  }

  pub fn build<T>(self) -> Result<Yolov5<T>, Yolov5Error> {
    self.validate()?;
    info!("加载模型文件: {}", self.model_path.display());

    let size = self.input_size as usize;
    let load_error = |source: TractError| Yolov5Error::ModelLoadError {
      path: self.model_path.clone(),
      source,
    };
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(load_error)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(load_error)?
      .into_optimized()
      .map_err(load_error)?
      .into_runnable()
      .map_err(load_error)?;
    info!(
      "模型加载完成 (输入 {}x{}, conf={}, iou={})",
      size, size, self.confidence, self.iou
    );

    Ok(Yolov5 {
      plan,
      input_size: self.input_size,
      confidence: self.confidence,
      iou: self.iou,
      _phantom: PhantomData,
    })
  }
}

/// 输出形状必须是 `[1, N, 5 + 类别数]`，返回每行长度
fn output_row_len(shape: &[usize]) -> Result<usize, Yolov5Error> {
  match shape {
    [1, _, row_len] if *row_len > 5 => Ok(*row_len),
    _ => {
      error!("预期输出形状为 [1, N, 5 + 类别数], 实际为 {:?}", shape);
      Err(Yolov5Error::InvalidOutputShape(shape.to_vec()))
    }
  }
}

impl<T> Yolov5<T> {
  fn input_tensor(&self, image: &RgbImage) -> Tensor {
    let size = self.input_size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into_tensor()
  }
}

impl<T: WithLabel> Model for Yolov5<T> {
  type Input = RgbImage;
  type Output = DetectResult<T>;
  type Error = Yolov5Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (padded, lb) = letterbox(input, self.input_size);
    debug!("letterbox 参数: {:?}", lb);

    let outputs = self.plan.run(tvec!(self.input_tensor(&padded).into()))?;
    let output = outputs
      .first()
      .ok_or_else(|| Yolov5Error::InvalidOutputShape(Vec::new()))?;
    let view = output.to_array_view::<f32>()?;
    let shape = view.shape().to_vec();
    debug!("模型输出形状: {:?}", shape);

    let row_len = output_row_len(&shape)?;
    let data: Vec<f32> = view.iter().copied().collect();
    let candidates = decode_rows(&data, row_len, self.confidence);
    debug!("置信度过滤后候选框数量: {}", candidates.len());
    let kept = nms(candidates, self.iou);
    debug!("NMS 后检测数量: {}", kept.len());

    Ok(into_result(kept, &lb))
  }
}
