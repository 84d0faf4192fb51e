// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/model/postprocess.rs - 预处理与后处理（letterbox、解码、NMS）
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

use image::{Rgb, RgbImage, imageops};

use crate::model::{DetectItem, DetectResult, WithLabel};

/// letterbox 填充颜色
pub const LETTERBOX_FILL: u8 = 114;

/// letterbox 变换参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub orig_w: f32,
  pub orig_h: f32,
}

impl Letterbox {
  /// 模型输入坐标 `[x_min, y_min, x_max, y_max]` 转为原图归一化坐标
  pub fn to_original(&self, bbox: [f32; 4]) -> [f32; 4] {
    let unpad = |v: f32, pad: f32, limit: f32| ((v - pad) / self.scale).clamp(0.0, limit) / limit;
    [
      unpad(bbox[0], self.pad_x, self.orig_w),
      unpad(bbox[1], self.pad_y, self.orig_h),
      unpad(bbox[2], self.pad_x, self.orig_w),
      unpad(bbox[3], self.pad_y, self.orig_h),
    ]
  }
}

/// 保持长宽比缩放到 `size x size`，居中并用灰色填充
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
  let (orig_w, orig_h) = image.dimensions();
  let scale = (size as f32 / orig_w as f32).min(size as f32 / orig_h as f32);
  let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);

  let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
  let mut padded = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
  let pad_x = (size - new_w) / 2;
  let pad_y = (size - new_h) / 2;
  imageops::overlay(&mut padded, &resized, pad_x as i64, pad_y as i64);

  (
    padded,
    Letterbox {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      orig_w: orig_w as f32,
      orig_h: orig_h as f32,
    },
  )
}

/// 候选框，坐标为模型输入像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// 解码 YOLOv5 输出，每行为 `cx, cy, w, h, obj, cls...`
pub fn decode_rows(data: &[f32], row_len: usize, conf_threshold: f32) -> Vec<Candidate> {
  if row_len <= 5 {
    return Vec::new();
  }

  let mut candidates = Vec::new();
  for row in data.chunks_exact(row_len) {
    let objectness = row[4];
    if objectness < conf_threshold {
      continue;
    }

    let (class_id, class_score) = row[5..]
      .iter()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (idx, &score)| {
        if score > best.1 { (idx, score) } else { best }
      });

    let score = objectness * class_score;
    if score < conf_threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    candidates.push(Candidate {
      class_id: class_id as u32,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  candidates
}

/// 计算两个 `[x_min, y_min, x_max, y_max]` 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 按类别的非极大值抑制，结果按置信度降序
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|best| {
      best.class_id == candidate.class_id && iou(&best.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 将候选框映射回原图并转换为检测结果
pub fn into_result<T: WithLabel>(candidates: Vec<Candidate>, letterbox: &Letterbox) -> DetectResult<T> {
  candidates
    .into_iter()
    .map(|candidate| DetectItem {
      kind: T::from_label_id(candidate.class_id),
      score: candidate.score,
      bbox: letterbox.to_original(candidate.bbox),
    })
    .collect::<Vec<_>>()
    .into()
}
