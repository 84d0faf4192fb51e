// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{DetectItem, DetectResult, Polarity, WithLabel};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

const WORN_COLOR: [u8; 3] = [0, 200, 0];
const MISSING_COLOR: [u8; 3] = [220, 0, 0];
const NEUTRAL_COLOR: [u8; 3] = [0, 0, 255];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("读取字体文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  Invalid(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载标签字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 有字体时使用字体，字体不可用时只画框
  pub fn with_optional_font(path: Option<&Path>) -> Self {
    match path {
      Some(path) => Self::with_font_file(path).unwrap_or_else(|e| {
        warn!("字体不可用 ({}), 仅绘制边框", e);
        Self::default()
      }),
      None => Self::default(),
    }
  }

  pub fn color_for(polarity: Polarity) -> Rgb<u8> {
    match polarity {
      Polarity::Worn => Rgb(WORN_COLOR),
      Polarity::Missing => Rgb(MISSING_COLOR),
      Polarity::Neutral => Rgb(NEUTRAL_COLOR),
    }
  }

  /// 返回绘制了检测框的新图像
  pub fn annotate<T: WithLabel>(&self, image: &RgbImage, result: &DetectResult<T>) -> RgbImage {
    let mut annotated = image.clone();
    self.draw_detections_on_image(&mut annotated, result);
    annotated
  }

  pub fn draw_detections_on_image<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let color = Self::color_for(item.kind.polarity());

    let x_min = ((item.bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((item.bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((item.bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((item.bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w as i32 - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

/// 文本行记录：`label, score, x_min, y_min, x_max, y_max`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines<T: WithLabel>(&self, result: &DetectResult<T>) -> Vec<String> {
    result
      .items
      .iter()
      .map(|item| {
        let name = if self.label_with_name {
          item.kind.to_label_str()
        } else {
          item.kind.to_label_id().to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect()
  }

  pub fn record<T: WithLabel>(&self, result: &DetectResult<T>, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path, self.lines(result).join("\n"))
  }
}
