// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/vision.rs - 视觉分析接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::record::CameraId;

mod replay;
pub use self::replay::{ReplayError, ReplayVision};

/// 像素坐标下的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  /// 两个边界框中心点之间的欧氏距离
  pub fn center_distance(&self, other: &BoundingBox) -> f64 {
    let (ax, ay) = self.center();
    let (bx, by) = other.center();
    let dx = (ax - bx) as f64;
    let dy = (ay - by) as f64;
    (dx * dx + dy * dy).sqrt()
  }

  /// 裁剪到图像范围内，返回整数像素区域 (x, y, w, h)；区域为空时返回 None
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x_min = self.x.floor().clamp(0.0, width as f32) as u32;
    let y_min = self.y.floor().clamp(0.0, height as f32) as u32;
    let x_max = (self.x + self.width).ceil().clamp(0.0, width as f32) as u32;
    let y_max = (self.y + self.height).ceil().clamp(0.0, height as f32) as u32;

    if x_min >= x_max || y_min >= y_max {
      return None;
    }
    Some((x_min, y_min, x_max - x_min, y_max - y_min))
  }
}

/// 单帧中检测到的人员
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub confidence: f32,
}

/// 防护装备种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GearItem {
  Helmet,
  Vest,
  Mask,
  Gloves,
  Boots,
}

impl GearItem {
  pub fn to_label_str(self) -> &'static str {
    match self {
      GearItem::Helmet => "helmet",
      GearItem::Vest => "vest",
      GearItem::Mask => "mask",
      GearItem::Gloves => "gloves",
      GearItem::Boots => "boots",
    }
  }
}

impl fmt::Display for GearItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.to_label_str())
  }
}

/// 外部视觉分析能力。
///
/// 置信度过滤和感兴趣区域裁剪由调用方负责，实现只需回答“看到了什么”。
pub trait VisionAdapter {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 切换到下一帧。`frame_index` 为流源发布的帧序号
  fn begin_frame(&mut self, _camera: CameraId, _frame_index: u64) {}

  fn detect_subjects(&self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error>;

  /// `roi` 为已裁剪的人员区域，`region` 为该区域在整帧中的位置
  fn classify_gear(&self, roi: &RgbImage, region: &BoundingBox)
  -> Result<Vec<GearItem>, Self::Error>;

  fn detect_machinery(&self, frame: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn center_distance_is_euclidean() {
    let worker = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
    let machine = BoundingBox::new(30.0, 40.0, 20.0, 20.0);
    assert!((worker.center_distance(&machine) - 50.0).abs() < 1e-9);
  }

  #[test]
  fn clamp_drops_boxes_outside_the_image() {
    let inside = BoundingBox::new(-5.0, 10.0, 20.0, 500.0);
    assert_eq!(inside.clamp_to(640, 480), Some((0, 10, 15, 470)));

    let outside = BoundingBox::new(700.0, 10.0, 20.0, 20.0);
    assert_eq!(outside.clamp_to(640, 480), None);
  }
}
