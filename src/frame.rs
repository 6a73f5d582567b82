// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/frame.rs - 帧定义与占位帧
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

const OFFLINE_BACKGROUND: [u8; 3] = [64, 64, 64];
const OFFLINE_BORDER: [u8; 3] = [100, 100, 100];
const OFFLINE_CROSS: [u8; 3] = [150, 150, 150];
const BORDER_INSET: i32 = 10;

/// 帧来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
  /// 解码得到的真实画面
  Live,
  /// 摄像头不可达时循环发布的离线占位帧
  Offline,
  /// 尚未产生任何帧时返回的占位帧
  NoSignal,
}

/// 流源发布的一帧。读取方拿到的总是独立副本
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  pub kind: FrameKind,
  /// 产生该帧的流源名称
  pub source: String,
  /// 流源内单调递增的发布序号，`NoSignal` 帧为 0
  pub index: u64,
  pub captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn is_placeholder(&self) -> bool {
    self.kind != FrameKind::Live
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 摄像头离线时的占位帧：深灰底色、边框和对角线
  pub fn offline(source: &str) -> Self {
    Self {
      image: offline_image(),
      kind: FrameKind::Offline,
      source: source.to_string(),
      index: 0,
      captured_at: Utc::now(),
    }
  }

  /// 还没有任何帧时的占位帧：纯黑
  pub fn no_signal(source: &str) -> Self {
    Self {
      image: RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT),
      kind: FrameKind::NoSignal,
      source: source.to_string(),
      index: 0,
      captured_at: Utc::now(),
    }
  }
}

fn offline_image() -> RgbImage {
  let mut image =
    RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, Rgb(OFFLINE_BACKGROUND));

  let (w, h) = (PLACEHOLDER_WIDTH as i32, PLACEHOLDER_HEIGHT as i32);
  // 绘制边框（加粗为2像素）
  for thickness in 0..2 {
    let inset = BORDER_INSET + thickness;
    let rect = Rect::at(inset, inset).of_size((w - 2 * inset) as u32, (h - 2 * inset) as u32);
    draw_hollow_rect_mut(&mut image, rect, Rgb(OFFLINE_BORDER));
  }

  let (l, t) = (BORDER_INSET as f32 * 4.0, BORDER_INSET as f32 * 4.0);
  let (r, b) = (w as f32 - l, h as f32 - t);
  draw_line_segment_mut(&mut image, (l, t), (r, b), Rgb(OFFLINE_CROSS));
  draw_line_segment_mut(&mut image, (r, t), (l, b), Rgb(OFFLINE_CROSS));

  image
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn placeholders_are_tagged_and_distinguishable() {
    let offline = Frame::offline("Camera-1");
    let blank = Frame::no_signal("Camera-1");

    assert!(offline.is_placeholder());
    assert!(blank.is_placeholder());
    assert_eq!(offline.source, "Camera-1");
    assert_eq!(offline.width(), PLACEHOLDER_WIDTH);
    assert_eq!(blank.height(), PLACEHOLDER_HEIGHT);
    assert_eq!(offline.image.get_pixel(320, 5), &Rgb(OFFLINE_BACKGROUND));
    assert_eq!(offline.image.get_pixel(320, BORDER_INSET as u32), &Rgb(OFFLINE_BORDER));
    assert_eq!(blank.image.get_pixel(320, 240), &Rgb([0, 0, 0]));
  }
}
