// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::time::Duration;

use image::{ImageReader, RgbImage};
use tracing::info;

use crate::input::{CaptureError, FrameCapture};

/// 以固定帧率重复输出同一张静态图片，适合调试和演示
pub struct ImageFileCapture {
  image: RgbImage,
  interval: Duration,
}

impl ImageFileCapture {
  pub fn open(path: &Path, fps: u32) -> Result<Self, CaptureError> {
    let open_error = |reason: String| CaptureError::Open {
      source_name: path.display().to_string(),
      reason,
    };

    let image = ImageReader::open(path)
      .map_err(|e| open_error(e.to_string()))?
      .decode()
      .map_err(|e| open_error(e.to_string()))?
      .into_rgb8();

    info!(
      "打开图像文件 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Self {
      image,
      interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
    })
  }
}

impl FrameCapture for ImageFileCapture {
  fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
    std::thread::sleep(self.interval);
    Ok(Some(self.image.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_fails_to_open() {
    let err = ImageFileCapture::open(Path::new("/nonexistent/still.png"), 5)
      .err()
      .unwrap();
    assert!(matches!(err, CaptureError::Open { .. }));
  }

  #[test]
  fn repeats_the_still_image() {
    let path = std::env::temp_dir().join(format!("shaobing-still-{}.png", std::process::id()));
    RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();

    let mut capture = ImageFileCapture::open(&path, 100).unwrap();
    let first = capture.read_frame().unwrap().unwrap();
    let second = capture.read_frame().unwrap().unwrap();
    assert_eq!(first.dimensions(), (8, 6));
    assert_eq!(first, second);

    let _ = std::fs::remove_file(path);
  }
}
