// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output/screenshot.rs - 违规截图
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::debug;

use crate::record::{ViolationDetail, ViolationRecord};
use crate::vision::BoundingBox;
use crate::{FromUrl, FromUrlWithScheme};

const WORKER_COLOR: [u8; 3] = [255, 0, 0];
const MACHINE_COLOR: [u8; 3] = [255, 165, 0];
const LINK_COLOR: [u8; 3] = [255, 255, 0];
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum ScreenshotError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 截图上需要标出的目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
  pub worker: BoundingBox,
  /// 接近违规时的机械位置，会额外画出工人与机械的连线
  pub machine: Option<BoundingBox>,
}

impl Evidence {
  pub fn worker(worker: BoundingBox) -> Self {
    Self {
      worker,
      machine: None,
    }
  }

  pub fn proximity(worker: BoundingBox, machine: BoundingBox) -> Self {
    Self {
      worker,
      machine: Some(machine),
    }
  }
}

/// 违规截图存储，返回可写入记录的引用
pub trait ScreenshotStore: Send + Sync {
  fn save(
    &self,
    frame: &RgbImage,
    record: &ViolationRecord,
    evidence: &Evidence,
  ) -> Result<String, ScreenshotError>;
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
  let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
    return;
  };

  // 绘制边框（加粗为2像素）
  for thickness in 0..BOX_THICKNESS {
    let (tw, th) = (w as i32 - 2 * thickness, h as i32 - 2 * thickness);
    if tw <= 0 || th <= 0 {
      break;
    }
    let rect = Rect::at(x as i32 + thickness, y as i32 + thickness).of_size(tw as u32, th as u32);
    draw_hollow_rect_mut(image, rect, Rgb(color));
  }
}

/// 在帧副本上标出违规目标
pub fn annotate(frame: &RgbImage, evidence: &Evidence) -> RgbImage {
  let mut image = frame.clone();
  draw_box(&mut image, &evidence.worker, WORKER_COLOR);
  if let Some(machine) = &evidence.machine {
    draw_box(&mut image, machine, MACHINE_COLOR);
    draw_line_segment_mut(
      &mut image,
      evidence.worker.center(),
      machine.center(),
      Rgb(LINK_COLOR),
    );
  }
  image
}

/// 按违规类型分目录保存 JPEG 截图：
/// `<root>/<kind>/<kind>_<camera>_<worker>[_<machine>]_<YYYYmmdd_HHMMSS_mmm>.jpg`
///
/// 接近违规的文件名带上机械编号，同一帧内同一工人靠近多台机械时各自保存一张。
pub struct DirectoryScreenshots {
  root: PathBuf,
}

impl DirectoryScreenshots {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 相对于根目录的引用，同时也是记录中保存的截图引用
  pub fn reference_for(record: &ViolationRecord) -> String {
    let kind = record.kind();
    let subject = match &record.detail {
      ViolationDetail::SafetyGear { .. } => record.worker_id.to_string(),
      ViolationDetail::Proximity { machine_id, .. } => {
        format!("{}_{}", record.worker_id, machine_id)
      }
    };
    format!(
      "{}/{}_{}_{}_{}.jpg",
      kind,
      kind,
      record.camera_id,
      subject,
      record.timestamp.format("%Y%m%d_%H%M%S_%3f")
    )
  }
}

impl FromUrlWithScheme for DirectoryScreenshots {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryScreenshots {
  type Error = ScreenshotError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ScreenshotError::SchemeMismatch);
    }
    Ok(Self::new(uri.path()))
  }
}

impl ScreenshotStore for DirectoryScreenshots {
  fn save(
    &self,
    frame: &RgbImage,
    record: &ViolationRecord,
    evidence: &Evidence,
  ) -> Result<String, ScreenshotError> {
    let reference = Self::reference_for(record);
    let path = self.root.join(&reference);
    if let Some(directory) = path.parent()
      && !directory.exists()
    {
      std::fs::create_dir_all(directory)?;
    }

    annotate(frame, evidence).save(&path)?;
    debug!("保存违规截图 {}", path.display());
    Ok(reference)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, Utc};

  use super::*;
  use crate::record::{CameraId, MachineId, WorkerId};
  use crate::vision::GearItem;

  fn timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-04T05:06:07.089Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  #[test]
  fn reference_follows_naming_scheme() {
    let record = ViolationRecord::safety_gear(
      WorkerId::new(CameraId(2), 1),
      vec![GearItem::Helmet],
      3.0,
      timestamp(),
    );
    assert_eq!(
      DirectoryScreenshots::reference_for(&record),
      "safety_gear/safety_gear_2_worker_2_1_20260304_050607_089.jpg"
    );
  }

  #[test]
  fn annotation_marks_boxes_and_link() {
    let frame = RgbImage::new(100, 100);
    let evidence = Evidence::proximity(
      BoundingBox::new(10.0, 10.0, 20.0, 20.0),
      BoundingBox::new(60.0, 10.0, 20.0, 20.0),
    );
    let image = annotate(&frame, &evidence);

    assert_eq!(image.get_pixel(10, 15), &Rgb(WORKER_COLOR));
    assert_eq!(image.get_pixel(60, 15), &Rgb(MACHINE_COLOR));
    assert_eq!(image.get_pixel(45, 20), &Rgb(LINK_COLOR));
    // 原帧不受影响
    assert_eq!(frame.get_pixel(10, 15), &Rgb([0, 0, 0]));
  }

  #[test]
  fn saves_jpeg_under_kind_directory() {
    let root = std::env::temp_dir().join(format!("shaobing-shots-{}", std::process::id()));
    let store = DirectoryScreenshots::new(&root);
    let record = ViolationRecord::proximity(
      WorkerId::new(CameraId(1), 0),
      MachineId::new(CameraId(1), 0),
      20.0,
      timestamp(),
    );

    let reference = store
      .save(
        &RgbImage::new(32, 32),
        &record,
        &Evidence::worker(BoundingBox::new(0.0, 0.0, 8.0, 8.0)),
      )
      .unwrap();
    assert!(reference.starts_with("proximity/proximity_1_worker_1_0_machine_1_0_"));
    assert!(root.join(&reference).is_file());

    let _ = std::fs::remove_dir_all(root);
  }
}
