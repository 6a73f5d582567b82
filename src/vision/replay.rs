// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/vision/replay.rs - 检测结果回放
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 从 JSON Lines 文件回放视觉分析结果，用于离线复现整条告警流水线。
//!
//! 每行描述一个摄像头的一帧：
//!
//! ```text
//! {"camera":1,"frame":12,"subjects":[{"bbox":{"x":10,"y":20,"width":40,"height":90},"confidence":0.9,"missing":["helmet"]}],"machinery":[]}
//! ```
//!
//! 省略 `frame` 的行作用于该摄像头的所有帧（静态场景）。

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  record::CameraId,
  vision::{BoundingBox, Detection, GearItem, VisionAdapter},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
  #[error("区域 {0:?} 不属于当前帧的任何人员")]
  UnknownRegion(BoundingBox),
}

#[derive(Debug, Clone, Deserialize)]
struct ReplaySubject {
  bbox: BoundingBox,
  confidence: f32,
  #[serde(default)]
  missing: Vec<GearItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReplayFrame {
  #[serde(default)]
  subjects: Vec<ReplaySubject>,
  #[serde(default)]
  machinery: Vec<BoundingBox>,
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
  camera: CameraId,
  frame: Option<u64>,
  #[serde(flatten)]
  content: ReplayFrame,
}

#[derive(Debug, Default)]
struct ReplayScript {
  frames: HashMap<(CameraId, u64), ReplayFrame>,
  scenes: HashMap<CameraId, ReplayFrame>,
}

/// 回放式视觉适配器。脚本在多个摄像头的流水线之间共享，只读。
#[derive(Debug, Clone)]
pub struct ReplayVision {
  script: Arc<ReplayScript>,
  current: Option<(CameraId, u64)>,
}

impl FromUrlWithScheme for ReplayVision {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayVision {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch);
    }
    let file = std::fs::File::open(url.path())?;
    let vision = Self::from_reader(BufReader::new(file))?;
    info!("已加载检测回放脚本: {}", url.path());
    Ok(vision)
  }
}

impl ReplayVision {
  /// 不产生任何检测结果的适配器
  pub fn empty() -> Self {
    Self {
      script: Arc::new(ReplayScript::default()),
      current: None,
    }
  }

  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
    let mut script = ReplayScript::default();
    for (index, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let parsed: ReplayLine =
        serde_json::from_str(&line).map_err(|source| ReplayError::ParseError {
          line: index + 1,
          source,
        })?;
      match parsed.frame {
        Some(frame) => {
          script.frames.insert((parsed.camera, frame), parsed.content);
        }
        None => {
          script.scenes.insert(parsed.camera, parsed.content);
        }
      }
    }
    Ok(Self {
      script: Arc::new(script),
      current: None,
    })
  }

  fn current_frame(&self) -> Option<&ReplayFrame> {
    let (camera, index) = self.current?;
    self
      .script
      .frames
      .get(&(camera, index))
      .or_else(|| self.script.scenes.get(&camera))
  }
}

impl VisionAdapter for ReplayVision {
  type Error = ReplayError;

  fn begin_frame(&mut self, camera: CameraId, frame_index: u64) {
    self.current = Some((camera, frame_index));
  }

  fn detect_subjects(&self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    Ok(
      self
        .current_frame()
        .map(|frame| {
          frame
            .subjects
            .iter()
            .map(|s| Detection {
              bbox: s.bbox,
              confidence: s.confidence,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn classify_gear(
    &self,
    _roi: &RgbImage,
    region: &BoundingBox,
  ) -> Result<Vec<GearItem>, Self::Error> {
    self
      .current_frame()
      .and_then(|frame| frame.subjects.iter().find(|s| s.bbox == *region))
      .map(|s| s.missing.clone())
      .ok_or(ReplayError::UnknownRegion(*region))
  }

  fn detect_machinery(&self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error> {
    Ok(
      self
        .current_frame()
        .map(|frame| frame.machinery.clone())
        .unwrap_or_default(),
    )
  }
}
