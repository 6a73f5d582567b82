// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/pipeline.rs - 单摄像头检测告警流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::imageops;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
  config::Settings,
  frame::Frame,
  output::{AlertSink, Evidence, RecordId, ScreenshotStore, SinkError},
  record::{CameraId, MachineId, ViolationDetail, ViolationRecord, WorkerId},
  tracker::{GearObservation, ProximityTracker, SafetyGearTracker},
  vision::{BoundingBox, VisionAdapter},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("摄像头 {camera} 视觉分析失败，跳过该帧: {source}")]
  Vision {
    camera: CameraId,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// 一帧的处理结果
#[derive(Debug, Default)]
pub struct FrameReport {
  /// 通过置信度过滤的人员数
  pub workers: usize,
  pub machines: usize,
  /// 已交给接收端的记录
  pub delivered: Vec<(RecordId, ViolationRecord)>,
  /// 接收端拒绝的记录
  pub failed: Vec<(ViolationRecord, SinkError)>,
}

impl FrameReport {
  pub fn emitted(&self) -> usize {
    self.delivered.len() + self.failed.len()
  }
}

/// 单帧视觉分析结果，全部视觉调用成功后才交给追踪器
struct Analysis {
  workers: Vec<(WorkerId, BoundingBox)>,
  gear: Vec<GearObservation>,
  machines: Vec<(MachineId, BoundingBox)>,
}

/// 一路摄像头的处理流水线：视觉分析 → 追踪器 → 截图 → 告警接收端。
///
/// 追踪器状态只属于本摄像头，由流水线独占。
pub struct CameraPipeline<V: VisionAdapter> {
  camera: CameraId,
  vision: V,
  min_confidence: f32,
  gear: SafetyGearTracker,
  proximity: ProximityTracker,
  sink: Arc<dyn AlertSink>,
  screenshots: Option<Arc<dyn ScreenshotStore>>,
}

impl<V: VisionAdapter> CameraPipeline<V> {
  pub fn new(
    camera: CameraId,
    vision: V,
    settings: &Settings,
    sink: Arc<dyn AlertSink>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
  ) -> Self {
    Self {
      camera,
      vision,
      min_confidence: settings.min_confidence,
      gear: SafetyGearTracker::new(settings.alert_threshold_delta()),
      proximity: ProximityTracker::new(
        settings.proximity_threshold,
        settings.cooldown_delta(),
        settings.cooldown_capacity,
      ),
      sink,
      screenshots,
    }
  }

  pub fn camera(&self) -> CameraId {
    self.camera
  }

  pub fn gear_tracker(&self) -> &SafetyGearTracker {
    &self.gear
  }

  pub fn proximity_tracker(&self) -> &ProximityTracker {
    &self.proximity
  }

  /// 摄像头从注册表消失后丢弃装备计时窗口，重新接入时从头计时
  pub fn camera_lost(&mut self) {
    if self.gear.open_windows(self.camera) > 0 {
      debug!("摄像头 {} 已移除，清空装备计时窗口", self.camera);
    }
    self.gear.forget_camera(self.camera);
  }

  fn vision_error(&self, e: V::Error) -> PipelineError {
    PipelineError::Vision {
      camera: self.camera,
      source: Box::new(e),
    }
  }

  fn analyze(&mut self, frame: &Frame) -> Result<Analysis, PipelineError> {
    self.vision.begin_frame(self.camera, frame.index);
    let image = &frame.image;

    let subjects = self
      .vision
      .detect_subjects(image)
      .map_err(|e| self.vision_error(e))?;

    let workers: Vec<_> = subjects
      .into_iter()
      .filter(|d| d.confidence > self.min_confidence)
      .enumerate()
      .map(|(ordinal, d)| (WorkerId::new(self.camera, ordinal), d.bbox))
      .collect();

    let mut gear = Vec::with_capacity(workers.len());
    for (worker, bbox) in &workers {
      let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
        debug!("{} 的区域在画面之外，跳过装备识别", worker);
        continue;
      };
      let roi = imageops::crop_imm(image, x, y, w, h).to_image();
      let missing = self
        .vision
        .classify_gear(&roi, bbox)
        .map_err(|e| self.vision_error(e))?;
      gear.push(GearObservation {
        worker: *worker,
        missing,
      });
    }

    let machines = self
      .vision
      .detect_machinery(image)
      .map_err(|e| self.vision_error(e))?
      .into_iter()
      .enumerate()
      .map(|(index, bbox)| (MachineId::new(self.camera, index), bbox))
      .collect();

    Ok(Analysis {
      workers,
      gear,
      machines,
    })
  }

  /// 处理一帧。视觉分析失败时整帧跳过，追踪器状态不变
  pub fn process_frame(
    &mut self,
    frame: &Frame,
    now: DateTime<Utc>,
  ) -> Result<FrameReport, PipelineError> {
    let analysis = self.analyze(frame)?;

    let mut records = self.gear.observe(self.camera, &analysis.gear, now);
    records.extend(
      self
        .proximity
        .observe(self.camera, &analysis.workers, &analysis.machines, now),
    );

    let mut report = FrameReport {
      workers: analysis.workers.len(),
      machines: analysis.machines.len(),
      ..FrameReport::default()
    };

    for record in records {
      let record = match evidence_for(&record, &analysis) {
        Some(evidence) => {
          let screenshot = self.capture(frame, &record, &evidence);
          record.with_screenshot(screenshot)
        }
        None => record,
      };

      match self.sink.record(&record) {
        Ok(id) => {
          warn!(
            "摄像头 {} 违规 #{}: {} {}",
            self.camera,
            id,
            record.kind(),
            record.worker_id
          );
          report.delivered.push((id, record));
        }
        Err(e) => {
          error!("摄像头 {} 违规记录写入失败: {}", self.camera, e);
          report.failed.push((record, e));
        }
      }
    }

    Ok(report)
  }

  /// 尽力保存截图，失败只记录日志
  fn capture(&self, frame: &Frame, record: &ViolationRecord, evidence: &Evidence) -> Option<String> {
    let store = self.screenshots.as_ref()?;
    match store.save(&frame.image, record, evidence) {
      Ok(reference) => Some(reference),
      Err(e) => {
        warn!("摄像头 {} 保存违规截图失败: {}", self.camera, e);
        None
      }
    }
  }
}

fn evidence_for(record: &ViolationRecord, analysis: &Analysis) -> Option<Evidence> {
  let worker = analysis
    .workers
    .get(record.worker_id.ordinal)
    .map(|(_, bbox)| *bbox)?;
  match &record.detail {
    ViolationDetail::SafetyGear { .. } => Some(Evidence::worker(worker)),
    ViolationDetail::Proximity { machine_id, .. } => analysis
      .machines
      .get(machine_id.index)
      .map(|(_, machine)| Evidence::proximity(worker, *machine)),
  }
}
