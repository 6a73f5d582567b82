// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/tracker/gear.rs - 防护装备违规追踪
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::{
  record::{CameraId, ViolationRecord, WorkerId},
  timing::elapsed_secs,
  vision::GearItem,
};

/// 单帧中一名工人的装备分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct GearObservation {
  pub worker: WorkerId,
  pub missing: Vec<GearItem>,
}

/// 防护装备违规追踪器。
///
/// 工人连续不合规超过阈值后，每一帧都产生一条记录；只要有一帧合规，计时立即清零。
#[derive(Debug)]
pub struct SafetyGearTracker {
  alert_threshold: TimeDelta,
  windows: HashMap<CameraId, HashMap<WorkerId, DateTime<Utc>>>,
}

impl SafetyGearTracker {
  pub fn new(alert_threshold: TimeDelta) -> Self {
    Self {
      alert_threshold,
      windows: HashMap::new(),
    }
  }

  pub fn alert_threshold(&self) -> TimeDelta {
    self.alert_threshold
  }

  /// 当前违规窗口的起始时间
  pub fn window_start(&self, worker: &WorkerId) -> Option<DateTime<Utc>> {
    self
      .windows
      .get(&worker.camera)
      .and_then(|windows| windows.get(worker))
      .copied()
  }

  pub fn open_windows(&self, camera: CameraId) -> usize {
    self.windows.get(&camera).map_or(0, HashMap::len)
  }

  /// 处理一帧的分类结果，按观测顺序返回本帧应发出的记录
  pub fn observe(
    &mut self,
    camera: CameraId,
    observations: &[GearObservation],
    now: DateTime<Utc>,
  ) -> Vec<ViolationRecord> {
    let windows = self.windows.entry(camera).or_default();
    let mut records = Vec::new();

    for GearObservation { worker, missing } in observations {
      if missing.is_empty() {
        if windows.remove(worker).is_some() {
          debug!("{} 恢复合规，重置违规计时", worker);
        }
        continue;
      }

      let started = *windows.entry(*worker).or_insert(now);
      if now - started >= self.alert_threshold {
        records.push(ViolationRecord::safety_gear(
          *worker,
          missing.clone(),
          elapsed_secs(started, now),
          now,
        ));
      }
    }

    records
  }

  /// 丢弃某摄像头的全部窗口（摄像头移除时调用）
  pub fn forget_camera(&mut self, camera: CameraId) {
    self.windows.remove(&camera);
  }
}
