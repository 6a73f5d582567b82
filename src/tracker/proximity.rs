// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/tracker/proximity.rs - 人机接近告警追踪
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::{
  record::{CameraId, MachineId, ViolationRecord, WorkerId},
  timing::CooldownMap,
  vision::BoundingBox,
};

type CooldownKey = (CameraId, WorkerId, MachineId);

/// 人机接近追踪器。
///
/// 工人与机械的中心距离小于阈值、且该 (摄像头, 工人, 机械) 组合的冷却已结束时产生记录。
/// 评估顺序固定为工人序号升序、机械序号升序。
#[derive(Debug)]
pub struct ProximityTracker {
  threshold: f64,
  cooldowns: CooldownMap<CooldownKey>,
}

impl ProximityTracker {
  pub fn new(threshold: f64, cooldown: TimeDelta, capacity: usize) -> Self {
    Self {
      threshold,
      cooldowns: CooldownMap::new(cooldown, capacity),
    }
  }

  pub fn threshold(&self) -> f64 {
    self.threshold
  }

  pub fn tracked_pairs(&self) -> usize {
    self.cooldowns.len()
  }

  /// `workers` 与 `machines` 按帧内序号给出；返回本帧应发出的记录
  pub fn observe(
    &mut self,
    camera: CameraId,
    workers: &[(WorkerId, BoundingBox)],
    machines: &[(MachineId, BoundingBox)],
    now: DateTime<Utc>,
  ) -> Vec<ViolationRecord> {
    let mut workers: Vec<_> = workers.iter().collect();
    workers.sort_by_key(|(id, _)| id.ordinal);
    let mut machines: Vec<_> = machines.iter().collect();
    machines.sort_by_key(|(id, _)| id.index);

    let mut records = Vec::new();
    for (worker, worker_box) in &workers {
      for (machine, machine_box) in &machines {
        let distance = worker_box.center_distance(machine_box);
        if distance >= self.threshold {
          continue;
        }
        if self.cooldowns.try_fire((camera, *worker, *machine), now) {
          records.push(ViolationRecord::proximity(*worker, *machine, distance, now));
        } else {
          debug!("{} 与 {} 仍在冷却期内", worker, machine);
        }
      }
    }

    records
  }
}
