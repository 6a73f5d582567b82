// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/record.rs - 违规记录与标识符定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::vision::GearItem;

/// 摄像头标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for CameraId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim().parse().map(CameraId)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("无法解析标识符: {0}")]
pub struct IdParseError(String);

/// 按帧内序号合成的工人标识，渲染为 `worker_<camera>_<ordinal>`。
///
/// 序号只在单帧内有意义，跨帧并不保证对应同一个人。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId {
  pub camera: CameraId,
  pub ordinal: usize,
}

impl WorkerId {
  pub fn new(camera: CameraId, ordinal: usize) -> Self {
    Self { camera, ordinal }
  }
}

/// 机械标识，渲染为 `machine_<camera>_<index>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineId {
  pub camera: CameraId,
  pub index: usize,
}

impl MachineId {
  pub fn new(camera: CameraId, index: usize) -> Self {
    Self { camera, index }
  }
}

macro_rules! prefixed_id {
  ($ty:ident, $prefix:literal, $field:ident) => {
    impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, concat!($prefix, "_{}_{}"), self.camera, self.$field)
      }
    }

    impl FromStr for $ty {
      type Err = IdParseError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IdParseError(s.to_string());
        let rest = s
          .strip_prefix(concat!($prefix, "_"))
          .ok_or_else(err)?;
        let (camera, index) = rest.split_once('_').ok_or_else(err)?;
        Ok(Self {
          camera: camera.parse().map_err(|_| err())?,
          $field: index.parse().map_err(|_| err())?,
        })
      }
    }

    impl Serialize for $ty {
      fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
      }
    }

    impl<'de> Deserialize<'de> for $ty {
      fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
      }
    }
  };
}

prefixed_id!(WorkerId, "worker", ordinal);
prefixed_id!(MachineId, "machine", index);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
  SafetyGear,
  Proximity,
}

impl ViolationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ViolationKind::SafetyGear => "safety_gear",
      ViolationKind::Proximity => "proximity",
    }
  }
}

impl fmt::Display for ViolationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
  #[default]
  Ongoing,
  Resolved,
}

/// 违规详情，序列化时以 `kind` 字段区分类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationDetail {
  SafetyGear {
    missing: Vec<GearItem>,
    /// 持续违规时长（秒）
    duration: f64,
  },
  Proximity {
    machine_id: MachineId,
    /// 工人与机械中心点距离
    distance: f64,
  },
}

/// 追踪器产生的违规事实。
///
/// 交给告警接收端之后核心不再修改它，状态流转由接收端负责。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
  pub camera_id: CameraId,
  pub worker_id: WorkerId,
  pub detail: ViolationDetail,
  pub timestamp: DateTime<Utc>,
  pub screenshot: Option<String>,
  pub status: ViolationStatus,
}

impl ViolationRecord {
  pub fn safety_gear(
    worker_id: WorkerId,
    missing: Vec<GearItem>,
    duration: f64,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      camera_id: worker_id.camera,
      worker_id,
      detail: ViolationDetail::SafetyGear { missing, duration },
      timestamp,
      screenshot: None,
      status: ViolationStatus::Ongoing,
    }
  }

  pub fn proximity(
    worker_id: WorkerId,
    machine_id: MachineId,
    distance: f64,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      camera_id: worker_id.camera,
      worker_id,
      detail: ViolationDetail::Proximity {
        machine_id,
        distance,
      },
      timestamp,
      screenshot: None,
      status: ViolationStatus::Ongoing,
    }
  }

  pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
    self.screenshot = screenshot;
    self
  }

  pub fn kind(&self) -> ViolationKind {
    match self.detail {
      ViolationDetail::SafetyGear { .. } => ViolationKind::SafetyGear,
      ViolationDetail::Proximity { .. } => ViolationKind::Proximity,
    }
  }

  /// 安全装备违规为持续秒数，接近违规为距离
  pub fn duration_or_distance(&self) -> f64 {
    match self.detail {
      ViolationDetail::SafetyGear { duration, .. } => duration,
      ViolationDetail::Proximity { distance, .. } => distance,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn worker_id_renders_and_parses() {
    let id = WorkerId::new(CameraId(2), 5);
    assert_eq!(id.to_string(), "worker_2_5");
    assert_eq!("worker_2_5".parse::<WorkerId>(), Ok(id));
    assert!("machine_2_5".parse::<WorkerId>().is_err());
    assert!("worker_x_5".parse::<WorkerId>().is_err());
  }

  #[test]
  fn record_serializes_kind_tag() {
    let worker = WorkerId::new(CameraId(1), 0);
    let record = ViolationRecord::proximity(worker, MachineId::new(CameraId(1), 3), 42.5, Utc::now());
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["detail"]["kind"], "proximity");
    assert_eq!(json["detail"]["machine_id"], "machine_1_3");
    assert_eq!(json["worker_id"], "worker_1_0");
    assert_eq!(json["status"], "ongoing");
    assert_eq!(record.kind(), ViolationKind::Proximity);
    assert_eq!(record.duration_or_distance(), 42.5);
  }
}
