// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/config.rs - 运行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;
use tracing::warn;

use crate::input::{SourceSpec, SourceSpecError};
use crate::record::CameraId;
use crate::stream::StreamTiming;

/// 未显式配置摄像头时，从 `CAMERA_<n>_URL` 读取的摄像头数量
pub const ENV_CAMERA_SLOTS: u32 = 4;

const DEFAULT_CAMERAS: [&str; ENV_CAMERA_SLOTS as usize] = [
  "0",
  "1",
  "sample_video.mp4",
  "rtsp://example.com/live/stream",
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("摄像头参数应为 ID=SOURCE 形式: {0}")]
  InvalidCameraArg(String),
  #[error("无效的摄像头编号 {0}")]
  InvalidCameraId(String),
  #[error("视频源描述错误: {0}")]
  SourceSpec(#[from] SourceSpecError),
}

/// 检测与流管理参数，默认值与命令行默认值一致
#[derive(Debug, Clone)]
pub struct Settings {
  /// 防护装备持续缺失多久后告警
  pub alert_threshold: Duration,
  /// 人机中心距离小于该值即视为过近
  pub proximity_threshold: f64,
  /// 同一 (工人, 机械) 组合两次接近告警的最小间隔
  pub cooldown: Duration,
  /// 人员检测置信度下限（不含）
  pub min_confidence: f32,
  pub cooldown_capacity: usize,
  /// 流水线轮询最新帧的间隔
  pub pipeline_interval: Duration,
  pub stream: StreamTiming,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      alert_threshold: Duration::from_secs(3),
      proximity_threshold: 80.0,
      cooldown: Duration::from_secs(5),
      min_confidence: 0.5,
      cooldown_capacity: 4096,
      pipeline_interval: Duration::from_millis(100),
      stream: StreamTiming::default(),
    }
  }
}

fn to_delta(duration: Duration) -> TimeDelta {
  TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

impl Settings {
  pub fn alert_threshold_delta(&self) -> TimeDelta {
    to_delta(self.alert_threshold)
  }

  pub fn cooldown_delta(&self) -> TimeDelta {
    to_delta(self.cooldown)
  }
}

/// 解析 `ID=SOURCE` 形式的摄像头参数
pub fn parse_camera_arg(arg: &str) -> Result<(CameraId, SourceSpec), ConfigError> {
  let (id, source) = arg
    .split_once('=')
    .ok_or_else(|| ConfigError::InvalidCameraArg(arg.to_string()))?;
  let id = id
    .parse::<CameraId>()
    .map_err(|_| ConfigError::InvalidCameraId(id.to_string()))?;
  Ok((id, source.parse()?))
}

/// 按 `CAMERA_0_URL` … `CAMERA_3_URL` 组装摄像头列表，未设置的使用默认源。
/// 无法解析的源被跳过并记录警告
pub fn cameras_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<(CameraId, SourceSpec)> {
  (0..ENV_CAMERA_SLOTS)
    .filter_map(|slot| {
      let key = format!("CAMERA_{}_URL", slot);
      let value = lookup(&key).unwrap_or_else(|| DEFAULT_CAMERAS[slot as usize].to_string());
      match value.parse::<SourceSpec>() {
        Ok(spec) => Some((CameraId(slot), spec)),
        Err(e) => {
          warn!("{} 配置无效，跳过: {}", key, e);
          None
        }
      }
    })
    .collect()
}

pub fn cameras_from_env() -> Vec<(CameraId, SourceSpec)> {
  cameras_from(|key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let settings = Settings::default();
    assert_eq!(settings.alert_threshold_delta(), TimeDelta::seconds(3));
    assert_eq!(settings.cooldown_delta(), TimeDelta::seconds(5));
    assert_eq!(settings.proximity_threshold, 80.0);
    assert_eq!(settings.stream.placeholder_tick, Duration::from_millis(500));
  }

  #[test]
  fn camera_arg_parsing() {
    let (id, spec) = parse_camera_arg("3=rtsp://cam/live").unwrap();
    assert_eq!(id, CameraId(3));
    assert!(matches!(spec, SourceSpec::Rtsp(_)));

    assert!(matches!(
      parse_camera_arg("rtsp://cam/live"),
      Err(ConfigError::InvalidCameraArg(_))
    ));
    assert!(matches!(
      parse_camera_arg("x=0"),
      Err(ConfigError::InvalidCameraId(_))
    ));
  }

  #[test]
  fn env_cameras_fall_back_to_defaults() {
    let cameras = cameras_from(|key| match key {
      "CAMERA_1_URL" => Some("/dev/video4".to_string()),
      "CAMERA_3_URL" => Some("ftp://nowhere".to_string()),
      _ => None,
    });

    assert_eq!(
      cameras,
      vec![
        (CameraId(0), SourceSpec::Device("/dev/video0".into())),
        (CameraId(1), SourceSpec::Device("/dev/video4".into())),
        (CameraId(2), SourceSpec::File(PathBuf::from("sample_video.mp4"))),
      ]
    );
  }
}
