// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use shaobing::{
  CameraId, Settings,
  config::{cameras_from_env, parse_camera_arg},
  input::SourceSpec,
  stream::StreamTiming,
};

/// Shaobing 多路摄像头安全监控
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头，形如 ID=SOURCE，可重复。
  /// 未指定时读取 CAMERA_0_URL … CAMERA_3_URL。
  /// SOURCE 支持:
  /// - 本地摄像头: 0 或 /dev/video0
  /// - 网络流: rtsp://…、http://…
  /// - GStreamer 管道: gst:<描述>
  /// - 静态图片: image:///path/to/still.png?fps=5
  /// - 其他: 视频文件路径
  #[arg(long = "camera", value_name = "ID=SOURCE")]
  pub cameras: Vec<String>,

  /// 告警接收端（memory://?capacity=1000 或 jsonl:///path/to/violations.jsonl）
  #[arg(long, env = "SHAOBING_SINK", default_value = "memory://", value_name = "SINK")]
  pub sink: Url,

  /// 视觉适配器（replay:///path/to/detections.jsonl），未指定时不产生检测
  #[arg(long, env = "SHAOBING_VISION", value_name = "VISION")]
  pub vision: Option<Url>,

  /// 违规截图目录（folder:///path/to/violations），未指定时不保存截图
  #[arg(long, env = "SHAOBING_SCREENSHOTS", value_name = "FOLDER")]
  pub screenshots: Option<Url>,

  /// 防护装备持续缺失多少秒后告警
  #[arg(long, env = "ALERT_THRESHOLD_SECS", default_value_t = 3.0, value_name = "SECONDS")]
  pub alert_threshold: f64,

  /// 人机中心距离阈值（像素）
  #[arg(long, env = "PROXIMITY_THRESHOLD", default_value_t = 80.0, value_name = "PIXELS")]
  pub proximity_threshold: f64,

  /// 同一组合两次接近告警的最小间隔（秒）
  #[arg(long, env = "COOLDOWN_SECS", default_value_t = 5.0, value_name = "SECONDS")]
  pub cooldown: f64,

  /// 冷却表容量
  #[arg(long, env = "COOLDOWN_CAPACITY", default_value_t = 4096, value_name = "COUNT")]
  pub cooldown_capacity: usize,

  /// 人员检测置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "MIN_CONFIDENCE", default_value_t = 0.5, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 离线占位帧刷新间隔（毫秒）
  #[arg(long, env = "PLACEHOLDER_TICK_MS", default_value_t = 500, value_name = "MS")]
  pub placeholder_tick_ms: u64,

  /// 读取失败后重连前的等待（毫秒）
  #[arg(long, env = "RECONNECT_BACKOFF_MS", default_value_t = 1000, value_name = "MS")]
  pub reconnect_backoff_ms: u64,

  /// 释放视频源时等待读取线程退出的最长时间（毫秒）
  #[arg(long, env = "RELEASE_GRACE_MS", default_value_t = 2000, value_name = "MS")]
  pub release_grace_ms: u64,

  /// 流水线读取最新帧的间隔（毫秒）
  #[arg(long, env = "PIPELINE_INTERVAL_MS", default_value_t = 100, value_name = "MS")]
  pub pipeline_interval_ms: u64,
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
  Duration::try_from_secs_f64(value).with_context(|| format!("{} 不是有效的秒数: {}", name, value))
}

impl Args {
  pub fn settings(&self) -> Result<Settings> {
    Ok(Settings {
      alert_threshold: seconds("alert-threshold", self.alert_threshold)?,
      proximity_threshold: self.proximity_threshold,
      cooldown: seconds("cooldown", self.cooldown)?,
      min_confidence: self.confidence,
      cooldown_capacity: self.cooldown_capacity,
      pipeline_interval: Duration::from_millis(self.pipeline_interval_ms),
      stream: StreamTiming {
        placeholder_tick: Duration::from_millis(self.placeholder_tick_ms),
        reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
        release_grace: Duration::from_millis(self.release_grace_ms),
      },
    })
  }

  pub fn cameras(&self) -> Result<Vec<(CameraId, SourceSpec)>> {
    if self.cameras.is_empty() {
      return Ok(cameras_from_env());
    }
    self
      .cameras
      .iter()
      .map(|arg| parse_camera_arg(arg).with_context(|| format!("无效的摄像头参数: {}", arg)))
      .collect()
  }
}
