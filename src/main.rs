// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shaobing::{
  FromUrl,
  output::{AlertSink, DirectoryScreenshots, ScreenshotStore, SinkWrapper},
  stream::StreamRegistry,
  task::{Monitor, interrupt_channel},
  vision::ReplayVision,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let settings = args.settings()?;
  let cameras = args.cameras()?;

  info!("告警接收端: {}", args.sink);
  info!(
    "告警阈值: {:?}，接近阈值: {}，冷却: {:?}",
    settings.alert_threshold, settings.proximity_threshold, settings.cooldown
  );

  let sink: Arc<dyn AlertSink> = Arc::new(SinkWrapper::from_url(&args.sink)?);
  let screenshots: Option<Arc<dyn ScreenshotStore>> = match &args.screenshots {
    Some(url) => {
      let store = DirectoryScreenshots::from_url(url)?;
      info!("违规截图目录: {}", store.root().display());
      Some(Arc::new(store))
    }
    None => None,
  };
  let vision = match &args.vision {
    Some(url) => ReplayVision::from_url(url)?,
    None => {
      warn!("未配置视觉适配器，不会产生任何检测结果");
      ReplayVision::empty()
    }
  };

  let registry = Arc::new(StreamRegistry::new(settings.stream));
  for (id, spec) in cameras {
    info!("摄像头 {}: {}", id, spec);
    if !registry.add_camera(id, spec) {
      warn!("摄像头 {} 添加失败", id);
    }
  }

  let interrupted = interrupt_channel()?;
  let monitor = Monitor::start(
    registry.clone(),
    registry.list_cameras(),
    |_| vision.clone(),
    &settings,
    sink.clone(),
    screenshots,
  )?;

  let _ = interrupted.recv();
  warn!("中断信号接收，停止监控");

  for status in registry.status() {
    info!(
      "摄像头 {} ({}): {}，最后更新 {:?}",
      status.camera_id, status.name, status.state, status.last_update
    );
  }
  for (camera, processed) in monitor.stop() {
    info!("摄像头 {} 共分析 {} 帧", camera, processed);
  }
  registry.shutdown();

  let stats = sink.stats(None, None)?;
  info!(
    "违规统计: 共 {} 条，装备 {} 条，接近 {} 条，已处理 {} 条",
    stats.total, stats.safety_gear, stats.proximity, stats.resolved
  );
  info!("任务完成，退出");
  Ok(())
}
