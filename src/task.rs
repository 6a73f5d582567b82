// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/task.rs - 多摄像头监控任务
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
  config::Settings,
  output::{AlertSink, ScreenshotStore},
  pipeline::CameraPipeline,
  record::CameraId,
  stream::StreamRegistry,
  timing::StopSignal,
  vision::VisionAdapter,
};

/// 收到中断信号后等待有序退出的最长时间，超时强制退出
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 安装 Ctrl-C 处理函数，返回收到信号时触发的接收端
pub fn interrupt_channel() -> Result<mpsc::Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}

/// 监控任务：每路摄像头一个流水线线程，按固定间隔读取最新帧。
///
/// 占位帧和已经处理过的帧会被跳过。
pub struct Monitor {
  stop: Arc<StopSignal>,
  workers: Vec<(CameraId, JoinHandle<usize>)>,
}

impl Monitor {
  pub fn start<V, F>(
    registry: Arc<StreamRegistry>,
    cameras: impl IntoIterator<Item = CameraId>,
    mut make_vision: F,
    settings: &Settings,
    sink: Arc<dyn AlertSink>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
  ) -> std::io::Result<Self>
  where
    V: VisionAdapter + Send + 'static,
    F: FnMut(CameraId) -> V,
  {
    let stop = Arc::new(StopSignal::new());
    let mut monitor = Self {
      stop: stop.clone(),
      workers: Vec::new(),
    };

    for camera in cameras {
      let pipeline = CameraPipeline::new(
        camera,
        make_vision(camera),
        settings,
        sink.clone(),
        screenshots.clone(),
      );
      let registry = registry.clone();
      let stop = stop.clone();
      let interval = settings.pipeline_interval;

      // 启动失败时已启动的线程随 monitor 一起停止
      let handle = thread::Builder::new()
        .name(format!("pipeline-{}", camera))
        .spawn(move || run_camera(pipeline, &registry, &stop, interval))?;
      monitor.workers.push((camera, handle));
    }

    info!("开始任务，共 {} 路摄像头", monitor.workers.len());
    Ok(monitor)
  }

  pub fn cameras(&self) -> Vec<CameraId> {
    self.workers.iter().map(|(camera, _)| *camera).collect()
  }

  /// 停止所有流水线并等待退出，返回各摄像头处理的帧数
  pub fn stop(mut self) -> Vec<(CameraId, usize)> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Vec<(CameraId, usize)> {
    self.stop.stop();
    self
      .workers
      .drain(..)
      .filter_map(|(camera, handle)| match handle.join() {
        Ok(processed) => Some((camera, processed)),
        Err(_) => {
          error!("摄像头 {} 的流水线线程异常退出", camera);
          None
        }
      })
      .collect()
  }
}

impl Drop for Monitor {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn run_camera<V: VisionAdapter>(
  mut pipeline: CameraPipeline<V>,
  registry: &StreamRegistry,
  stop: &StopSignal,
  interval: Duration,
) -> usize {
  let camera = pipeline.camera();
  let mut last_seen = None;
  let mut attached = false;
  let mut processed = 0;

  while !stop.wait(interval) {
    let Some(source) = registry.get_camera(camera) else {
      if attached {
        attached = false;
        last_seen = None;
        pipeline.camera_lost();
      }
      continue;
    };
    attached = true;
    let frame = source.get_frame();
    drop(source);

    if frame.is_placeholder() {
      continue;
    }
    let key = (frame.index, frame.captured_at);
    if last_seen == Some(key) {
      continue;
    }
    last_seen = Some(key);

    let now = std::time::Instant::now();
    match pipeline.process_frame(&frame, frame.captured_at) {
      Ok(report) => {
        processed += 1;
        debug!(
          "摄像头 {} 第 {} 帧: {} 人, {} 台机械, {} 条记录，耗时 {:.2?}",
          camera,
          frame.index,
          report.workers,
          report.machines,
          report.emitted(),
          now.elapsed()
        );
      }
      Err(e) => warn!("{}", e),
    }
  }

  info!("摄像头 {} 的流水线退出，共处理 {} 帧", camera, processed);
  processed
}
