// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/stream/source.rs - 单路视频流源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{Frame, FrameKind},
  input::{CaptureOpener, FrameCapture},
  record::CameraId,
  timing::StopSignal,
};

const RELEASE_POLL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 流源的时间参数
#[derive(Debug, Clone, Copy)]
pub struct StreamTiming {
  /// 降级状态下重发离线占位帧的间隔
  pub placeholder_tick: Duration,
  /// 读取失败后重连前的等待
  pub reconnect_backoff: Duration,
  /// 释放时等待后台循环退出的最长时间
  pub release_grace: Duration,
}

impl Default for StreamTiming {
  fn default() -> Self {
    Self {
      placeholder_tick: Duration::from_millis(500),
      reconnect_backoff: Duration::from_millis(1000),
      release_grace: Duration::from_millis(2000),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connecting,
  Live,
  Degraded,
  Closed,
}

impl ConnectionState {
  pub fn as_str(self) -> &'static str {
    match self {
      ConnectionState::Connecting => "connecting",
      ConnectionState::Live => "live",
      ConnectionState::Degraded => "degraded",
      ConnectionState::Closed => "closed",
    }
  }
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 单槽最新帧：新帧直接覆盖旧帧
#[derive(Default)]
struct LatestFrame {
  frame: Option<Frame>,
  published: u64,
}

struct Shared {
  name: String,
  latest: Mutex<LatestFrame>,
  state: Mutex<ConnectionState>,
  stop: StopSignal,
  exited: AtomicBool,
}

impl Shared {
  fn publish(&self, image: RgbImage, kind: FrameKind) {
    let mut latest = lock(&self.latest);
    latest.published += 1;
    latest.frame = Some(Frame {
      image,
      kind,
      source: self.name.clone(),
      index: latest.published,
      captured_at: Utc::now(),
    });
  }

  /// 状态切换，每次切换只记录一次日志。已关闭的源不再切换
  fn transition(&self, next: ConnectionState) {
    let mut state = lock(&self.state);
    if *state == next || *state == ConnectionState::Closed {
      return;
    }
    let previous = std::mem::replace(&mut *state, next);
    drop(state);

    match next {
      ConnectionState::Degraded => {
        warn!("{}: {} -> {}，改为发布离线占位帧", self.name, previous, next)
      }
      _ => info!("{}: {} -> {}", self.name, previous, next),
    }
  }
}

/// 一路摄像头连接。
///
/// 后台线程持续读取最新帧；打开失败或重连失败后降级为周期发布的离线占位帧。
/// 读取方总是拿到一份独立的帧副本。
pub struct StreamSource {
  camera_id: CameraId,
  shared: Arc<Shared>,
  worker: Mutex<Option<JoinHandle<()>>>,
  release_grace: Duration,
}

impl StreamSource {
  /// 启动后台读取线程后立即返回，打开视频源在后台线程中进行
  pub fn start(
    camera_id: CameraId,
    name: impl Into<String>,
    opener: Arc<dyn CaptureOpener>,
    timing: StreamTiming,
  ) -> std::io::Result<Self> {
    let shared = Arc::new(Shared {
      name: name.into(),
      latest: Mutex::new(LatestFrame::default()),
      state: Mutex::new(ConnectionState::Connecting),
      stop: StopSignal::new(),
      exited: AtomicBool::new(false),
    });

    info!("{}: 连接 {}", shared.name, opener.describe());

    let worker = {
      let shared = shared.clone();
      thread::Builder::new()
        .name(format!("stream-{}", camera_id))
        .spawn(move || {
          fetch_loop(&shared, opener.as_ref(), &timing);
          shared.exited.store(true, Ordering::Release);
          debug!("{}: 读取线程退出", shared.name);
        })?
    };

    Ok(Self {
      camera_id,
      shared,
      worker: Mutex::new(Some(worker)),
      release_grace: timing.release_grace,
    })
  }

  pub fn camera_id(&self) -> CameraId {
    self.camera_id
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn state(&self) -> ConnectionState {
    *lock(&self.shared.state)
  }

  pub fn last_update(&self) -> Option<DateTime<Utc>> {
    lock(&self.shared.latest)
      .frame
      .as_ref()
      .map(|frame| frame.captured_at)
  }

  /// 最新帧的副本；尚无任何帧时返回标注了源名称的无信号占位帧
  pub fn get_frame(&self) -> Frame {
    let latest = lock(&self.shared.latest);
    match &latest.frame {
      Some(frame) => frame.clone(),
      None => {
        drop(latest);
        Frame::no_signal(&self.shared.name)
      }
    }
  }

  /// 后台循环是否已经退出
  pub fn is_finished(&self) -> bool {
    self.shared.exited.load(Ordering::Acquire)
  }

  /// 停止后台循环并释放解码句柄，可重复调用。
  ///
  /// 最多等待 `release_grace`，超时则放弃等待（线程会在下次检查停止信号时自行退出）。
  /// 返回后台循环是否已经退出。
  pub fn release(&self) -> bool {
    self.shared.transition(ConnectionState::Closed);
    self.shared.stop.stop();

    let Some(worker) = lock(&self.worker).take() else {
      return self.is_finished();
    };

    let deadline = Instant::now() + self.release_grace;
    while !self.is_finished() && !worker.is_finished() {
      if Instant::now() >= deadline {
        warn!(
          "{}: 读取线程未在 {:?} 内退出，不再等待",
          self.shared.name, self.release_grace
        );
        return false;
      }
      thread::sleep(RELEASE_POLL);
    }

    if worker.join().is_err() {
      error!("{}: 读取线程异常退出", self.shared.name);
    }
    true
  }
}

impl Drop for StreamSource {
  fn drop(&mut self) {
    self.release();
  }
}

fn fetch_loop(shared: &Shared, opener: &dyn CaptureOpener, timing: &StreamTiming) {
  let mut capture = match opener.open() {
    Ok(capture) => capture,
    Err(e) => {
      error!("{}: 打开视频源失败: {}", shared.name, e);
      degrade(shared, timing);
      return;
    }
  };
  if shared.stop.is_stopped() {
    return;
  }
  shared.transition(ConnectionState::Live);

  while !shared.stop.is_stopped() {
    match capture.read_frame() {
      Ok(Some(image)) => shared.publish(image, FrameKind::Live),
      Ok(None) => {}
      Err(e) => {
        warn!("{}: 读取帧失败: {}，尝试重连", shared.name, e);
        match reconnect(shared, opener, timing, capture) {
          Some(reopened) => capture = reopened,
          None => return,
        }
      }
    }
  }
}

/// 关闭旧句柄、等待、重新打开一次。重开失败即永久降级
fn reconnect(
  shared: &Shared,
  opener: &dyn CaptureOpener,
  timing: &StreamTiming,
  broken: Box<dyn FrameCapture>,
) -> Option<Box<dyn FrameCapture>> {
  drop(broken);
  if shared.stop.wait(timing.reconnect_backoff) {
    return None;
  }

  match opener.open() {
    Ok(capture) => {
      info!("{}: 重连成功", shared.name);
      Some(capture)
    }
    Err(e) => {
      error!("{}: 重连失败: {}", shared.name, e);
      degrade(shared, timing);
      None
    }
  }
}

fn degrade(shared: &Shared, timing: &StreamTiming) {
  if shared.stop.is_stopped() {
    return;
  }
  shared.transition(ConnectionState::Degraded);

  let placeholder = Frame::offline(&shared.name).image;
  loop {
    shared.publish(placeholder.clone(), FrameKind::Offline);
    if shared.stop.wait(timing.placeholder_tick) {
      break;
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::collections::VecDeque;
  use std::sync::atomic::AtomicUsize;

  use image::Rgb;

  use super::*;
  use crate::input::CaptureError;

  pub(crate) fn fast_timing() -> StreamTiming {
    StreamTiming {
      placeholder_tick: Duration::from_millis(10),
      reconnect_backoff: Duration::from_millis(20),
      release_grace: Duration::from_millis(500),
    }
  }

  /// 每次打开按脚本给出结果：`Some(n)` 产生 n 帧后读取失败，`None` 打开失败
  pub(crate) struct ScriptedOpener {
    pub opens: Mutex<VecDeque<Option<usize>>>,
    pub attempts: AtomicUsize,
  }

  impl ScriptedOpener {
    pub(crate) fn new<const N: usize>(script: [Option<usize>; N]) -> Arc<Self> {
      Arc::new(Self {
        opens: Mutex::new(script.into_iter().collect()),
        attempts: AtomicUsize::new(0),
      })
    }

    pub(crate) fn always_live() -> Arc<Self> {
      Self::new([])
    }
  }

  struct ScriptedCapture {
    remaining: Option<usize>,
  }

  impl FrameCapture for ScriptedCapture {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
      thread::sleep(Duration::from_millis(2));
      match &mut self.remaining {
        Some(0) => Err(CaptureError::Read("脚本结束".into())),
        Some(n) => {
          *n -= 1;
          Ok(Some(RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]))))
        }
        None => Ok(Some(RgbImage::from_pixel(4, 4, Rgb([200, 10, 10])))),
      }
    }
  }

  impl CaptureOpener for ScriptedOpener {
    fn describe(&self) -> String {
      "scripted".into()
    }

    fn open(&self) -> Result<Box<dyn FrameCapture>, CaptureError> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      match lock(&self.opens).pop_front() {
        // 脚本耗尽后一直成功且不再失败
        None => Ok(Box::new(ScriptedCapture { remaining: None })),
        Some(Some(frames)) => Ok(Box::new(ScriptedCapture {
          remaining: Some(frames),
        })),
        Some(None) => Err(CaptureError::Open {
          source_name: "scripted".into(),
          reason: "unreachable".into(),
        }),
      }
    }
  }

  /// 打开耗时较长且最终失败，用于模拟连接过程中被移除
  pub(crate) struct SlowOpener {
    pub delay: Duration,
  }

  impl CaptureOpener for SlowOpener {
    fn describe(&self) -> String {
      "slow".into()
    }

    fn open(&self) -> Result<Box<dyn FrameCapture>, CaptureError> {
      thread::sleep(self.delay);
      Err(CaptureError::Open {
        source_name: "slow".into(),
        reason: "timeout".into(),
      })
    }
  }

  pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
      if condition() {
        return true;
      }
      thread::sleep(Duration::from_millis(5));
    }
    false
  }

  #[test]
  fn unopenable_source_publishes_offline_placeholder() {
    let opener = ScriptedOpener::new([None]);
    let source = StreamSource::start(CameraId(1), "Camera-1", opener, fast_timing()).unwrap();

    assert!(wait_until(|| source.state() == ConnectionState::Degraded));
    assert!(wait_until(|| source.get_frame().kind == FrameKind::Offline));

    let first = source.get_frame();
    assert_eq!(first.source, "Camera-1");
    assert!(first.is_placeholder());
    // 占位帧持续刷新
    assert!(wait_until(|| source.get_frame().index > first.index));
    assert!(source.release());
    assert_eq!(source.state(), ConnectionState::Closed);
  }

  #[test]
  fn live_source_publishes_decoded_frames() {
    let opener = ScriptedOpener::always_live();
    let source = StreamSource::start(CameraId(2), "Camera-2", opener, fast_timing()).unwrap();

    assert!(wait_until(|| source.get_frame().kind == FrameKind::Live));
    assert_eq!(source.state(), ConnectionState::Live);
    assert!(source.last_update().is_some());

    let frame = source.get_frame();
    assert_eq!(frame.image.get_pixel(0, 0), &Rgb([200, 10, 10]));
    assert!(source.release());
  }

  #[test]
  fn frame_before_first_publish_is_no_signal() {
    let source = StreamSource::start(
      CameraId(3),
      "Camera-3",
      Arc::new(SlowOpener {
        delay: Duration::from_millis(200),
      }),
      fast_timing(),
    )
    .unwrap();

    let frame = source.get_frame();
    assert_eq!(frame.kind, FrameKind::NoSignal);
    assert_eq!(frame.source, "Camera-3");
    assert!(source.last_update().is_none());
    assert!(source.release());
  }

  #[test]
  fn read_failure_reconnects_once_then_degrades() {
    let opener = ScriptedOpener::new([Some(3), None]);
    let source =
      StreamSource::start(CameraId(4), "Camera-4", opener.clone(), fast_timing()).unwrap();

    assert!(wait_until(|| source.state() == ConnectionState::Degraded));
    assert_eq!(opener.attempts.load(Ordering::SeqCst), 2);
    assert!(wait_until(|| source.get_frame().kind == FrameKind::Offline));
    assert!(source.release());
  }

  #[test]
  fn successful_reconnect_stays_live() {
    let opener = ScriptedOpener::new([Some(2)]);
    let source =
      StreamSource::start(CameraId(5), "Camera-5", opener.clone(), fast_timing()).unwrap();

    assert!(wait_until(|| opener.attempts.load(Ordering::SeqCst) == 2));
    assert!(wait_until(|| source.get_frame().index > 5));
    assert_eq!(source.state(), ConnectionState::Live);
    assert!(source.release());
  }

  #[test]
  fn frames_are_independent_copies() {
    let opener = ScriptedOpener::always_live();
    let source = StreamSource::start(CameraId(6), "Camera-6", opener, fast_timing()).unwrap();
    assert!(wait_until(|| source.get_frame().kind == FrameKind::Live));

    let mut copy = source.get_frame();
    copy.image.put_pixel(0, 0, Rgb([0, 0, 0]));
    assert_eq!(source.get_frame().image.get_pixel(0, 0), &Rgb([200, 10, 10]));
    assert!(source.release());
  }

  #[test]
  fn release_is_idempotent() {
    let opener = ScriptedOpener::new([None]);
    let source = StreamSource::start(CameraId(7), "Camera-7", opener, fast_timing()).unwrap();
    assert!(source.release());
    assert!(source.release());
    assert!(source.is_finished());
    assert_eq!(source.state(), ConnectionState::Closed);
  }
}
