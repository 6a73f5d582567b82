// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 本模块提供基于 GStreamer 的解码输入，支持：
//! - 本地摄像头（V4L2）
//! - RTSP / HTTP 网络流
//! - 视频文件
//! - 原始管道描述
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## Cargo 特性
//!
//! 在 `Cargo.toml` 中启用 `gstreamer_input` 特性。
//!
//! ## 安全性注意
//!
//! `gst:` 管道描述直接传递给解析器。在生产环境中使用不可信输入时，
//! 应验证或限制管道描述以防止资源滥用。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::input::{CaptureError, FrameCapture, SourceSpec};

/// 单次拉取样本的最长等待时间，超时后返回给调用方检查取消标志
const PULL_TIMEOUT_MS: u64 = 200;
/// 等待管道进入播放状态的最长时间
const START_TIMEOUT_SECS: u64 = 5;
const RTSP_LATENCY_MS: u32 = 200;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// 该视频源不由 GStreamer 处理
  #[error("视频源不由 GStreamer 处理: {0}")]
  SourceMismatch(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource(String),
  RtspSource(String),
  HttpSource(String),
  Raw(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource(device) => {
        format!("v4l2src device={} ! decodebin", device)
      }
      GStreamerInputBuilderItem::RtspSource(location) => {
        format!(
          "rtspsrc location=\"{}\" latency={} ! decodebin",
          location, RTSP_LATENCY_MS
        )
      }
      GStreamerInputBuilderItem::HttpSource(location) => {
        format!("souphttpsrc location=\"{}\" is-live=true ! decodebin", location)
      }
      GStreamerInputBuilderItem::Raw(description) => description.clone(),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn for_spec(spec: &SourceSpec) -> Result<Self, GStreamerInputError> {
    let source = match spec {
      SourceSpec::Device(device) => GStreamerInputBuilderItem::CameraSource(device.clone()),
      SourceSpec::Rtsp(url) => GStreamerInputBuilderItem::RtspSource(url.to_string()),
      SourceSpec::Http(url) => GStreamerInputBuilderItem::HttpSource(url.to_string()),
      SourceSpec::File(path) => GStreamerInputBuilderItem::FileSource(path.display().to_string()),
      SourceSpec::Pipeline(description) => GStreamerInputBuilderItem::Raw(description.clone()),
      other => return Err(GStreamerInputError::SourceMismatch(other.to_string())),
    };

    Ok(Self {
      items: vec![
        source,
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
    })
  }

  pub fn build(self) -> Result<GStreamerCapture, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=1 drop=true sync=false name=sink",
      basic_pipeline
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let capture = GStreamerCapture { pipeline, appsink };
    capture.pipeline.set_state(gst::State::Playing)?;
    // 网络源在这里才真正建立连接，失败即视为打开失败
    let (result, _, _) = capture
      .pipeline
      .state(gst::ClockTime::from_seconds(START_TIMEOUT_SECS));
    result?;
    capture.check_bus()?;

    Ok(capture)
  }
}

/// 运行中的 GStreamer 管道，丢弃时停止
pub struct GStreamerCapture {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerCapture {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerCapture {
  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    if let Some(message) = bus.pop_filtered(&[gst::MessageType::Error])
      && let gst::MessageView::Error(err) = message.view()
    {
      return Err(GStreamerInputError::PipelineError(err.error().to_string()));
    }
    Ok(())
  }
}

impl FrameCapture for GStreamerCapture {
  fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
    match self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
    {
      Some(sample) => Ok(Some(convert_sample_to_rgb(sample)?)),
      None if self.appsink.is_eos() => Err(CaptureError::EndOfStream),
      None => {
        self
          .check_bus()
          .map_err(|e| CaptureError::Read(e.to_string()))?;
        Ok(None)
      }
    }
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_bytes = width * 3;
  let expected_size = stride * (height.saturating_sub(1)) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 去除行对齐填充
  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("Failed to build RGB image".to_string()))
}
