// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input.rs - 视频输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;

mod spec;
pub use self::spec::{SourceSpec, SourceSpecError};

#[cfg(feature = "image_file_input")]
mod image_file;
#[cfg(feature = "image_file_input")]
pub use self::image_file::ImageFileCapture;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerCapture, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开视频源 {source_name}: {reason}")]
  Open { source_name: String, reason: String },
  #[error("视频流读取失败: {0}")]
  Read(String),
  #[error("视频流已结束")]
  EndOfStream,
  #[error("当前构建不支持该视频源: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 已打开的解码句柄。丢弃即释放底层资源
pub trait FrameCapture: Send {
  /// 阻塞读取下一帧。`Ok(None)` 表示等待超时，调用方可检查取消标志后重试
  fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

/// 能够（重新）打开某个视频源的描述
pub trait CaptureOpener: Send + Sync {
  fn describe(&self) -> String;
  fn open(&self) -> Result<Box<dyn FrameCapture>, CaptureError>;
}

impl CaptureOpener for SourceSpec {
  fn describe(&self) -> String {
    self.to_string()
  }

  fn open(&self) -> Result<Box<dyn FrameCapture>, CaptureError> {
    match self {
      #[cfg(feature = "image_file_input")]
      SourceSpec::Image { path, fps } => Ok(Box::new(ImageFileCapture::open(path, *fps)?)),
      #[cfg(feature = "gstreamer_input")]
      SourceSpec::Device(_)
      | SourceSpec::Rtsp(_)
      | SourceSpec::Http(_)
      | SourceSpec::File(_)
      | SourceSpec::Pipeline(_) => {
        let capture = GStreamerInputPipelineBuilder::for_spec(self)?.build()?;
        Ok(Box::new(capture))
      }
      #[allow(unreachable_patterns)]
      other => Err(CaptureError::Unsupported(other.to_string())),
    }
  }
}
