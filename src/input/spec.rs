// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input/spec.rs - 视频源描述解析
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::FromUrl;

const DEFAULT_IMAGE_FPS: u32 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum SourceSpecError {
  #[error("视频源描述为空")]
  Empty,
  #[error("不支持的 URI 方案: {0}")]
  UnsupportedScheme(String),
  #[error("GStreamer 管道描述解码失败: {0}")]
  InvalidPipeline(String),
  #[error("无效的帧率参数: {0}")]
  InvalidFps(String),
}

/// 单个摄像头的视频源
///
/// 支持的写法：
/// - `0`、`/dev/video0`：本地摄像头
/// - `rtsp://...`、`rtsps://...`：RTSP 网络流
/// - `http://...`、`https://...`：HTTP 视频流（如 MJPEG 网络摄像头）
/// - `gst:<管道描述>`：原始 GStreamer 管道（可百分号编码）
/// - `image:///path/to/still.png?fps=5`：把静态图片当作摄像头
/// - 其他：视频文件路径
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
  Device(String),
  Rtsp(Url),
  Http(Url),
  File(PathBuf),
  Pipeline(String),
  Image { path: PathBuf, fps: u32 },
}

impl FromStr for SourceSpec {
  type Err = SourceSpecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(SourceSpecError::Empty);
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
      return Ok(SourceSpec::Device(format!("/dev/video{}", s)));
    }
    if s.starts_with("/dev/video") {
      return Ok(SourceSpec::Device(s.to_string()));
    }
    if let Some(description) = s.strip_prefix("gst:") {
      let description = description.trim_start_matches("//");
      let decoded = urlencoding::decode(description)
        .map_err(|e| SourceSpecError::InvalidPipeline(e.to_string()))?;
      return Ok(SourceSpec::Pipeline(decoded.into_owned()));
    }

    match Url::parse(s) {
      Ok(url) => SourceSpec::from_url(&url),
      Err(_) => Ok(SourceSpec::File(PathBuf::from(s))),
    }
  }
}

impl FromUrl for SourceSpec {
  type Error = SourceSpecError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "rtsp" | "rtsps" => Ok(SourceSpec::Rtsp(url.clone())),
      "http" | "https" => Ok(SourceSpec::Http(url.clone())),
      "file" => Ok(SourceSpec::File(PathBuf::from(url.path()))),
      "image" => {
        let fps = match url.query_pairs().find(|(k, _)| k == "fps") {
          Some((_, v)) => v
            .parse::<u32>()
            .ok()
            .filter(|fps| *fps > 0)
            .ok_or_else(|| SourceSpecError::InvalidFps(v.to_string()))?,
          None => DEFAULT_IMAGE_FPS,
        };
        Ok(SourceSpec::Image {
          path: PathBuf::from(url.path()),
          fps,
        })
      }
      other => Err(SourceSpecError::UnsupportedScheme(other.to_string())),
    }
  }
}

impl fmt::Display for SourceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceSpec::Device(device) => write!(f, "{}", device),
      SourceSpec::Rtsp(url) | SourceSpec::Http(url) => {
        // 日志中不输出口令
        let mut shown = url.clone();
        if shown.password().is_some() {
          let _ = shown.set_password(Some("***"));
        }
        write!(f, "{}", shown)
      }
      SourceSpec::File(path) => write!(f, "{}", path.display()),
      SourceSpec::Pipeline(description) => write!(f, "gst:{}", description),
      SourceSpec::Image { path, fps } => write!(f, "image://{}?fps={}", path.display(), fps),
    }
  }
}
