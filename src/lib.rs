// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub mod config;
pub mod frame;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod stream;
pub mod task;
pub mod timing;
pub mod tracker;
pub mod vision;

pub use config::Settings;
pub use record::{CameraId, MachineId, ViolationKind, ViolationRecord, ViolationStatus, WorkerId};

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
