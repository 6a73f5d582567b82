// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/stream/registry.rs - 摄像头注册表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::{BTreeSet, HashMap};
use std::sync::{
  Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::{
  input::{CaptureOpener, SourceSpec},
  record::CameraId,
  stream::{ConnectionState, StreamSource, StreamTiming},
};

/// 单个摄像头的运行状态
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStatus {
  pub camera_id: CameraId,
  pub name: String,
  pub state: ConnectionState,
  pub last_update: Option<DateTime<Utc>>,
}

/// 按摄像头标识管理全部流源。
///
/// 增删操作由 `mutation` 串行化；映射表只在查找和替换条目时短暂加锁，
/// 释放旧流源在映射表锁之外进行，不会阻塞其他摄像头的读帧。
pub struct StreamRegistry {
  timing: StreamTiming,
  sources: RwLock<HashMap<CameraId, Arc<StreamSource>>>,
  mutation: Mutex<()>,
}

impl Default for StreamRegistry {
  fn default() -> Self {
    Self::new(StreamTiming::default())
  }
}

impl StreamRegistry {
  pub fn new(timing: StreamTiming) -> Self {
    Self {
      timing,
      sources: RwLock::new(HashMap::new()),
      mutation: Mutex::new(()),
    }
  }

  fn read(&self) -> RwLockReadGuard<'_, HashMap<CameraId, Arc<StreamSource>>> {
    self.sources.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, HashMap<CameraId, Arc<StreamSource>>> {
    self.sources.write().unwrap_or_else(PoisonError::into_inner)
  }

  fn serialize_mutation(&self) -> MutexGuard<'_, ()> {
    self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 添加摄像头，已存在时先释放旧流源再替换
  pub fn add_camera(&self, id: CameraId, spec: SourceSpec) -> bool {
    self.add_source(id, format!("Camera-{}", id), Arc::new(spec))
  }

  pub fn add_source(
    &self,
    id: CameraId,
    name: impl Into<String>,
    opener: Arc<dyn CaptureOpener>,
  ) -> bool {
    let _mutation = self.serialize_mutation();

    let previous = self.write().remove(&id);
    if let Some(previous) = previous {
      info!("摄像头 {} 已存在，替换旧的视频源", id);
      previous.release();
    }

    match StreamSource::start(id, name, opener, self.timing) {
      Ok(source) => {
        self.write().insert(id, Arc::new(source));
        info!("已添加摄像头 {}", id);
        true
      }
      Err(e) => {
        error!("无法启动摄像头 {} 的读取线程: {}", id, e);
        false
      }
    }
  }

  pub fn get_camera(&self, id: CameraId) -> Option<Arc<StreamSource>> {
    self.read().get(&id).cloned()
  }

  /// 移除并释放摄像头；不存在时返回 false
  pub fn remove_camera(&self, id: CameraId) -> bool {
    let _mutation = self.serialize_mutation();

    let removed = self.write().remove(&id);
    match removed {
      Some(source) => {
        if !source.release() {
          warn!("摄像头 {} 的读取线程仍在退出中", id);
        }
        info!("已移除摄像头 {}", id);
        true
      }
      None => false,
    }
  }

  pub fn list_cameras(&self) -> BTreeSet<CameraId> {
    self.read().keys().copied().collect()
  }

  /// 按摄像头标识升序给出各摄像头状态
  pub fn status(&self) -> Vec<CameraStatus> {
    let mut statuses: Vec<_> = self
      .read()
      .values()
      .map(|source| CameraStatus {
        camera_id: source.camera_id(),
        name: source.name().to_string(),
        state: source.state(),
        last_update: source.last_update(),
      })
      .collect();
    statuses.sort_by_key(|status| status.camera_id);
    statuses
  }

  /// 释放全部流源
  pub fn shutdown(&self) {
    let _mutation = self.serialize_mutation();

    let drained: Vec<_> = self.write().drain().collect();
    if drained.is_empty() {
      return;
    }
    info!("释放 {} 路视频源", drained.len());
    for (id, source) in drained {
      if !source.release() {
        warn!("摄像头 {} 的读取线程仍在退出中", id);
      }
    }
  }
}

impl Drop for StreamRegistry {
  fn drop(&mut self) {
    self.shutdown();
  }
}
