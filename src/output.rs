// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output.rs - 告警输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::record::{CameraId, ViolationKind, ViolationRecord, ViolationStatus};
use crate::{FromUrl, FromUrlWithScheme};

mod jsonl;
mod memory;
mod screenshot;

pub use self::jsonl::JsonLinesSink;
pub use self::memory::MemorySink;
pub use self::screenshot::{DirectoryScreenshots, Evidence, ScreenshotError, ScreenshotStore, annotate};

pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的参数 {key}: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
}

/// 接收端分配的记录编号，从 1 开始递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredViolation {
  pub id: RecordId,
  #[serde(flatten)]
  pub record: ViolationRecord,
}

/// 违规查询条件。时间范围两端均包含
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationQuery {
  pub camera: Option<CameraId>,
  pub kind: Option<ViolationKind>,
  pub status: Option<ViolationStatus>,
  pub from: Option<DateTime<Utc>>,
  pub to: Option<DateTime<Utc>>,
  pub limit: usize,
  pub offset: usize,
}

impl Default for ViolationQuery {
  fn default() -> Self {
    Self {
      camera: None,
      kind: None,
      status: None,
      from: None,
      to: None,
      limit: DEFAULT_QUERY_LIMIT,
      offset: 0,
    }
  }
}

impl ViolationQuery {
  pub fn camera(mut self, camera: CameraId) -> Self {
    self.camera = Some(camera);
    self
  }

  pub fn kind(mut self, kind: ViolationKind) -> Self {
    self.kind = Some(kind);
    self
  }

  pub fn status(mut self, status: ViolationStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
    self.from = from;
    self.to = to;
    self
  }

  pub fn page(mut self, limit: usize, offset: usize) -> Self {
    self.limit = limit;
    self.offset = offset;
    self
  }

  pub fn matches(&self, stored: &StoredViolation) -> bool {
    let record = &stored.record;
    self.camera.is_none_or(|camera| record.camera_id == camera)
      && self.kind.is_none_or(|kind| record.kind() == kind)
      && self.status.is_none_or(|status| record.status == status)
      && self.from.is_none_or(|from| record.timestamp >= from)
      && self.to.is_none_or(|to| record.timestamp <= to)
  }

  /// 过滤后按时间倒序（同一时刻按编号倒序）分页
  pub fn apply<'a>(&self, stored: impl Iterator<Item = &'a StoredViolation>) -> Vec<StoredViolation> {
    let mut matched: Vec<_> = stored.filter(|s| self.matches(s)).collect();
    matched.sort_by(|a, b| {
      b.record
        .timestamp
        .cmp(&a.record.timestamp)
        .then(b.id.cmp(&a.id))
    });
    matched
      .into_iter()
      .skip(self.offset)
      .take(self.limit)
      .cloned()
      .collect()
  }
}

/// 违规统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationStats {
  pub total: usize,
  pub safety_gear: usize,
  pub proximity: usize,
  pub resolved: usize,
}

impl ViolationStats {
  pub fn collect<'a>(records: impl Iterator<Item = &'a ViolationRecord>) -> Self {
    records.fold(Self::default(), |mut stats, record| {
      stats.total += 1;
      match record.kind() {
        ViolationKind::SafetyGear => stats.safety_gear += 1,
        ViolationKind::Proximity => stats.proximity += 1,
      }
      if record.status == ViolationStatus::Resolved {
        stats.resolved += 1;
      }
      stats
    })
  }
}

/// 告警接收端：通知与持久化。
///
/// 各摄像头的流水线共享同一个接收端，跨摄像头的写入在这里串行化。
pub trait AlertSink: Send + Sync {
  fn record(&self, record: &ViolationRecord) -> Result<RecordId, SinkError>;

  /// 标记为已处理；记录不存在时返回 false
  fn mark_resolved(&self, id: RecordId) -> Result<bool, SinkError>;

  fn query(&self, query: &ViolationQuery) -> Result<Vec<StoredViolation>, SinkError>;

  fn stats(
    &self,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
  ) -> Result<ViolationStats, SinkError> {
    let all = self.query(&ViolationQuery::default().between(from, to).page(usize::MAX, 0))?;
    Ok(ViolationStats::collect(all.iter().map(|s| &s.record)))
  }

  /// 清空全部记录，返回清除的条数
  fn clear(&self) -> Result<usize, SinkError>;
}

pub enum SinkWrapper {
  Memory(MemorySink),
  JsonLines(JsonLinesSink),
}

impl FromUrl for SinkWrapper {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      MemorySink::SCHEME => Ok(SinkWrapper::Memory(MemorySink::from_url(url)?)),
      JsonLinesSink::SCHEME => Ok(SinkWrapper::JsonLines(JsonLinesSink::from_url(url)?)),
      _ => Err(SinkError::SchemeMismatch),
    }
  }
}

impl AlertSink for SinkWrapper {
  fn record(&self, record: &ViolationRecord) -> Result<RecordId, SinkError> {
    match self {
      SinkWrapper::Memory(sink) => sink.record(record),
      SinkWrapper::JsonLines(sink) => sink.record(record),
    }
  }

  fn mark_resolved(&self, id: RecordId) -> Result<bool, SinkError> {
    match self {
      SinkWrapper::Memory(sink) => sink.mark_resolved(id),
      SinkWrapper::JsonLines(sink) => sink.mark_resolved(id),
    }
  }

  fn query(&self, query: &ViolationQuery) -> Result<Vec<StoredViolation>, SinkError> {
    match self {
      SinkWrapper::Memory(sink) => sink.query(query),
      SinkWrapper::JsonLines(sink) => sink.query(query),
    }
  }

  fn clear(&self) -> Result<usize, SinkError> {
    match self {
      SinkWrapper::Memory(sink) => sink.clear(),
      SinkWrapper::JsonLines(sink) => sink.clear(),
    }
  }
}
