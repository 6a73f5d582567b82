// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output/memory.rs - 内存告警接收端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::output::{AlertSink, RecordId, SinkError, StoredViolation, ViolationQuery};
use crate::record::{ViolationRecord, ViolationStatus};
use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;

struct MemoryState {
  entries: VecDeque<StoredViolation>,
  next_id: u64,
}

/// 固定容量的环形缓冲区，写满后丢弃最早的记录
pub struct MemorySink {
  capacity: usize,
  state: Mutex<MemoryState>,
}

impl Default for MemorySink {
  fn default() -> Self {
    Self::new(DEFAULT_MEMORY_CAPACITY)
  }
}

impl MemorySink {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      state: Mutex::new(MemoryState {
        entries: VecDeque::with_capacity(capacity.min(DEFAULT_MEMORY_CAPACITY)),
        next_id: 1,
      }),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.state().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state().entries.is_empty()
  }

  fn state(&self) -> MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl FromUrlWithScheme for MemorySink {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemorySink {
  type Error = SinkError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }

    let mut capacity = DEFAULT_MEMORY_CAPACITY;
    for (k, v) in url.query_pairs() {
      if k == "capacity" {
        capacity = v
          .parse::<usize>()
          .ok()
          .filter(|c| *c > 0)
          .ok_or_else(|| SinkError::InvalidParameter {
            key: k.to_string(),
            value: v.to_string(),
          })?;
      }
    }

    info!("使用内存告警接收端，容量 {}", capacity);
    Ok(Self::new(capacity))
  }
}

impl AlertSink for MemorySink {
  fn record(&self, record: &ViolationRecord) -> Result<RecordId, SinkError> {
    let mut state = self.state();
    let id = RecordId(state.next_id);
    state.next_id += 1;

    if state.entries.len() >= self.capacity
      && let Some(dropped) = state.entries.pop_front()
    {
      debug!("内存告警接收端已满，丢弃记录 {}", dropped.id);
    }
    state.entries.push_back(StoredViolation {
      id,
      record: record.clone(),
    });
    Ok(id)
  }

  fn mark_resolved(&self, id: RecordId) -> Result<bool, SinkError> {
    let mut state = self.state();
    match state.entries.iter_mut().find(|s| s.id == id) {
      Some(stored) => {
        stored.record.status = ViolationStatus::Resolved;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn query(&self, query: &ViolationQuery) -> Result<Vec<StoredViolation>, SinkError> {
    Ok(query.apply(self.state().entries.iter()))
  }

  fn clear(&self) -> Result<usize, SinkError> {
    let mut state = self.state();
    let cleared = state.entries.len();
    state.entries.clear();
    Ok(cleared)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, Utc};

  use super::*;
  use crate::record::{CameraId, WorkerId};
  use crate::vision::GearItem;

  fn record(secs: i64) -> ViolationRecord {
    ViolationRecord::safety_gear(
      WorkerId::new(CameraId(1), 0),
      vec![GearItem::Vest],
      3.0,
      DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
    )
  }

  #[test]
  fn ring_buffer_drops_oldest() {
    let sink = MemorySink::new(2);
    let first = sink.record(&record(0)).unwrap();
    let second = sink.record(&record(1)).unwrap();
    let third = sink.record(&record(2)).unwrap();

    assert_eq!((first, second, third), (RecordId(1), RecordId(2), RecordId(3)));
    assert_eq!(sink.len(), 2);

    let ids: Vec<_> = sink
      .query(&ViolationQuery::default())
      .unwrap()
      .into_iter()
      .map(|s| s.id)
      .collect();
    assert_eq!(ids, vec![third, second]);
    assert!(!sink.mark_resolved(first).unwrap());
  }

  #[test]
  fn resolve_and_stats() {
    let sink = MemorySink::default();
    let id = sink.record(&record(0)).unwrap();
    sink.record(&record(1)).unwrap();

    assert!(sink.mark_resolved(id).unwrap());
    let resolved = sink
      .query(&ViolationQuery::default().status(ViolationStatus::Resolved))
      .unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, id);

    let stats = sink.stats(None, None).unwrap();
    assert_eq!((stats.total, stats.safety_gear, stats.resolved), (2, 2, 1));

    assert_eq!(sink.clear().unwrap(), 2);
    assert!(sink.is_empty());
  }

  #[test]
  fn capacity_comes_from_url() {
    let url = url::Url::parse("memory://?capacity=7").unwrap();
    assert_eq!(MemorySink::from_url(&url).unwrap().capacity(), 7);

    let url = url::Url::parse("memory://?capacity=0").unwrap();
    assert!(matches!(
      MemorySink::from_url(&url),
      Err(SinkError::InvalidParameter { .. })
    ));
  }
}
