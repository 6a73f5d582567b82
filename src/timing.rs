// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/timing.rs - 计时与冷却工具
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// 过期条目的清扫阈值，以冷却周期的倍数计
const SWEEP_AGE_FACTOR: i32 = 4;

/// `since` 到 `now` 经过的秒数，时钟回拨时记为 0
pub fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
  let delta = now - since;
  (delta.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0).max(0.0)
}

/// 按键记录上次告警时间的冷却表。
///
/// 容量有限：超过容量时淘汰最久未触发的条目；每个冷却周期最多清扫一次，
/// 移除超过 4 个冷却周期未再触发的条目。
#[derive(Debug)]
pub struct CooldownMap<K> {
  period: TimeDelta,
  capacity: usize,
  last_fired: HashMap<K, DateTime<Utc>>,
  last_sweep: Option<DateTime<Utc>>,
}

impl<K: Eq + Hash + Clone> CooldownMap<K> {
  pub fn new(period: TimeDelta, capacity: usize) -> Self {
    Self {
      period,
      capacity: capacity.max(1),
      last_fired: HashMap::new(),
      last_sweep: None,
    }
  }

  pub fn period(&self) -> TimeDelta {
    self.period
  }

  pub fn len(&self) -> usize {
    self.last_fired.len()
  }

  pub fn is_empty(&self) -> bool {
    self.last_fired.is_empty()
  }

  /// 冷却是否已结束（从未触发过的键视为已结束）
  pub fn is_ready(&self, key: &K, now: DateTime<Utc>) -> bool {
    self
      .last_fired
      .get(key)
      .is_none_or(|last| now - *last >= self.period)
  }

  /// 冷却结束则记录本次触发并返回 true，否则不改变状态
  pub fn try_fire(&mut self, key: K, now: DateTime<Utc>) -> bool {
    self.sweep(now);
    if !self.is_ready(&key, now) {
      return false;
    }
    self.last_fired.insert(key, now);
    if self.last_fired.len() > self.capacity {
      self.evict_oldest();
    }
    true
  }

  fn sweep(&mut self, now: DateTime<Utc>) {
    if self
      .last_sweep
      .is_some_and(|last| now - last < self.period)
    {
      return;
    }
    self.last_sweep = Some(now);
    let max_age = self.period * SWEEP_AGE_FACTOR;
    self.last_fired.retain(|_, last| now - *last < max_age);
  }

  fn evict_oldest(&mut self) {
    let oldest = self
      .last_fired
      .iter()
      .min_by_key(|(_, at)| **at)
      .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
      self.last_fired.remove(&key);
    }
  }
}

/// 可被立即唤醒的停止信号，用于后台循环的协作式取消
#[derive(Debug, Default)]
pub struct StopSignal {
  stopped: Mutex<bool>,
  wake: Condvar,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
    *stopped = true;
    self.wake.notify_all();
  }

  pub fn is_stopped(&self) -> bool {
    *self.stopped.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 最多等待 `timeout`，期间收到停止信号立即返回。返回是否已停止
  pub fn wait(&self, timeout: Duration) -> bool {
    let stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
    let (stopped, _) = self
      .wake
      .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
      .unwrap_or_else(|e| e.into_inner());
    *stopped
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Instant;

  use super::*;

  fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
  }

  #[test]
  fn cooldown_blocks_until_period_elapses() {
    let mut map = CooldownMap::new(TimeDelta::seconds(5), 16);
    assert!(map.try_fire("a", at(0)));
    assert!(!map.try_fire("a", at(3)));
    assert!(map.try_fire("b", at(3)));
    assert!(map.try_fire("a", at(5)));
    assert!(!map.try_fire("a", at(9)));
  }

  #[test]
  fn capacity_evicts_least_recent_key() {
    let mut map = CooldownMap::new(TimeDelta::seconds(5), 2);
    assert!(map.try_fire(1, at(0)));
    assert!(map.try_fire(2, at(1)));
    assert!(map.try_fire(3, at(2)));
    assert_eq!(map.len(), 2);
    assert!(map.is_ready(&1, at(2)));
    assert!(!map.is_ready(&2, at(2)));
  }

  #[test]
  fn stale_entries_are_swept() {
    let mut map = CooldownMap::new(TimeDelta::seconds(5), 16);
    assert!(map.try_fire(1, at(0)));
    assert!(map.try_fire(2, at(19)));
    assert_eq!(map.len(), 2);
    assert!(map.try_fire(3, at(25)));
    assert_eq!(map.len(), 2);
    assert!(!map.is_ready(&2, at(23)));
  }

  #[test]
  fn elapsed_never_goes_negative() {
    assert_eq!(elapsed_secs(at(5), at(3)), 0.0);
    assert_eq!(elapsed_secs(at(0), at(3)), 3.0);
  }

  #[test]
  fn stop_signal_wakes_waiters() {
    let signal = Arc::new(StopSignal::new());
    let waiter = {
      let signal = signal.clone();
      std::thread::spawn(move || {
        let started = Instant::now();
        let stopped = signal.wait(Duration::from_secs(10));
        (stopped, started.elapsed())
      })
    };
    std::thread::sleep(Duration::from_millis(20));
    signal.stop();
    let (stopped, waited) = waiter.join().unwrap();
    assert!(stopped);
    assert!(waited < Duration::from_secs(5));
    assert!(signal.wait(Duration::from_secs(10)));
  }
}
