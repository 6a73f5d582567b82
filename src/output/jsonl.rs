// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output/jsonl.rs - JSON Lines 告警台账
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 只追加的 JSON Lines 台账。
//!
//! 每行一个事件：`recorded` 携带完整记录，`resolved` 只携带编号。
//! 重新打开时按顺序重放全部事件，恢复编号和处理状态。

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::output::{AlertSink, RecordId, SinkError, StoredViolation, ViolationQuery};
use crate::record::{ViolationRecord, ViolationStatus};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LedgerEvent {
  Recorded(StoredViolation),
  Resolved { id: RecordId, at: DateTime<Utc> },
}

struct Ledger {
  file: File,
  entries: Vec<StoredViolation>,
  index: HashMap<RecordId, usize>,
  next_id: u64,
  /// 文件末尾是未写完的半行，下次追加前先补换行
  torn: bool,
}

impl Ledger {
  fn append(&mut self, event: &LedgerEvent) -> Result<(), SinkError> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    if self.torn {
      line.insert(0, '\n');
    }

    let committed = self.file.metadata()?.len();
    let written = self
      .file
      .write_all(line.as_bytes())
      .and_then(|_| self.file.flush());
    if let Err(e) = written {
      // 截回写入前的长度；截断也失败时由下一次写入隔开半行
      if let Err(truncate) = self.file.set_len(committed) {
        warn!("台账写入失败后无法回退: {}", truncate);
        self.torn = true;
      }
      return Err(e.into());
    }

    self.torn = false;
    Ok(())
  }

  fn apply(&mut self, event: LedgerEvent) {
    match event {
      LedgerEvent::Recorded(stored) => {
        self.next_id = self.next_id.max(stored.id.0 + 1);
        self.index.insert(stored.id, self.entries.len());
        self.entries.push(stored);
      }
      LedgerEvent::Resolved { id, .. } => {
        if let Some(&position) = self.index.get(&id) {
          self.entries[position].record.status = ViolationStatus::Resolved;
        }
      }
    }
  }
}

fn ends_mid_line(path: &Path) -> io::Result<bool> {
  let mut file = File::open(path)?;
  if file.metadata()?.len() == 0 {
    return Ok(false);
  }
  file.seek(SeekFrom::End(-1))?;
  let mut last = [0u8; 1];
  file.read_exact(&mut last)?;
  Ok(last[0] != b'\n')
}

pub struct JsonLinesSink {
  path: PathBuf,
  ledger: Mutex<Ledger>,
}

impl JsonLinesSink {
  /// 打开（必要时创建）台账文件并重放已有事件
  pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)?;

    let mut ledger = Ledger {
      file,
      entries: Vec::new(),
      index: HashMap::new(),
      next_id: 1,
      torn: ends_mid_line(&path)?,
    };

    let reader = BufReader::new(File::open(&path)?);
    for (number, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<LedgerEvent>(&line) {
        Ok(event) => ledger.apply(event),
        Err(e) => warn!("台账 {} 第 {} 行无法解析，已跳过: {}", path.display(), number + 1, e),
      }
    }

    info!(
      "打开告警台账 {}，已有 {} 条记录",
      path.display(),
      ledger.entries.len()
    );

    Ok(Self {
      path,
      ledger: Mutex::new(ledger),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn ledger(&self) -> MutexGuard<'_, Ledger> {
    self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl FromUrlWithScheme for JsonLinesSink {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesSink {
  type Error = SinkError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl AlertSink for JsonLinesSink {
  fn record(&self, record: &ViolationRecord) -> Result<RecordId, SinkError> {
    let mut ledger = self.ledger();
    let stored = StoredViolation {
      id: RecordId(ledger.next_id),
      record: record.clone(),
    };
    let event = LedgerEvent::Recorded(stored);
    // 先落盘再更新内存，写入失败时编号不前进
    ledger.append(&event)?;
    let id = RecordId(ledger.next_id);
    ledger.apply(event);
    Ok(id)
  }

  fn mark_resolved(&self, id: RecordId) -> Result<bool, SinkError> {
    let mut ledger = self.ledger();
    if !ledger.index.contains_key(&id) {
      return Ok(false);
    }
    let event = LedgerEvent::Resolved { id, at: Utc::now() };
    ledger.append(&event)?;
    ledger.apply(event);
    Ok(true)
  }

  fn query(&self, query: &ViolationQuery) -> Result<Vec<StoredViolation>, SinkError> {
    Ok(query.apply(self.ledger().entries.iter()))
  }

  /// 截断台账文件。编号继续递增，不与清空前的记录重复
  fn clear(&self) -> Result<usize, SinkError> {
    let mut ledger = self.ledger();
    ledger.file.set_len(0)?;
    ledger.torn = false;
    let cleared = ledger.entries.len();
    ledger.entries.clear();
    ledger.index.clear();
    info!("已清空告警台账 {}，共 {} 条", self.path.display(), cleared);
    Ok(cleared)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{CameraId, MachineId, WorkerId};

  fn ledger_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
      "shaobing-ledger-{}-{}.jsonl",
      name,
      std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
  }

  fn record() -> ViolationRecord {
    ViolationRecord::proximity(
      WorkerId::new(CameraId(3), 1),
      MachineId::new(CameraId(3), 0),
      42.0,
      Utc::now(),
    )
    .with_screenshot(Some("proximity/x.jpg".into()))
  }

  #[test]
  fn reopened_ledger_keeps_ids_and_status() {
    let path = ledger_path("reopen");
    {
      let sink = JsonLinesSink::open(&path).unwrap();
      let first = sink.record(&record()).unwrap();
      let second = sink.record(&record()).unwrap();
      assert_eq!((first, second), (RecordId(1), RecordId(2)));
      assert!(sink.mark_resolved(first).unwrap());
      assert!(!sink.mark_resolved(RecordId(9)).unwrap());
    }

    let sink = JsonLinesSink::open(&path).unwrap();
    let all = sink.query(&ViolationQuery::default()).unwrap();
    assert_eq!(all.len(), 2);
    let first = all.iter().find(|s| s.id == RecordId(1)).unwrap();
    assert_eq!(first.record.status, ViolationStatus::Resolved);
    assert_eq!(first.record.screenshot.as_deref(), Some("proximity/x.jpg"));
    assert_eq!(first.record.worker_id, WorkerId::new(CameraId(3), 1));
    assert_eq!(sink.record(&record()).unwrap(), RecordId(3));

    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn corrupt_lines_are_skipped() {
    let path = ledger_path("corrupt");
    {
      let sink = JsonLinesSink::open(&path).unwrap();
      sink.record(&record()).unwrap();
    }
    {
      let mut file = OpenOptions::new().append(true).open(&path).unwrap();
      writeln!(file, "{{\"event\":\"recorded\",").unwrap();
    }

    let sink = JsonLinesSink::open(&path).unwrap();
    assert_eq!(sink.query(&ViolationQuery::default()).unwrap().len(), 1);
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn clear_truncates_the_ledger() {
    let path = ledger_path("clear");
    let sink = JsonLinesSink::open(&path).unwrap();
    sink.record(&record()).unwrap();
    assert_eq!(sink.clear().unwrap(), 1);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(sink.record(&record()).unwrap(), RecordId(2));
    drop(sink);

    let sink = JsonLinesSink::open(&path).unwrap();
    assert_eq!(sink.query(&ViolationQuery::default()).unwrap().len(), 1);
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn record_after_torn_line_survives_reopen() {
    let path = ledger_path("torn");
    {
      let sink = JsonLinesSink::open(&path).unwrap();
      sink.record(&record()).unwrap();
    }
    {
      // 写入中断留下没有换行的半行
      let mut file = OpenOptions::new().append(true).open(&path).unwrap();
      write!(file, "{{\"event\":\"recorded\",\"id\":").unwrap();
    }

    {
      let sink = JsonLinesSink::open(&path).unwrap();
      assert_eq!(sink.record(&record()).unwrap(), RecordId(2));
    }

    let sink = JsonLinesSink::open(&path).unwrap();
    let ids: Vec<_> = sink
      .query(&ViolationQuery::default())
      .unwrap()
      .iter()
      .map(|s| s.id)
      .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&RecordId(2)));
    let _ = std::fs::remove_file(path);
  }
}
