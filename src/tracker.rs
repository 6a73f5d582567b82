// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/tracker.rs - 违规追踪器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 两类追踪器都把瞬时检测转换为违规记录，状态按摄像头分区。
//! 同一摄像头只能由一条流水线驱动（`&mut self`），不同摄像头之间互不影响。

mod gear;
mod proximity;

pub use self::gear::{GearObservation, SafetyGearTracker};
pub use self::proximity::ProximityTracker;
