//! 运行统计计数器
//!
//! 所有计数器都是独立的原子变量，读取不需要与写入方同步，
//! 读到的是最终一致的快照（两个计数器之间可能短暂不一致）。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 上传任务计数器
#[derive(Debug, Default)]
pub struct Stats {
    /// 已调度（入队）的上传任务总数
    total_scheduled: AtomicU64,
    /// 正在执行的上传任务数
    in_flight: AtomicU64,
    /// 上传失败的任务总数
    total_failed: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_scheduled: u64,
    pub in_flight: u64,
    pub total_failed: u64,
}

impl StatsSnapshot {
    /// 成功上传的任务数
    pub fn succeeded(&self) -> u64 {
        self.total_scheduled
            .saturating_sub(self.total_failed)
            .saturating_sub(self.in_flight)
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 任务入队：已调度数和执行中数各加一
    pub(crate) fn increase_upload_jobs(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.total_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// 上传结束（成功或失败）：执行中数减一
    pub(crate) fn decrease_upload_jobs(&self) {
        // 不允许下溢
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// 已入队但未执行就被丢弃的任务：撤销入队时的两次计数
    pub(crate) fn revert_upload_job(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        let _ = self
            .total_scheduled
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    pub(crate) fn increase_failed_jobs(&self) {
        self.total_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// 开始新一轮运行前清零
    pub(crate) fn reset(&self) {
        self.total_scheduled.store(0, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
        self.total_failed.store(0, Ordering::SeqCst);
    }

    pub fn total_scheduled(&self) -> u64 {
        self.total_scheduled.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_scheduled: self.total_scheduled(),
            in_flight: self.in_flight(),
            total_failed: self.total_failed(),
        }
    }
}
