use std::sync::atomic::{AtomicU64, Ordering};

use crate::trigger::FlushCause;

/// 累积器运行统计快照。
///
/// # 契约说明（What）
/// - 所有计数自累积器创建起单调递增；
/// - 快照由多个独立的原子读取组成，字段之间不保证同一时刻的一致性，适合指标上报，
///   不适合做精确的交叉断言（`stop()` 返回之后除外，此时分发器已退出）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    /// 成功调用刷写回调的批次数（含失败批次）。
    pub batches_flushed: u64,
    /// 交给刷写回调的条目总数。
    pub items_flushed: u64,
    /// 回调返回错误或 panic 的批次数。
    pub failed_batches: u64,
    /// 因达到阈值而触发的刷写次数（仅统计非空批次，下同）。
    pub size_triggered: u64,
    /// 因计时器到期而触发的刷写次数。
    pub interval_triggered: u64,
    /// 最终排空触发的刷写次数。
    pub shutdown_triggered: u64,
    /// 因累积器已关闭而被拒绝的 `add_*` 调用数。
    pub rejected_closed: u64,
    /// 因调用上下文结束而失败的 `add_*` 调用数。
    pub cancelled: u64,
}

impl AccumulatorStats {
    /// 按触发原因读取刷写次数。
    pub fn triggered_by(&self, cause: FlushCause) -> u64 {
        match cause {
            FlushCause::SizeThreshold => self.size_triggered,
            FlushCause::Interval => self.interval_triggered,
            FlushCause::Shutdown => self.shutdown_triggered,
        }
    }
}

/// 以松散原子计数维护统计。
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    batches_flushed: AtomicU64,
    items_flushed: AtomicU64,
    failed_batches: AtomicU64,
    size_triggered: AtomicU64,
    interval_triggered: AtomicU64,
    shutdown_triggered: AtomicU64,
    rejected_closed: AtomicU64,
    cancelled: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_flush(&self, cause: FlushCause, items: usize, failed: bool) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.items_flushed.fetch_add(items as u64, Ordering::Relaxed);
        if failed {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match cause {
            FlushCause::SizeThreshold => &self.size_triggered,
            FlushCause::Interval => &self.interval_triggered,
            FlushCause::Shutdown => &self.shutdown_triggered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AccumulatorStats {
        AccumulatorStats {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            size_triggered: self.size_triggered.load(Ordering::Relaxed),
            interval_triggered: self.interval_triggered.load(Ordering::Relaxed),
            shutdown_triggered: self.shutdown_triggered.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
