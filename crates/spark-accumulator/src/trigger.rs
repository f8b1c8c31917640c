use std::{fmt, time::Duration};

use tokio::{
    sync::Notify,
    time::{self, Instant, Interval, MissedTickBehavior},
};

/// 触发一次刷写的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlushCause {
    /// 缓冲长度达到 `max_size`。
    SizeThreshold,
    /// 后台计时器到期。
    Interval,
    /// `stop()` 或最后一个句柄被释放时的最终排空。
    Shutdown,
}

impl FlushCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushCause::SizeThreshold => "size",
            FlushCause::Interval => "interval",
            FlushCause::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `FlushTrigger` 汇聚所有刷写请求来源。
///
/// # 核心机制（How）
/// - 按量信号与关闭信号都基于 [`Notify::notify_one`]：分发器未在等待时会留下一个许可，
///   多个并发请求合并为一个，既不会丢失也不会重复排空；
/// - 定时信号由分发器自己持有的 [`Interval`] 产生，见 [`FlushTrigger::ticker`]；
/// - 三路信号在分发器的同一个 `select!` 中竞争，因此刷写天然串行。
#[derive(Debug, Default)]
pub(crate) struct FlushTrigger {
    size_reached: Notify,
    shutdown: Notify,
}

impl FlushTrigger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 生产者在追加后发现缓冲达到阈值时调用。
    pub(crate) fn request_size_flush(&self) {
        self.size_reached.notify_one();
    }

    /// 请求分发器执行最终排空并退出。
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub(crate) async fn size_reached(&self) {
        self.size_reached.notified().await;
    }

    pub(crate) async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    /// 构造周期计时器：首次触发在启动后一个周期，错过的触发顺延而不是补发。
    pub(crate) fn ticker(period: Duration) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}
