use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{
    accumulator::Shared,
    error::{FlushError, HandlerPanic},
    event::{Envelope, Settlement},
    handler::FlushHandler,
    notifier::{self, FlushOutcome},
    trigger::{FlushCause, FlushTrigger},
};

/// `Dispatcher` 串行执行所有刷写。
///
/// # 模块角色（Why）
/// - 刷写回调可能使用无同步保护的状态，必须保证任意时刻至多一次调用在执行；
/// - 按量与定时两路请求可能几乎同时到达，需要合并或排队，但既不能丢弃也不能重叠。
///
/// # 核心机制（How）
/// - 每个累积器对应一个后台 Tokio 任务，独占持有 [`FlushHandler`]（`&mut` 访问）；
/// - 主循环在 `select!` 中等待“关闭 / 达到阈值 / 计时器到期”，每次醒来执行一次
///   `drain_and_reset` + 回调 + 结果交付，完成后才回到 `select!`，因此刷写天然串行；
/// - 收到关闭请求后先丢弃计时器，再执行恰好一次最终排空，然后退出。
///
/// # 契约说明（What）
/// - 空批次不调用回调；
/// - 回调返回错误或 panic 时，错误交付给该批次的同步调用方，分发器继续服务后续批次；
/// - 批次占用的背压许可在结果交付后归还。
pub(crate) struct Dispatcher<T, H> {
    shared: Arc<Shared<T>>,
    handler: H,
    flush_interval: Duration,
}

impl<T, H> Dispatcher<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T>,
{
    pub(crate) fn new(shared: Arc<Shared<T>>, handler: H, flush_interval: Duration) -> Self {
        Self {
            shared,
            handler,
            flush_interval,
        }
    }

    /// 分发器主循环，直到收到关闭请求并完成最终排空。
    pub(crate) async fn run(mut self) {
        let mut ticker = FlushTrigger::ticker(self.flush_interval);
        loop {
            let cause = tokio::select! {
                biased;
                _ = self.shared.trigger.shutdown_requested() => break,
                _ = self.shared.trigger.size_reached() => FlushCause::SizeThreshold,
                _ = ticker.tick() => FlushCause::Interval,
            };
            self.flush_once(cause).await;
        }

        // 计时器必须先于最终排空停止，避免与关闭排空竞争出一次多余的刷写。
        drop(ticker);
        self.flush_once(FlushCause::Shutdown).await;
        debug!(
            remaining = self.shared.buffer.len(),
            "accumulator dispatcher exited"
        );
    }

    /// 执行一次排空与刷写；缓冲为空时不调用回调。
    async fn flush_once(&mut self, cause: FlushCause) {
        let envelopes = self.shared.buffer.drain_and_reset();
        if envelopes.is_empty() {
            trace!(cause = %cause, "flush requested on empty buffer");
            return;
        }

        let (batch, settlements): (Vec<T>, Vec<Settlement>) =
            envelopes.into_iter().map(Envelope::into_parts).unzip();
        let batch_size = batch.len();
        let started = Instant::now();

        let outcome = self.invoke(batch).await;
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        self.shared
            .stats
            .record_flush(cause, batch_size, outcome.is_err());
        let delivery = notifier::deliver(settlements, &outcome);

        match &outcome {
            Ok(()) => debug!(
                cause = %cause,
                batch_size,
                elapsed_us,
                notified = delivery.notified,
                abandoned = delivery.abandoned,
                "accumulator batch flushed"
            ),
            Err(error) => warn!(
                cause = %cause,
                batch_size,
                elapsed_us,
                notified = delivery.notified,
                abandoned = delivery.abandoned,
                error = %error,
                "accumulator flush handler failed"
            ),
        }
    }

    /// 调用刷写回调并把 panic 转换为 [`HandlerPanic`]。
    ///
    /// 构造回调 future 本身也放在 `catch_unwind` 之内：手写实现可能在返回 future 之前就 panic。
    async fn invoke(&mut self, batch: Vec<T>) -> FlushOutcome {
        let handler = &mut self.handler;
        match AssertUnwindSafe(async move { handler.flush(batch).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(FlushError::new(error)),
            Err(payload) => Err(FlushError::new(HandlerPanic::from_payload(&*payload))),
        }
    }
}
