use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    buffer::{AppendOutcome, PendingBuffer},
    config::AccumulatorConfig,
    contract::CallContext,
    dispatcher::Dispatcher,
    error::AccumulatorError,
    event::Envelope,
    handler::FlushHandler,
    stats::{AccumulatorStats, StatsRecorder},
    trigger::FlushTrigger,
    util::run_with_context,
};

/// 生产者与分发器共享的状态。
pub(crate) struct Shared<T> {
    pub(crate) buffer: PendingBuffer<T>,
    pub(crate) trigger: FlushTrigger,
    pub(crate) stats: StatsRecorder,
    closed: AtomicBool,
    permits: Arc<Semaphore>,
}

impl<T> Shared<T> {
    fn new(config: &AccumulatorConfig) -> Self {
        Self {
            buffer: PendingBuffer::new(config.max_size()),
            trigger: FlushTrigger::new(),
            stats: StatsRecorder::default(),
            closed: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(config.pending_capacity())),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 关闭累积器：拒绝后续追加、唤醒阻塞在背压上的生产者、请求最终排空。
    ///
    /// 返回 `true` 表示本次调用完成了 open → closed 的转换。
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.permits.close();
        self.trigger.request_shutdown();
        true
    }
}

struct Handle<T> {
    shared: Arc<Shared<T>>,
    config: AccumulatorConfig,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        // 未显式 stop 时，分发器在后台完成最终排空后退出。
        self.shared.close();
    }
}

/// `Accumulator` 收集并发生产者的条目，并按数量或定时把批次交给刷写回调。
///
/// # 模块角色（Why）
/// - 把大量细粒度写入合并为批量写入，摊薄下游（数据库、消息队列、网络）的单次开销；
/// - 同时支持“发后即忘”与“等待刷写结果”两种写入语义。
///
/// # 核心机制（How）
/// - 生产者先在背压信号量上获取许可（受调用上下文约束），再在缓冲锁内追加条目；
///   追加使缓冲达到 `max_size` 时唤醒分发器立即刷写；
/// - 后台分发器任务同时等待定时器，周期性刷写未满的缓冲；
/// - 同步写入携带一次性结果通道，分发器在回调返回后把结果送回。
///
/// # 契约说明（What）
/// - **无丢失、无重复**：每个返回 `Ok` 的 `add_*` 条目恰好出现在一个批次中；
/// - **互斥**：刷写回调永不并发执行；
/// - **关闭拒绝**：`stop()` 开始后的 `add_*` 返回 [`AccumulatorError::Closed`]，条目不会被缓冲；
/// - **优雅排空**：`stop()` 返回前，所有已入队条目都已刷写，同步调用方都已收到结果。
///
/// # 设计权衡（Trade-offs）
/// - 批次内与批次间均不保证顺序；
/// - 异步写入看不到刷写失败，需要调用方通过回调自身或统计 [`AccumulatorStats::failed_batches`] 监控。
pub struct Accumulator<T> {
    inner: Arc<Handle<T>>,
}

impl<T> Clone for Accumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Accumulator<T>
where
    T: Send + 'static,
{
    /// 以按量阈值、定时周期与刷写回调创建累积器。
    ///
    /// # Panics
    /// 必须在 Tokio 运行时内调用（内部会派生分发器任务）。
    pub fn new<H>(
        max_size: usize,
        flush_interval: Duration,
        handler: H,
    ) -> Result<Self, AccumulatorError>
    where
        H: FlushHandler<T>,
    {
        Self::with_config(AccumulatorConfig::new(max_size, flush_interval), handler)
    }

    /// 以完整配置创建累积器。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：位于 Tokio 运行时上下文内；
    /// - **后置条件**：配置非法时返回 [`AccumulatorError::Config`] 且不会启动任何任务；
    ///   成功时分发器已在后台运行，首次定时刷写在一个周期之后。
    ///
    /// # Panics
    /// 必须在 Tokio 运行时内调用。
    pub fn with_config<H>(config: AccumulatorConfig, handler: H) -> Result<Self, AccumulatorError>
    where
        H: FlushHandler<T>,
    {
        config.validate()?;

        let shared = Arc::new(Shared::new(&config));
        let dispatcher = Dispatcher::new(Arc::clone(&shared), handler, config.flush_interval());
        let worker = tokio::spawn(dispatcher.run());

        let flush_interval_ms =
            u64::try_from(config.flush_interval().as_millis()).unwrap_or(u64::MAX);
        info!(
            max_size = shared.buffer.capacity(),
            flush_interval_ms,
            pending_capacity = config.pending_capacity(),
            "accumulator started"
        );

        Ok(Self {
            inner: Arc::new(Handle {
                shared,
                config,
                worker: AsyncMutex::new(Some(worker)),
            }),
        })
    }

    /// 异步追加：入队成功即返回，不等待也不报告刷写结果。
    ///
    /// # 契约说明（What）
    /// - 已关闭：立即返回 [`AccumulatorError::Closed`]；
    /// - 上下文已结束：立即返回取消/超时错误，缓冲不受影响；
    /// - 背压：待处理条目达到 `pending_capacity` 时阻塞，直到刷写释放容量或上下文结束。
    pub async fn add_async(&self, ctx: &CallContext, item: T) -> Result<(), AccumulatorError> {
        let permit = self.admit(ctx).await?;
        self.enqueue(Envelope::asynchronous(item, permit))
    }

    /// 同步追加：等待包含该条目的批次刷写完成，并返回回调的结果。
    ///
    /// # 契约说明（What）
    /// - 入队阶段的行为与 [`Self::add_async`] 一致；
    /// - 入队后等待结果，期间上下文结束则返回取消/超时错误；此时条目已在缓冲中，
    ///   仍会随所在批次被刷写，只是结果不再送达；
    /// - 回调失败时返回 [`AccumulatorError::Flush`]，内含回调原始错误。
    pub async fn add_sync(&self, ctx: &CallContext, item: T) -> Result<(), AccumulatorError> {
        let permit = self.admit(ctx).await?;
        let (envelope, receiver) = Envelope::synchronous(item, permit);
        self.enqueue(envelope)?;

        match run_with_context(ctx, receiver).await {
            Ok(Ok(outcome)) => outcome.map_err(AccumulatorError::from),
            // 分发器在交付前退出（运行时关闭），条目结果已无法获知。
            Ok(Err(_)) => Err(AccumulatorError::Closed),
            Err(err) => {
                self.inner.shared.stats.record_cancelled();
                Err(err)
            }
        }
    }

    /// 关闭累积器并等待最终排空完成。
    ///
    /// # 契约说明（What）
    /// - 置位关闭标记、停止计时器、排空并刷写剩余条目、向其中的同步调用方交付结果后返回；
    /// - 可重复调用：并发或后续调用会等待首次关闭完成后返回；
    /// - 与 `stop()` 并发的追加要么进入最终批次，要么收到 [`AccumulatorError::Closed`]。
    pub async fn stop(&self) {
        let initiated = self.inner.shared.close();
        let mut worker = self.inner.worker.lock().await;
        let Some(handle) = worker.take() else {
            return;
        };
        if let Err(err) = handle.await {
            warn!(error = %err, "accumulator dispatcher terminated abnormally");
        }
        let stats = self.inner.shared.stats.snapshot();
        info!(
            initiated,
            batches_flushed = stats.batches_flushed,
            items_flushed = stats.items_flushed,
            failed_batches = stats.failed_batches,
            "accumulator stopped"
        );
    }

    async fn admit(&self, ctx: &CallContext) -> Result<OwnedSemaphorePermit, AccumulatorError> {
        let shared = &self.inner.shared;
        if shared.is_closed() {
            shared.stats.record_rejected();
            return Err(AccumulatorError::Closed);
        }

        let acquire = Arc::clone(&shared.permits).acquire_owned();
        match run_with_context(ctx, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => {
                shared.stats.record_rejected();
                Err(AccumulatorError::Closed)
            }
            Err(err) => {
                shared.stats.record_cancelled();
                Err(err)
            }
        }
    }

    fn enqueue(&self, envelope: Envelope<T>) -> Result<(), AccumulatorError> {
        let shared = &self.inner.shared;
        match shared.buffer.append(envelope, &shared.closed) {
            Ok(AppendOutcome::Buffered) => Ok(()),
            Ok(AppendOutcome::ThresholdReached) => {
                shared.trigger.request_size_flush();
                Ok(())
            }
            Err(_rejected) => {
                shared.stats.record_rejected();
                Err(AccumulatorError::Closed)
            }
        }
    }
}

impl<T> Accumulator<T> {
    /// 是否已开始关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// 当前缓冲中等待下一次刷写的条目数（不含正在刷写的批次）。
    pub fn pending(&self) -> usize {
        self.inner.shared.buffer.len()
    }

    /// 生效的配置。
    pub fn config(&self) -> &AccumulatorConfig {
        &self.inner.config
    }

    /// 运行统计快照。
    pub fn stats(&self) -> AccumulatorStats {
        self.inner.shared.stats.snapshot()
    }
}

impl<T> fmt::Debug for Accumulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::BoxError;

    fn counting_handler(
        counter: Arc<AtomicUsize>,
    ) -> impl FnMut(Vec<u32>) -> std::future::Ready<Result<(), BoxError>> + Send + 'static {
        move |batch: Vec<u32>| {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn new_rejects_invalid_configuration() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = Accumulator::<u32>::new(0, Duration::from_millis(1), counting_handler(counter));
        assert!(matches!(result, Err(AccumulatorError::Config(_))));
    }

    #[tokio::test]
    async fn stop_flushes_items_below_threshold() {
        let counter = Arc::new(AtomicUsize::new(0));
        let accumulator = Accumulator::<u32>::new(
            10,
            Duration::from_secs(3600),
            counting_handler(Arc::clone(&counter)),
        )
        .expect("配置合法");

        let ctx = CallContext::background();
        for value in 0..3 {
            accumulator.add_async(&ctx, value).await.expect("入队成功");
        }
        assert_eq!(accumulator.pending(), 3);

        accumulator.stop().await;
        assert!(accumulator.is_closed());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(accumulator.stats().shutdown_triggered, 1);
    }

    #[tokio::test]
    async fn dropping_last_handle_drains_in_background() {
        let counter = Arc::new(AtomicUsize::new(0));
        let accumulator = Accumulator::<u32>::new(
            10,
            Duration::from_secs(3600),
            counting_handler(Arc::clone(&counter)),
        )
        .expect("配置合法");
        let ctx = CallContext::background();
        accumulator.add_async(&ctx, 1).await.expect("入队成功");
        drop(accumulator);

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("后台排空应在释放句柄后完成");
    }
}
