//! 调用上下文契约：取消与截止时间二元组。
//!
//! # 教案式导航
//! - **定位（Where）**：`add_sync`/`add_async` 的第一个参数，约束入队阶段与（同步路径的）等待结果阶段；
//! - **动机（Why）**：所有可能阻塞的累积器操作都必须可被外部打断，否则背压或慢刷写会把调用方永久挂起；
//! - **扩展（How）**：上下文按值廉价克隆（内部 `Arc`），可在多个生产者之间共享同一个取消令牌。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

/// 取消原语，统一表达累积器调用的可中断性。
///
/// # 逻辑解析（How）
/// - 内部以 [`AtomicBool`] 记录取消状态，[`Notify`] 负责唤醒正在 `cancelled().await` 的任务；
/// - `cancel` 仅在首次成功设置取消位时返回 `true`；
/// - `child` 返回共享同一状态的实例。
///
/// # 契约说明（What）
/// - **后置条件**：`cancel` 成功后 `is_cancelled` 全局可见，所有挂起在 [`Self::cancelled`] 上的任务都会被唤醒。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState::default()),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消。
    ///
    /// 返回值为 `true` 表示本次调用首次触发取消；返回 `false` 表示之前已被取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 派生共享同一取消状态的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 等待取消发生；若已取消则立即返回。
    pub async fn cancelled(&self) {
        loop {
            // 先注册等待者再检查标志，`notify_waiters` 对已创建的 `Notified` 立即生效。
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// 截止原语，描述操作的最迟完成时间。
///
/// - 基于 Tokio 单调时钟，测试中可配合 `tokio::time::pause` 推进；
/// - `Deadline::none()` 表示调用方未施加硬超时。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 创建未设置截止时间的实例。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 根据绝对时间点构造截止时间。
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 以当前时间加持续时间生成截止时间。
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// 返回内部时间点。
    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 判断是否已经超时。
    pub fn is_expired(&self) -> bool {
        match self.instant {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// 距离截止时间的剩余时长，未设置时返回 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        self.instant
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

/// 调用上下文，在累积器 API 之间传递取消与截止时间。
///
/// # 设计背景（Why）
/// - 入队可能因背压阻塞，同步调用还需等待批次刷写完成；两个阶段都需要统一的打断手段。
///
/// # 契约说明（What）
/// - 上下文在调用开始时已结束（取消或超时）时，累积器必须快速失败且不触碰缓冲；
/// - 同一上下文可被多个并发调用共享，取消会同时作用于全部调用。
///
/// # 风险提示（Trade-offs）
/// - 截止时间不会自动置位取消标记，两者在等待点上被并列竞争。
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

#[derive(Debug)]
struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContext {
    /// 创建上下文构建器。
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// 永不取消、无截止时间的上下文。
    pub fn background() -> Self {
        Self::builder().build()
    }

    /// 获取取消原语。
    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    /// 查询截止时间。
    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deadline = match self.deadline().remaining() {
            Some(remaining) => format!("{remaining:?}"),
            None => "none".to_string(),
        };
        write!(
            f,
            "CallContext{{cancelled={}, deadline={}}}",
            self.cancellation().is_cancelled(),
            deadline
        )
    }
}

/// `CallContext` 构建器。
#[derive(Default)]
pub struct CallContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContextBuilder {
    /// 设置取消原语。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 设置截止时间。
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 以相对超时设置截止时间。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    /// 生成不可变的调用上下文。
    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation,
                deadline: self.deadline,
            }),
        }
    }
}
