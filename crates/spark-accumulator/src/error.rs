//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义累积器对外暴露的错误语义：关闭拒绝、上下文取消/超时、刷写失败与配置非法；
//! - 为每个变体提供稳定错误码，便于宿主在日志、告警中按 `spark.accumulator.*` 维度聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 生态；
//! - 刷写失败以 [`FlushError`] 包装用户回调返回的原始错误，同一批次内的所有同步调用方
//!   观察到的是**同一个**错误实例（共享 `Arc`），可通过 [`FlushError::downcast_ref`] 还原具体类型；
//! - 错误永不在内部重试：失败仅向受影响的同步调用方报告一次。

use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// 用户刷写回调可返回的类型擦除错误。
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 刷写回调失败时交付给同步调用方的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：一个批次可能包含多个同步调用方，它们都需要拿到回调返回的“原样”错误；
///   通过 `Arc` 共享避免要求用户错误类型实现 `Clone`。
/// - **契约 (What)**：
///   - `Display` 直接转发内部错误文案，不追加前缀；
///   - [`StdError::source`] 返回内部错误本身，保证 `?` 链路上的错误溯源完整；
///   - [`Self::downcast_ref`] 可在测试或业务侧还原回调的具体错误类型。
/// - **风险 (Trade-offs)**：内部错误只读共享，调用方无法取得其所有权；若需要所有权，
///   应在回调内部自行记录。
#[derive(Clone)]
pub struct FlushError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl FlushError {
    /// 将回调错误包装为可共享的刷写错误。
    pub fn new(error: impl Into<BoxError>) -> Self {
        let boxed: BoxError = error.into();
        Self {
            inner: Arc::from(boxed),
        }
    }

    /// 尝试以具体类型访问原始错误。
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// 判断两个刷写错误是否来自同一次回调失败。
    pub fn ptr_eq(&self, other: &FlushError) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlushError").field(&self.inner).finish()
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for FlushError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

/// 刷写回调 panic 时，分发器以该错误代替回调结果交付给同步调用方。
///
/// - **意图 (Why)**：回调 panic 不应让等待中的同步调用方永久挂起，也不应终止分发器；
/// - **契约 (What)**：`message` 为 panic 负载中的文本（若负载不是字符串则为固定文案）。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("flush handler panicked: {message}")]
pub struct HandlerPanic {
    message: String,
}

impl HandlerPanic {
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 配置校验失败的原因。
///
/// - **意图 (Why)**：构造累积器前拒绝无意义的参数，避免后台任务在零间隔计时器上空转
///   或因阈值为 0 永远无法触发按量刷写。
/// - **契约 (What)**：仅在 [`AccumulatorConfig::validate`](crate::AccumulatorConfig::validate)
///   与构造函数中产生，运行期不会再出现。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// `max_size` 必须为正数。
    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    /// `flush_interval` 必须为正时长。
    #[error("flush_interval must be greater than zero")]
    ZeroFlushInterval,

    /// `flush_interval` 必须为整毫秒，配置文件以毫秒整数表示周期。
    #[error("flush_interval ({flush_interval:?}) must be a whole number of milliseconds")]
    FlushIntervalNotWholeMillis { flush_interval: Duration },

    /// 待处理容量不得小于按量刷写阈值，否则阈值永远无法达到。
    #[error("pending_capacity ({pending_capacity}) must not be smaller than max_size ({max_size})")]
    PendingCapacityBelowMaxSize {
        pending_capacity: usize,
        max_size: usize,
    },

    /// 待处理容量超出信号量可表示的上限。
    #[error("pending_capacity ({pending_capacity}) exceeds the supported maximum ({limit})")]
    PendingCapacityTooLarge { pending_capacity: usize, limit: usize },
}

/// 累积器错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“调用方可以处理”的错误（关闭、取消、超时）与“刷写回调”产生的业务错误，
///   让同步调用方根据变体决定是否重试或降级。
/// - **契约 (What)**：
///   - `Closed`：`stop()` 之后（或与其竞争失败）的 `add_*` 调用，条目从未进入缓冲；
///   - `Cancelled`/`DeadlineExceeded`：调用上下文在入队完成前（或同步等待结果前）结束；
///     入队阶段失败时条目不会出现在任何批次中；
///   - `Flush`：刷写回调返回的错误，原样交付给同一批次的同步调用方，异步调用方永远看不到；
///   - `Config`：构造阶段的参数校验失败。
/// - **设计权衡 (Trade-offs)**：上下文错误拆分为取消与超时两类，便于观测；若只关心
///   “上下文已结束”，使用 [`Self::is_context_error`]。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum AccumulatorError {
    #[error("accumulator is closed")]
    Closed,

    #[error("operation cancelled by call context")]
    Cancelled,

    #[error("call context deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Flush(#[from] FlushError),

    #[error("invalid accumulator configuration: {0}")]
    Config(#[from] ConfigError),
}

impl AccumulatorError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            AccumulatorError::Closed => "spark.accumulator.closed",
            AccumulatorError::Cancelled => "spark.accumulator.cancelled",
            AccumulatorError::DeadlineExceeded => "spark.accumulator.timeout",
            AccumulatorError::Flush(_) => "spark.accumulator.flush_failed",
            AccumulatorError::Config(_) => "spark.accumulator.invalid_config",
        }
    }

    /// 是否由调用上下文（取消或截止时间）导致。
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            AccumulatorError::Cancelled | AccumulatorError::DeadlineExceeded
        )
    }

    /// 若为刷写失败，返回对应的 [`FlushError`]。
    pub fn as_flush_error(&self) -> Option<&FlushError> {
        match self {
            AccumulatorError::Flush(err) => Some(err),
            _ => None,
        }
    }
}
