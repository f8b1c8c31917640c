#![doc = r#"
# spark-accumulator

## 设计动机（Why）
- **定位**：为高并发生产者提供批量事件累积器：条目先进入内存缓冲，
  在数量达到阈值或定时器到期时（先到者为准）整体交给用户提供的刷写回调。
- **架构角色**：位于业务写入路径与下游批量接口（数据库批量写、消息批量发送等）之间，
  以少量延迟换取吞吐；不负责持久化、跨进程协调或批次顺序。
- **写入语义**：`add_async` 入队即返回（发后即忘）；`add_sync` 等待所在批次刷写完成，
  并原样拿到回调返回的错误。

## 核心契约（What）
- **无丢失、无重复**：每个返回 `Ok` 的追加恰好出现在一个批次中；
- **互斥**：刷写回调由单个分发器任务独占持有，永不并发执行；
- **关闭拒绝**：`stop()` 之后的追加返回 [`AccumulatorError::Closed`]；
- **优雅排空**：`stop()` 在最终批次刷写并交付完结果后才返回；
- **可取消**：每次追加都接受 [`CallContext`]，入队与等待结果阶段均可被取消或超时打断。

## 实现策略（How）
- **缓冲**：`parking_lot::Mutex<Vec<_>>`，追加与“排空并重置”在同一把锁下完成；
- **触发**：按量信号与关闭信号基于 `tokio::sync::Notify`，定时信号基于 `tokio::time::Interval`，
  三者在分发器的同一个 `select!` 中竞争；
- **背压**：`tokio::sync::Semaphore` 限制“已缓冲 + 刷写中”的条目总数，许可随批次刷写完成归还；
- **结果回传**：同步条目携带 `oneshot` 通道，等待方放弃后发送立即失败，不阻塞分发器。

## 风险与考量（Trade-offs）
- 刷写期间生产者可以继续写入，单个批次可能大于 `max_size`（上限为 `pending_capacity`）；
- 异步写入看不到刷写失败，需要结合 [`AccumulatorStats`] 或回调自身的监控；
- 构造函数必须在 Tokio 运行时内调用。
"#]

mod accumulator;
mod buffer;
mod config;
mod contract;
mod dispatcher;
mod error;
mod event;
mod handler;
mod notifier;
mod stats;
mod trigger;
mod util;

pub use accumulator::Accumulator;
pub use config::AccumulatorConfig;
pub use contract::{CallContext, CallContextBuilder, Cancellation, Deadline};
pub use error::{AccumulatorError, BoxError, ConfigError, FlushError, HandlerPanic};
pub use handler::FlushHandler;
pub use notifier::FlushOutcome;
pub use stats::AccumulatorStats;
pub use trigger::FlushCause;

/// 常用类型的一次性导入入口。
pub mod prelude {
    pub use crate::{
        Accumulator, AccumulatorConfig, AccumulatorError, CallContext, Cancellation, Deadline,
        FlushHandler,
    };
}
