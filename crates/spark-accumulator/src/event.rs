use tokio::sync::{OwnedSemaphorePermit, oneshot};

use crate::notifier::FlushOutcome;

/// 同步调用方等待刷写结果的接收端。
pub(crate) type CompletionReceiver = oneshot::Receiver<FlushOutcome>;

/// `Envelope` 将调用方的负载与结果回传所需的元数据打包在一起。
///
/// # 设计初衷（Why）
/// - 同步调用方需要在批次刷写完成后拿到回调结果，异步调用方则完全不关心；
///   两者在缓冲内以同一类型存放，差别仅在于是否携带结果接收端。
/// - 背压许可随条目一同流转，直到所在批次刷写结束才归还，使 `pending_capacity`
///   同时约束“已缓冲”与“刷写中”的条目。
///
/// # 契约说明（What）
/// - `payload` 入缓冲后不再被修改，只会在排空时整体移出；
/// - 结果最多交付一次（见 [`Settlement::complete`]）；
/// - 条目一旦被某次排空取走，缓冲不会再触碰它，因此不会出现在两个批次中。
#[derive(Debug)]
pub(crate) struct Envelope<T> {
    payload: T,
    settlement: Settlement,
}

impl<T> Envelope<T> {
    /// 构造异步条目：无结果接收端。
    pub(crate) fn asynchronous(payload: T, permit: OwnedSemaphorePermit) -> Self {
        Self {
            payload,
            settlement: Settlement {
                completed: false,
                sink: None,
                _permit: permit,
            },
        }
    }

    /// 构造同步条目，并返回与之配对的结果接收端。
    pub(crate) fn synchronous(
        payload: T,
        permit: OwnedSemaphorePermit,
    ) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        let envelope = Self {
            payload,
            settlement: Settlement {
                completed: false,
                sink: Some(tx),
                _permit: permit,
            },
        };
        (envelope, rx)
    }

    /// 拆出负载；结算部分留给分发器在刷写结束后处理。
    pub(crate) fn into_parts(self) -> (T, Settlement) {
        (self.payload, self.settlement)
    }
}

/// 负载被移交给刷写回调之后，条目剩余的结算部分。
///
/// - `sink` 仅同步条目存在，`completed` 守护“恰好交付一次”；
/// - 持有背压许可，丢弃时归还容量。
///
/// # 风险提示（Trade-offs）
/// - 等待方放弃（上下文结束）后接收端被丢弃，此时交付退化为一次立即失败的 `send`，
///   不会阻塞分发器，也不会泄漏任务。
#[derive(Debug)]
pub(crate) struct Settlement {
    completed: bool,
    sink: Option<oneshot::Sender<FlushOutcome>>,
    _permit: OwnedSemaphorePermit,
}

impl Settlement {
    pub(crate) fn is_synchronous(&self) -> bool {
        self.sink.is_some() || self.completed
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    /// 交付刷写结果。
    ///
    /// 返回 `true` 表示等待方成功收到结果；异步条目、重复交付或等待方已放弃时返回 `false`。
    pub(crate) fn complete(&mut self, outcome: FlushOutcome) -> bool {
        if self.completed {
            return false;
        }
        let Some(sink) = self.sink.take() else {
            return false;
        };
        self.completed = true;
        sink.send(outcome).is_ok()
    }
}
