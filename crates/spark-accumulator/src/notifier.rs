//! 完成通知：把一次刷写的结果交付给批次内的同步调用方。
//!
//! - 同步条目经由各自的一次性通道恰好收到一次结果；
//! - 异步条目在入队时已经返回，不接收任何通知（发后即忘）；
//! - 等待方已放弃时发送立即失败，只计入 `abandoned`，不会阻塞分发器。

use crate::{error::FlushError, event::Settlement};

/// 一次刷写的结果：成功或回调返回的错误。
pub type FlushOutcome = Result<(), FlushError>;

/// 一次交付的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    /// 成功送达的同步调用方数量。
    pub(crate) notified: usize,
    /// 同步调用方已放弃等待（上下文结束）的数量。
    pub(crate) abandoned: usize,
}

/// 向批次内所有尚未完成的同步条目交付同一结果。
///
/// 消耗 `settlements`，返回时批次占用的背压许可随之归还。
pub(crate) fn deliver(settlements: Vec<Settlement>, outcome: &FlushOutcome) -> Delivery {
    let mut delivery = Delivery::default();
    for mut settlement in settlements {
        if !settlement.is_synchronous() || settlement.is_completed() {
            continue;
        }
        if settlement.complete(outcome.clone()) {
            delivery.notified += 1;
        } else {
            delivery.abandoned += 1;
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::event::Envelope;

    #[test]
    fn delivers_shared_error_to_every_sync_waiter() {
        let semaphore = Arc::new(Semaphore::new(3));
        let acquire = || {
            Arc::clone(&semaphore)
                .try_acquire_owned()
                .expect("测试信号量容量充足")
        };

        let (first, mut first_rx) = Envelope::synchronous(1, acquire());
        let (second, second_rx) = Envelope::synchronous(2, acquire());
        let background = Envelope::asynchronous(3, acquire());
        drop(second_rx);

        let settlements = vec![first, second, background]
            .into_iter()
            .map(|env| env.into_parts().1)
            .collect();
        let error = FlushError::new("sink unavailable");
        let delivery = deliver(settlements, &Err(error.clone()));

        assert_eq!(
            delivery,
            Delivery {
                notified: 1,
                abandoned: 1
            }
        );
        match first_rx.try_recv() {
            Ok(Err(received)) => assert!(received.ptr_eq(&error)),
            other => panic!("同步调用方应收到刷写错误，实际为 {other:?}"),
        }
        assert_eq!(semaphore.available_permits(), 3, "交付后许可全部归还");
    }
}
