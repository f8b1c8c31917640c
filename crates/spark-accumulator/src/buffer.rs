use std::{
    mem,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::event::Envelope;

/// 一次追加的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    /// 条目已缓冲，尚未达到按量阈值。
    Buffered,
    /// 条目已缓冲，且缓冲长度达到（或超过）阈值，调用方应请求立即刷写。
    ThresholdReached,
}

/// `PendingBuffer` 保存尚未刷写的条目。
///
/// # 核心机制（How）
/// - 单把 `parking_lot::Mutex` 同时覆盖 `append` 与 `drain_and_reset`，
///   两者不会交错：并发追加只能观察到排空之前或之后的状态，不会得到半个批次；
/// - 排空时以 `mem::replace` 交换出整块存储，并预留 `capacity` 的空间给下一批，
///   锁内只做指针交换，刷写回调在锁外执行。
///
/// # 契约说明（What）
/// - `append` 在锁内复查关闭标记：`stop()` 置位关闭后的最终排空一旦完成，任何追加都会被拒绝，
///   被拒绝的条目原样交还调用方；
/// - 任一条目至多出现在一次排空结果中。
pub(crate) struct PendingBuffer<T> {
    items: Mutex<Vec<Envelope<T>>>,
    capacity: usize,
}

impl<T> PendingBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// 追加一个条目。
    ///
    /// - `closed` 为累积器的关闭标记，在持锁期间读取；
    /// - 关闭时返回 `Err(envelope)`，条目未被缓冲。
    pub(crate) fn append(
        &self,
        envelope: Envelope<T>,
        closed: &AtomicBool,
    ) -> Result<AppendOutcome, Envelope<T>> {
        let mut items = self.items.lock();
        if closed.load(Ordering::Acquire) {
            return Err(envelope);
        }
        items.push(envelope);
        if items.len() >= self.capacity {
            Ok(AppendOutcome::ThresholdReached)
        } else {
            Ok(AppendOutcome::Buffered)
        }
    }

    /// 原子地取走当前全部条目并换上空存储。
    pub(crate) fn drain_and_reset(&self) -> Vec<Envelope<T>> {
        let mut items = self.items.lock();
        if items.is_empty() {
            return Vec::new();
        }
        mem::replace(&mut *items, Vec::with_capacity(self.capacity))
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;

    fn envelope(semaphore: &Arc<Semaphore>, value: u32) -> Envelope<u32> {
        let permit = Arc::clone(semaphore)
            .try_acquire_owned()
            .expect("测试信号量容量充足");
        Envelope::asynchronous(value, permit)
    }

    #[test]
    fn append_reports_threshold() {
        let semaphore = Arc::new(Semaphore::new(8));
        let closed = AtomicBool::new(false);
        let buffer = PendingBuffer::new(2);
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(
            buffer.append(envelope(&semaphore, 1), &closed).ok(),
            Some(AppendOutcome::Buffered)
        );
        assert_eq!(
            buffer.append(envelope(&semaphore, 2), &closed).ok(),
            Some(AppendOutcome::ThresholdReached)
        );
        assert_eq!(
            buffer.append(envelope(&semaphore, 3), &closed).ok(),
            Some(AppendOutcome::ThresholdReached),
            "超过阈值后继续追加仍应提示刷写"
        );
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn drain_moves_every_item_exactly_once() {
        let semaphore = Arc::new(Semaphore::new(8));
        let closed = AtomicBool::new(false);
        let buffer = PendingBuffer::new(4);
        for value in 0..3 {
            assert!(buffer.append(envelope(&semaphore, value), &closed).is_ok());
        }
        let first: Vec<u32> = buffer
            .drain_and_reset()
            .into_iter()
            .map(|env| env.into_parts().0)
            .collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.drain_and_reset().is_empty(), "第二次排空不得重复返回条目");
    }

    #[test]
    fn closed_buffer_hands_envelope_back() {
        let semaphore = Arc::new(Semaphore::new(1));
        let closed = AtomicBool::new(true);
        let buffer = PendingBuffer::new(4);
        let rejected = buffer
            .append(envelope(&semaphore, 9), &closed)
            .expect_err("关闭后必须拒绝追加");
        assert_eq!(rejected.into_parts().0, 9);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn concurrent_appends_and_drains_lose_nothing() {
        let semaphore = Arc::new(Semaphore::new(4 * 250));
        let closed = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(PendingBuffer::new(16));

        let producers: Vec<_> = (0..4u32)
            .map(|worker| {
                let semaphore = Arc::clone(&semaphore);
                let closed = Arc::clone(&closed);
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let env = envelope(&semaphore, worker * 1000 + i);
                        assert!(buffer.append(env, &closed).is_ok());
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while producers.iter().any(|handle| !handle.is_finished()) {
            drained.extend(buffer.drain_and_reset().into_iter().map(|e| e.into_parts().0));
        }
        for handle in producers {
            handle.join().expect("生产者线程不应 panic");
        }
        drained.extend(buffer.drain_and_reset().into_iter().map(|e| e.into_parts().0));

        assert_eq!(drained.len(), 1000);
        drained.sort_unstable();
        drained.dedup();
        assert_eq!(drained.len(), 1000, "每个条目恰好被排空一次");
    }
}
