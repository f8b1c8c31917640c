use std::future::Future;

use crate::{contract::CallContext, error::AccumulatorError};

/// 若上下文已结束，返回对应错误；用于入队前的快速失败。
pub(crate) fn context_error(ctx: &CallContext) -> Option<AccumulatorError> {
    if ctx.cancellation().is_cancelled() {
        return Some(AccumulatorError::Cancelled);
    }
    if ctx.deadline().is_expired() {
        return Some(AccumulatorError::DeadlineExceeded);
    }
    None
}

/// 在保留取消/超时语义的前提下等待 Future 完成。
///
/// - 取消优先于截止时间，截止时间优先于 Future 本身（`biased`），保证上下文已结束时
///   不会“顺手”完成一次入队；
/// - Future 在失败分支中被直接丢弃，调用方负责保证丢弃是无副作用的。
pub(crate) async fn run_with_context<F>(
    ctx: &CallContext,
    future: F,
) -> Result<F::Output, AccumulatorError>
where
    F: Future,
{
    if let Some(err) = context_error(ctx) {
        return Err(err);
    }

    let cancel = ctx.cancellation().cancelled();
    tokio::pin!(cancel);
    tokio::pin!(future);

    if let Some(deadline) = ctx.deadline().instant() {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        tokio::select! {
            biased;
            _ = &mut cancel => Err(AccumulatorError::Cancelled),
            _ = &mut sleep => Err(AccumulatorError::DeadlineExceeded),
            output = &mut future => Ok(output),
        }
    } else {
        tokio::select! {
            biased;
            _ = &mut cancel => Err(AccumulatorError::Cancelled),
            output = &mut future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn expired_context_fails_before_polling() {
        let ctx = CallContext::background();
        ctx.cancellation().cancel();
        let result = run_with_context(&ctx, async { 1 }).await;
        assert!(matches!(result, Err(AccumulatorError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_future() {
        let ctx = CallContext::builder()
            .with_timeout(Duration::from_millis(5))
            .build();
        let result = run_with_context(&ctx, std::future::pending::<()>()).await;
        assert!(matches!(result, Err(AccumulatorError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn ready_future_passes_through() {
        let ctx = CallContext::background();
        let value = run_with_context(&ctx, async { 7 }).await.expect("不应失败");
        assert_eq!(value, 7);
    }
}
