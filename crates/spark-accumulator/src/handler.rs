use std::future::Future;

use async_trait::async_trait;

use crate::error::BoxError;

/// 用户提供的批量刷写逻辑。
///
/// # 设计初衷（Why）
/// - 累积器只负责“何时”把“哪些”条目交出去，真正的副作用（写库、发消息、落盘）由调用方决定；
/// - 以 `&mut self` 接收批次：分发器独占持有处理器，编译期即可保证回调永不并发执行，
///   实现者可以放心使用无同步保护的内部状态。
///
/// # 契约说明（What）
/// - 每次被触发且缓冲非空时调用恰好一次，`batch` 为上次排空以来追加的全部条目，顺序不作保证；
/// - 返回的错误会原样交付给该批次内的同步调用方；累积器不会重试，也不会因此停止；
/// - 回调可以任意慢，`stop()` 会等待正在执行的回调结束。
///
/// # 使用方式（How）
/// - 对闭包提供了通用实现：任何 `FnMut(Vec<T>) -> impl Future<Output = Result<(), E>>`
///   （`E: Into<BoxError>`）都可直接作为处理器；
/// - 需要持有可变状态或实现更复杂逻辑时，为自定义类型实现本 trait。
#[async_trait]
pub trait FlushHandler<T>: Send + 'static
where
    T: Send + 'static,
{
    /// 刷写一个批次。
    async fn flush(&mut self, batch: Vec<T>) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> FlushHandler<T> for F
where
    T: Send + 'static,
    F: FnMut(Vec<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn flush(&mut self, batch: Vec<T>) -> Result<(), BoxError> {
        (self)(batch).await.map_err(Into::into)
    }
}
