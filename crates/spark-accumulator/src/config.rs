//! 累积器配置。
//!
//! # 设计动机（Why）
//! - 把“按量阈值”“定时周期”“背压上限”三项参数集中为一个可序列化结构，
//!   宿主可以直接嵌入自身的 TOML/JSON 配置文件；
//! - 构造前统一校验，运行期不再出现配置类错误。
//!
//! # 序列化约定（What）
//! - `flush_interval` 以毫秒整数 `flush_interval_ms` 出现在配置文件中，
//!   非整毫秒的周期在校验与序列化时都会被拒绝，不做截断；
//! - `pending_capacity` 可省略，省略时取 `max_size * 2`。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ConfigError;

/// 累积器的运行参数。
///
/// # 契约说明（What）
/// - `max_size`：缓冲条目数达到该值时立即触发刷写，必须大于 0；
/// - `flush_interval`：后台计时器周期，必须大于 0；
/// - `pending_capacity`：已缓冲与正在刷写的条目总数上限；达到上限后 `add_*` 会在入队阶段阻塞，
///   直到某次刷写完成释放容量或调用上下文结束。必须不小于 `max_size`。
///
/// # 风险提示（Trade-offs）
/// - 刷写进行期间生产者仍可继续写入，因此单个批次可能大于 `max_size`，但不会超过 `pending_capacity`；
/// - `pending_capacity == max_size` 时，刷写期间所有生产者都会被阻塞，吞吐最低但内存最可预测。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccumulatorConfig {
    max_size: usize,
    #[serde(rename = "flush_interval_ms", with = "duration_ms")]
    flush_interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_capacity: Option<usize>,
}

impl AccumulatorConfig {
    /// 以按量阈值与定时周期创建配置，`pending_capacity` 取默认值。
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        Self {
            max_size,
            flush_interval,
            pending_capacity: None,
        }
    }

    /// 替换按量刷写阈值。
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// 替换定时刷写周期；须为整毫秒，否则 [`Self::validate`] 拒绝。
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// 显式设置背压上限。
    pub fn with_pending_capacity(mut self, pending_capacity: usize) -> Self {
        self.pending_capacity = Some(pending_capacity);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// 生效的背压上限（已应用默认值与上限裁剪）。
    pub fn pending_capacity(&self) -> usize {
        self.pending_capacity
            .unwrap_or_else(|| self.max_size.saturating_mul(2).min(Semaphore::MAX_PERMITS))
    }

    /// 校验配置。
    ///
    /// - **前置条件**：无；
    /// - **后置条件**：返回 `Ok(())` 时，累积器可以安全地以该配置启动。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if duration_ms::to_millis(self.flush_interval).is_none() {
            return Err(ConfigError::FlushIntervalNotWholeMillis {
                flush_interval: self.flush_interval,
            });
        }
        let pending_capacity = self.pending_capacity();
        if pending_capacity < self.max_size {
            return Err(ConfigError::PendingCapacityBelowMaxSize {
                pending_capacity,
                max_size: self.max_size,
            });
        }
        if pending_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::PendingCapacityTooLarge {
                pending_capacity,
                limit: Semaphore::MAX_PERMITS,
            });
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, ser::Error as _};

    /// 整毫秒且可用 `u64` 表示时返回毫秒数。
    pub(super) fn to_millis(value: Duration) -> Option<u64> {
        if value.subsec_nanos() % 1_000_000 != 0 {
            return None;
        }
        u64::try_from(value.as_millis()).ok()
    }

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = to_millis(*value).ok_or_else(|| {
            S::Error::custom(format!(
                "flush_interval {value:?} is not representable as whole milliseconds"
            ))
        })?;
        serializer.serialize_u64(millis)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
