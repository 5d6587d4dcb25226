//! Queue configuration.
//!
//! All durations are written in milliseconds when the config comes from JSON:
//!
//! ```json
//! { "capacity": 128, "concurrency": { "bounded": 4 }, "throttle_delay_ms": 500 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// How many tasks may execute at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    #[default]
    Unlimited,
    Bounded(usize),
}

/// TaskQueue の設定
///
/// 省略したフィールドは `Default` の値になる（throttle 3s / poll 1s / stop 10s / shutdown 5s）。
///
/// # 使用例
/// ```ignore
/// let config = QueueConfig {
///     throttle_delay: Duration::from_millis(200),
///     ..QueueConfig::bounded(3)
/// };
/// let queue = TaskQueue::new(config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Buffer capacity. `None` means unbounded.
    pub capacity: Option<usize>,

    /// 同時実行数の上限
    pub concurrency: Concurrency,

    /// How long a throttled task waits before it goes back into the buffer.
    #[serde(rename = "throttle_delay_ms", with = "millis")]
    pub throttle_delay: Duration,

    /// Upper bound on a single buffer poll, i.e. how often the loop re-checks for stop.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// How long `stop` waits for the dequeue loop to exit.
    #[serde(rename = "stop_timeout_ms", with = "millis")]
    pub stop_timeout: Duration,

    /// Grace period for in-flight tasks during `shutdown`.
    #[serde(rename = "shutdown_timeout_ms", with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            concurrency: Concurrency::Unlimited,
            throttle_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// 既定値に同時実行数 `limit` だけ指定した設定
    pub fn bounded(limit: usize) -> Self {
        Self {
            concurrency: Concurrency::Bounded(limit),
            ..Self::default()
        }
    }

    /// Fail fast on values that would make the queue unusable.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.capacity == Some(0) {
            return Err(QueueError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.concurrency == Concurrency::Bounded(0) {
            return Err(QueueError::InvalidConfig(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
