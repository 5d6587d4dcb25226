//! RetryableTask - a fallible operation with bounded re-attempts.
//!
//! The task itself never re-submits anything. It counts attempts, sleeps
//! between them and reports each outcome to its callback; the callback decides
//! whether the task goes back into a queue.
//!
//! ```text
//! queue -> run -> fails -> on_outcome(Failure) -> queue.put(task) -> ...
//! ```
//!
//! Once the attempt budget is spent further runs are no-ops and no callback
//! fires, so the loop above ends by itself. Such a run returns
//! [`TaskError::Exhausted`] so the queue does not count it as a success.

mod callback;
mod config;

pub use callback::{Outcome, RetryCallback};
pub use config::{DEFAULT_RETRY_DELAY, Operation, OperationFuture, RetryConfig};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::{SharedError, TaskError};
use crate::executor::Executor;
use crate::ids::TaskId;
use crate::task::Task;

/// 失敗したら callback 経由で再投入される、回数制限付きのタスク
///
/// # 実装
/// - 残り試行回数は `AtomicU32`。`fetch_update` + `checked_sub` で 0 未満にならない
/// - 初回だけ `retry_delay` を待たない（`AtomicBool` を swap）
/// - 結果は `callback_executor` 上で callback に渡す。dequeue loop では呼ばない
///
/// # 使用例
/// ```ignore
/// let task = RetryableTask::new(RetryConfig {
///     max_retries: 3,
///     callback: Some(Arc::new(Requeue(queue.clone()))),
///     ..RetryConfig::new(|| async { fetch().await })
/// });
/// queue.put(task).await;
/// ```
pub struct RetryableTask<V> {
    id: TaskId,
    operation: Operation<V>,
    attempts_remaining: AtomicU32,
    first_attempt: AtomicBool,
    retry_delay: Duration,
    callback: Option<Arc<dyn RetryCallback<V>>>,
    callback_executor: Executor,
}

impl<V: Send + 'static> RetryableTask<V> {
    /// 試行回数は `max_retries + 1` から始まる
    pub fn new(config: RetryConfig<V>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            operation: config.operation,
            attempts_remaining: AtomicU32::new(config.max_retries.saturating_add(1)),
            first_attempt: AtomicBool::new(true),
            retry_delay: config.retry_delay,
            callback: config.callback,
            callback_executor: config.callback_executor,
        })
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining.load(Ordering::SeqCst)
    }

    /// これ以上 run しても何も起きない
    pub fn is_exhausted(&self) -> bool {
        self.attempts_remaining() == 0
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Claim one attempt. `false` once the budget is spent.
    fn claim_attempt(&self) -> bool {
        self.attempts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn report(self: &Arc<Self>, outcome: Outcome<V>) {
        let Some(callback) = self.callback.clone() else {
            debug!(task_id = %self.id, success = outcome.is_success(), "no callback registered");
            return;
        };

        let task = Arc::clone(self);
        let spawned = self
            .callback_executor
            .spawn(async move { callback.on_outcome(task, outcome).await });
        if let Err(e) = spawned {
            warn!(task_id = %self.id, error = %e, "could not dispatch callback");
        }
    }
}

#[async_trait]
impl<V: Send + 'static> Task for RetryableTask<V> {
    fn id(&self) -> TaskId {
        self.id
    }

    async fn run(self: Arc<Self>) -> Result<(), TaskError> {
        if !self.claim_attempt() {
            trace!(task_id = %self.id, "attempts exhausted, skipping");
            return Err(TaskError::Exhausted);
        }

        // 初回だけは待たない
        if !self.first_attempt.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.retry_delay).await;
        }

        match (self.operation)().await {
            Ok(value) => {
                self.report(Outcome::Success(value));
                Ok(())
            }
            Err(e) => {
                let e: SharedError = Arc::from(e);
                debug!(
                    task_id = %self.id,
                    attempts_remaining = self.attempts_remaining(),
                    error = %e,
                    "attempt failed"
                );
                self.report(Outcome::Failure(Arc::clone(&e)));
                Err(TaskError::Operation(e))
            }
        }
    }
}

impl<V> fmt::Debug for RetryableTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableTask")
            .field("id", &self.id)
            .field("attempts_remaining", &self.attempts_remaining.load(Ordering::SeqCst))
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
