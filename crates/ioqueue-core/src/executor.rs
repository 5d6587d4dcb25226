//! Executor - unbounded pool of lightweight execution units.
//!
//! One tokio task per unit. A `TaskTracker` knows what is still running so
//! shutdown can wait for it, and a `CancellationToken` is the hard-kill
//! fallback once the grace period runs out.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::QueueError;

/// Executor は軽量な実行ユニット（tokio task）の集まり
///
/// clone は同じ tracker / token を共有する。queue と `RetryConfig` の
/// callback_executor に同じものを渡してもよい。
///
/// # 使用例
/// ```ignore
/// let executor = Executor::new();
/// let handle = executor.spawn(async { fetch().await })?;
/// let drained = executor.shutdown(Duration::from_secs(5)).await;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Executor {
    /// 実行中ユニットの追跡（close 後は spawn を拒否する）
    tracker: TaskTracker,
    /// grace 切れのときに全ユニットを止める
    cancel: CancellationToken,
}

impl Executor {
    /// 新しい Executor を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` on its own execution unit.
    ///
    /// The handle resolves to `None` when the unit was force-terminated by
    /// [`Executor::shutdown`] before `fut` completed.
    pub fn spawn<F>(&self, fut: F) -> Result<JoinHandle<Option<F::Output>>, QueueError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(QueueError::ExecutorClosed);
        }
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let cancel = self.cancel.clone();
        Ok(self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    out = fut => Some(out),
                }
            },
            &handle,
        ))
    }

    /// Units spawned and not yet finished.
    ///
    /// task 本体のほか watcher・throttle 待ち・callback のユニットも含む。
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// shutdown が始まっているか
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting work and wait up to `grace` for running units.
    ///
    /// # 実装
    /// 1. tracker を close（以降の spawn は `ExecutorClosed`）
    /// 2. `tracker.wait()` を `grace` まで待つ
    /// 3. 間に合わなければ token を cancel して強制終了
    ///
    /// Units still running after `grace` are cancelled. Returns `true` when
    /// everything drained on its own. Calling it again is harmless.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            debug!("executor drained");
            return true;
        }

        warn!(
            in_flight = self.tracker.len(),
            grace_ms = grace.as_millis() as u64,
            "executor did not drain in time, cancelling outstanding units"
        );
        self.cancel.cancel();
        false
    }
}
