//! TaskQueue - bounded-concurrency execution queue for I/O-bound tasks.
//!
//! ```text
//! producer -> put -> Buffer -> dequeue loop -> AdmissionGate -> Executor -> task.run()
//!                       ^                            |
//!                       +---- throttle_delay --------+   (no permit: defer)
//! ```
//!
//! The surface is deliberately small: enqueue (blocking / non-blocking /
//! bounded wait), a few buffer passthroughs, and `start` / `stop` / `shutdown`.
//! There is no peek, remove or iteration.
//!
//! Throttled tasks are deferred, not waited on: they go back to the tail of
//! the buffer after `throttle_delay`, so they lose their FIFO position.

mod dequeue;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use self::dequeue::{Shared, dequeue_loop};
use crate::buffer::Buffer;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::executor::Executor;
use crate::gate::AdmissionGate;
use crate::observability::{Counters, QueueStats};
use crate::task::TaskRef;

/// Handle on a running dequeue loop.
/// Dropping `shutdown_tx` also stops the loop.
struct DequeueHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// TaskQueue は I/O 待ちの多いタスクを並行度制限付きで実行するキュー
///
/// # 実装詳細
/// - `Buffer<TaskRef>` に溜めて、dequeue loop（tokio task 1 本）が取り出す
/// - 並行度は `AdmissionGate`。permit が取れないタスクは後回し（defer）
/// - 本体と callback は `Executor` の実行ユニットで動く
/// - `start` / `stop` / `shutdown` はどれも何度呼んでもよい
///
/// # 使用例
/// ```ignore
/// let queue = Arc::new(TaskQueue::with_limit(3)?);
/// queue.start()?;
/// queue.put(task_fn(|| async { fetch().await })).await;
/// let stats = queue.stats();
/// queue.shutdown().await;
/// ```
pub struct TaskQueue {
    shared: Arc<Shared>,
    dequeue: Mutex<Option<DequeueHandle>>,
}

impl TaskQueue {
    /// 設定を検証してから作る。まだ dequeue は始まらない
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    /// Unbounded buffer, no concurrency limit.
    pub fn unlimited() -> Self {
        Self::from_valid_config(QueueConfig::default())
    }

    /// Unbounded buffer, at most `limit` tasks running at once.
    pub fn with_limit(limit: usize) -> Result<Self, QueueError> {
        Self::new(QueueConfig::bounded(limit))
    }

    fn from_valid_config(config: QueueConfig) -> Self {
        let shared = Shared {
            buffer: Buffer::new(config.capacity),
            gate: AdmissionGate::new(config.concurrency),
            executor: Executor::new(),
            counters: Counters::default(),
            config,
        };
        Self {
            shared: Arc::new(shared),
            dequeue: Mutex::new(None),
        }
    }

    fn lock_dequeue(&self) -> MutexGuard<'_, Option<DequeueHandle>> {
        self.dequeue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 作成時の設定（変更不可）
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Begin dequeue processing. A second call while running is a no-op.
    ///
    /// Fails outside a tokio runtime, and after [`TaskQueue::shutdown`]
    /// (shutdown is terminal).
    pub fn start(&self) -> Result<(), QueueError> {
        let mut slot = self.lock_dequeue();
        if slot.is_some() {
            debug!("task queue already running");
            return Ok(());
        }
        if self.shared.executor.is_closed() {
            return Err(QueueError::ExecutorClosed);
        }
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = runtime.spawn(dequeue_loop(Arc::clone(&self.shared), shutdown_rx));
        *slot = Some(DequeueHandle { shutdown_tx, join });

        info!(
            limit = ?self.shared.gate.limit(),
            capacity = ?self.shared.config.capacity,
            "task queue started"
        );
        Ok(())
    }

    /// dequeue loop の handle を持っているか。`stop` 後は `false`
    pub fn is_running(&self) -> bool {
        self.lock_dequeue().is_some()
    }

    /// Stop dequeueing and wait up to `stop_timeout` for the loop to exit.
    ///
    /// In-flight tasks keep running. If the loop does not exit in time it is
    /// abandoned, not killed. Idempotent.
    pub async fn stop(&self) {
        let handle = { self.lock_dequeue().take() };
        let Some(handle) = handle else {
            return;
        };

        // receivers may already be gone
        let _ = handle.shutdown_tx.send(true);

        let timeout = self.shared.config.stop_timeout;
        match tokio::time::timeout(timeout, handle.join).await {
            Ok(Ok(())) => debug!("dequeue loop stopped"),
            Ok(Err(e)) => error!(error = %e, "dequeue loop terminated abnormally"),
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "dequeue loop did not stop in time, abandoning it"
            ),
        }
    }

    /// Stop dequeueing, then give in-flight work `shutdown_timeout` to finish
    /// before cancelling it. Pending tasks stay in the buffer. Idempotent.
    pub async fn shutdown(&self) {
        self.stop().await;

        let drained = self
            .shared
            .executor
            .shutdown(self.shared.config.shutdown_timeout)
            .await;
        info!(drained, pending = self.shared.buffer.len(), "task queue shut down");
    }

    /// Enqueue, waiting for space if the buffer is bounded and full.
    pub async fn put(&self, task: TaskRef) {
        self.shared.buffer.put(task).await;
    }

    /// Enqueue without waiting; the task comes back when the buffer is full.
    pub fn try_put(&self, task: TaskRef) -> Result<(), TaskRef> {
        self.shared.buffer.offer(task)
    }

    /// Enqueue without waiting. `false` when the buffer is full.
    pub fn offer(&self, task: TaskRef) -> bool {
        self.try_put(task).is_ok()
    }

    /// Enqueue, waiting at most `timeout` for space.
    pub async fn offer_timeout(&self, task: TaskRef, timeout: Duration) -> bool {
        self.shared.buffer.offer_timeout(task, timeout).await.is_ok()
    }

    /// Free buffer slots; `usize::MAX` when unbounded.
    pub fn remaining_capacity(&self) -> usize {
        self.shared.buffer.remaining_capacity()
    }

    /// Tasks waiting in the buffer (not the ones executing).
    pub fn len(&self) -> usize {
        self.shared.buffer.len()
    }

    /// 待ちタスクがないか（実行中のものは見ない）
    pub fn is_empty(&self) -> bool {
        self.shared.buffer.is_empty()
    }

    /// Remove pending tasks into `sink`, at most `max` when given.
    pub fn drain_to<E: Extend<TaskRef>>(&self, sink: &mut E, max: Option<usize>) -> usize {
        self.shared.buffer.drain_to(sink, max)
    }

    /// カウンタのスナップショット。ロックは取らない
    pub fn stats(&self) -> QueueStats {
        let counters = &self.shared.counters;
        QueueStats {
            running: self.is_running(),
            pending: self.shared.buffer.len(),
            in_flight: counters.in_flight(),
            permits_in_use: self.shared.gate.in_use(),
            dispatched: Counters::read(&counters.dispatched),
            deferred: Counters::read(&counters.deferred),
            succeeded: Counters::read(&counters.succeeded),
            failed: Counters::read(&counters.failed),
            taken_at: Utc::now(),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::unlimited()
    }
}
