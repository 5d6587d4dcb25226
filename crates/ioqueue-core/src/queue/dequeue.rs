//! Dequeue loop and dispatch.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Buffer;
use crate::config::QueueConfig;
use crate::error::{QueueError, TaskError};
use crate::executor::Executor;
use crate::gate::AdmissionGate;
use crate::observability::Counters;
use crate::task::TaskRef;

/// State shared by the queue handle, the dequeue loop and every execution unit.
pub(crate) struct Shared {
    pub buffer: Buffer<TaskRef>,
    pub gate: AdmissionGate,
    pub executor: Executor,
    pub counters: Counters,
    pub config: QueueConfig,
}

/// Moves tasks from the buffer to the executor until told to stop.
///
/// Stop is observed at the top of every iteration and while waiting on the
/// buffer. A failed dispatch is logged, the task goes back to the buffer and
/// the loop keeps going. The one exception is a closed executor: nothing can
/// run any more, so the loop exits instead of spinning on the same task.
pub(crate) async fn dequeue_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!("dequeue loop running");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // poll は timeout 付きなので、shutdown と競合させても取りこぼしはない
        let task = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped together with the queue handle
                    break;
                }
                continue;
            }
            task = shared.buffer.poll(shared.config.poll_interval) => task,
        };

        let Some(task) = task else {
            continue;
        };

        if let Err(Undispatched { task, error }) = dispatch(&shared, task) {
            let task_id = task.id();
            let closed = matches!(error, QueueError::ExecutorClosed);

            // 取り出したタスクは捨てずに buffer に戻す
            match shared.buffer.offer(task) {
                Ok(()) => {
                    error!(%task_id, %error, "failed to dispatch task, returned it to the buffer");
                }
                Err(_) => {
                    error!(%task_id, %error, "failed to dispatch task and the buffer is full, dropping it");
                }
            }

            // 実行コンテキストが閉じた後は何も dispatch できない
            if closed {
                break;
            }
        }
    }

    info!("dequeue loop exited");
}

/// A task [`dispatch`] could not hand to the executor, given back to the caller.
pub(crate) struct Undispatched {
    pub task: TaskRef,
    pub error: QueueError,
}

impl fmt::Debug for Undispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Undispatched")
            .field("task_id", &self.task.id())
            .field("error", &self.error)
            .finish()
    }
}

/// Admit-or-defer for a single task. Never blocks the caller.
///
/// # 実装
/// 1. gate から permit を取る（取れなければ `throttle_delay` 後に buffer へ戻すユニットを spawn）
/// 2. permit と in-flight guard を持ったまま本体を実行するユニットを spawn
/// 3. 本体の結果（panic 含む）を watcher ユニットで集計する
///
/// spawn に失敗したときはタスクを [`Undispatched`] で返す。
pub(crate) fn dispatch(shared: &Arc<Shared>, task: TaskRef) -> Result<(), Undispatched> {
    let task_id = task.id();
    // spawn 失敗時は future ごと task が drop されるので、返す用に 1 つ持っておく
    let spare = Arc::clone(&task);

    let Some(admission) = shared.gate.try_admit() else {
        let delay = shared.config.throttle_delay;
        debug!(
            %task_id,
            limit = ?shared.gate.limit(),
            delay_ms = delay.as_millis() as u64,
            "concurrency limit reached, deferring task"
        );

        let requeue = Arc::clone(shared);
        let deferred = shared.executor.spawn(async move {
            tokio::time::sleep(delay).await;
            requeue.buffer.put(task).await;
        });
        if let Err(error) = deferred {
            return Err(Undispatched { task: spare, error });
        }
        Counters::bump(&shared.counters.deferred);
        return Ok(());
    };

    // The admission lives inside the unit, so the permit goes back when the
    // body returns, fails or unwinds.
    let runner = Arc::clone(shared);
    let body = shared.executor.spawn(async move {
        let _admission = admission;
        let _in_flight = runner.counters.enter();
        task.run().await
    });
    let body = match body {
        Ok(body) => body,
        Err(error) => return Err(Undispatched { task: spare, error }),
    };
    Counters::bump(&shared.counters.dispatched);
    debug!(%task_id, "task dispatched");

    let watcher = Arc::clone(shared);
    let watched = shared.executor.spawn(async move {
        let result = match body.await {
            Ok(Some(result)) => result,
            Ok(None) => {
                debug!(%task_id, "task cancelled by shutdown");
                return;
            }
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
            Err(_) => return,
        };

        match result {
            Ok(()) => Counters::bump(&watcher.counters.succeeded),
            Err(TaskError::Exhausted) => trace!(%task_id, "spent task ran as a no-op"),
            Err(e) => {
                Counters::bump(&watcher.counters.failed);
                warn!(%task_id, error = %e, "task failed");
            }
        }
    });
    if let Err(e) = watched {
        debug!(%task_id, error = %e, "task outcome will not be tracked");
    }

    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
