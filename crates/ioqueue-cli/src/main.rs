//! ioqueue - runs a small workload through a `TaskQueue`.
//!
//! ```text
//! RUST_LOG=debug ioqueue [config.json]
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ioqueue_core::{
    BoxError, Outcome, QueueConfig, RetryCallback, RetryConfig, RetryableTask, Task, TaskQueue,
    task_fn,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const FETCHES: usize = 8;

/// Requeues failed attempts and forwards every outcome to `main`.
struct RequeueOnFailure {
    queue: Arc<TaskQueue>,
    tx: mpsc::UnboundedSender<bool>,
}

#[async_trait]
impl RetryCallback<String> for RequeueOnFailure {
    async fn on_outcome(&self, task: Arc<RetryableTask<String>>, outcome: Outcome<String>) {
        match outcome {
            Outcome::Success(body) => {
                info!(task_id = %task.id(), %body, "flaky fetch succeeded");
                let _ = self.tx.send(true);
            }
            Outcome::Failure(e) => {
                warn!(
                    attempts_remaining = task.attempts_remaining(),
                    error = %e,
                    "flaky fetch failed"
                );
                if task.is_exhausted() {
                    let _ = self.tx.send(false);
                } else {
                    self.queue.put(task).await;
                }
            }
        }
    }
}

fn load_config() -> Result<QueueConfig, BoxError> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(QueueConfig {
            throttle_delay: Duration::from_millis(200),
            ..QueueConfig::bounded(3)
        }),
    }
}

async fn run() -> Result<(), BoxError> {
    let config = load_config()?;
    let queue = Arc::new(TaskQueue::new(config)?);
    queue.start()?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for i in 0..FETCHES {
        let done_tx = done_tx.clone();
        queue
            .put(task_fn(move || {
                let done_tx = done_tx.clone();
                async move {
                    // I/O の代わり
                    tokio::time::sleep(Duration::from_millis(100 + 25 * i as u64)).await;
                    info!(fetch = i, "fetch finished");
                    done_tx.send(true).map_err(|e| e.to_string())
                }
            }))
            .await;
    }

    let failures_left = Arc::new(AtomicU32::new(2));
    let flaky = RetryableTask::new(RetryConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(300),
        callback: Some(Arc::new(RequeueOnFailure {
            queue: Arc::clone(&queue),
            tx: done_tx.clone(),
        })),
        ..RetryConfig::new(move || {
            let failures_left = Arc::clone(&failures_left);
            async move {
                if failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err::<String, BoxError>("upstream unavailable".into());
                }
                Ok("200 OK".to_string())
            }
        })
    });
    queue.put(flaky).await;
    drop(done_tx);

    let mut ok = 0;
    let mut failed = 0;
    for _ in 0..=FETCHES {
        match tokio::time::timeout(Duration::from_secs(30), done_rx.recv()).await {
            Ok(Some(true)) => ok += 1,
            Ok(Some(false)) => failed += 1,
            Ok(None) | Err(_) => break,
        }
    }
    info!(ok, failed, "workload finished");

    println!("{}", serde_json::to_string_pretty(&queue.stats())?);
    queue.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        error!(error = %e, "ioqueue failed");
        std::process::exit(1);
    }
}
