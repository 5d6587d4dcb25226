use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ioqueue_core::{
    BoxError, Outcome, QueueConfig, RetryCallback, RetryConfig, RetryableTask, Task, TaskError,
    TaskQueue, task_fn,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

/// Records outcomes and puts failed tasks back into the queue.
struct Requeue {
    queue: Arc<TaskQueue>,
    tx: mpsc::UnboundedSender<Result<String, String>>,
}

#[async_trait]
impl RetryCallback<String> for Requeue {
    async fn on_outcome(&self, task: Arc<RetryableTask<String>>, outcome: Outcome<String>) {
        match outcome {
            Outcome::Success(v) => {
                let _ = self.tx.send(Ok(v));
            }
            Outcome::Failure(e) => {
                let _ = self.tx.send(Err(e.to_string()));
                self.queue.put(task).await;
            }
        }
    }
}

fn started(config: QueueConfig) -> Arc<TaskQueue> {
    let queue = Arc::new(TaskQueue::new(config).unwrap());
    queue.start().unwrap();
    queue
}

#[tokio::test]
async fn success_fires_exactly_one_success_callback() {
    let queue = started(QueueConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = RetryableTask::new(RetryConfig {
        callback: Some(Arc::new(Requeue {
            queue: Arc::clone(&queue),
            tx,
        })),
        ..RetryConfig::new(|| async { Ok::<_, BoxError>("Success".to_string()) })
    });
    assert!(queue.offer(task));

    let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(got, Some(Ok("Success".to_string())));
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

    queue.shutdown().await;
}

#[tokio::test]
async fn failing_task_is_retried_through_queue_until_exhausted() {
    let queue = started(QueueConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = RetryableTask::new(RetryConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        callback: Some(Arc::new(Requeue {
            queue: Arc::clone(&queue),
            tx,
        })),
        ..RetryConfig::new(|| async { Err::<String, BoxError>("Something is wrong!".into()) })
    });
    assert!(queue.offer(task.clone()));

    for _ in 0..4 {
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, Some(Err("Something is wrong!".to_string())));
    }
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.is_err());
    assert!(task.is_exhausted());

    // a spent task run by hand stays silent
    let err = task.clone().run().await.unwrap_err();
    assert!(matches!(err, TaskError::Exhausted));
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    queue.shutdown().await;
}

#[tokio::test]
async fn spent_retry_task_is_not_counted_as_success() {
    let queue = started(QueueConfig::default());
    let task = RetryableTask::new(RetryConfig::new(|| async {
        Err::<(), BoxError>("upstream down".into())
    }));

    queue.put(task.clone()).await;
    queue.put(task).await;

    for _ in 0..100 {
        if queue.stats().dispatched == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = queue.stats();
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 0);

    queue.shutdown().await;
}

#[tokio::test]
async fn first_attempt_is_not_delayed() {
    let queue = started(QueueConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = RetryableTask::new(RetryConfig {
        max_retries: 2,
        retry_delay: Duration::from_secs(2),
        ..RetryConfig::new(move || {
            let _ = tx.send(Instant::now());
            async { Ok::<_, BoxError>(()) }
        })
    });

    let submitted = Instant::now();
    queue.put(task).await;

    let first_run = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first_run.duration_since(submitted) < Duration::from_millis(500));

    queue.shutdown().await;
}

#[tokio::test]
async fn unthrottled_tasks_start_in_submission_order() {
    let queue = Arc::new(TaskQueue::unlimited());
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["A", "B", "C"] {
        let order = Arc::clone(&order);
        queue
            .put(task_fn(move || {
                order.lock().unwrap().push(name);
                async { Ok::<_, BoxError>(()) }
            }))
            .await;
    }
    queue.start().unwrap();

    for _ in 0..100 {
        if order.lock().unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_execution_never_exceeds_limit() {
    const LIMIT: usize = 3;
    const TASKS: usize = 20;

    let queue = started(QueueConfig {
        throttle_delay: Duration::from_millis(20),
        ..QueueConfig::bounded(LIMIT)
    });
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..TASKS {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        let tx = tx.clone();
        queue
            .put(task_fn(move || {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                let tx = tx.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    tx.send(()).map_err(|e| e.to_string())
                }
            }))
            .await;
    }

    for _ in 0..TASKS {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert!(peak.load(Ordering::SeqCst) >= 1);

    let stats = queue.stats();
    assert!(stats.deferred > 0);
    assert!(stats.permits_in_use <= LIMIT);

    queue.shutdown().await;
}

#[tokio::test]
async fn throttled_tasks_eventually_run() {
    let queue = started(QueueConfig {
        throttle_delay: Duration::from_millis(20),
        ..QueueConfig::bounded(1)
    });
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let done = Arc::clone(&done);
        queue
            .put(task_fn(move || {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            }))
            .await;
    }

    for _ in 0..200 {
        if done.load(Ordering::SeqCst) == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(done.load(Ordering::SeqCst), 3);

    queue.shutdown().await;
}

#[tokio::test]
async fn shutdown_twice_leaves_queue_stopped() {
    let queue = started(QueueConfig::default());

    queue.shutdown().await;
    queue.shutdown().await;

    assert!(!queue.is_running());
    assert!(!queue.stats().running);
}

#[tokio::test]
async fn shutdown_cancels_tasks_past_grace_period() {
    let queue = started(QueueConfig {
        shutdown_timeout: Duration::from_millis(50),
        ..QueueConfig::default()
    });
    let finished = Arc::new(AtomicUsize::new(0));

    queue
        .put(task_fn({
            let finished = Arc::clone(&finished);
            move || {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            }
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    queue.shutdown().await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}
