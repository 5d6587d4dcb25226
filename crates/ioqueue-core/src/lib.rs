//! ioqueue-core
//!
//! In-process execution queue for I/O-bound work.
//!
//! # モジュール構成
//! - **buffer**: FIFO buffer with blocking / non-blocking insert and timed poll
//! - **gate**: optional concurrency limit (`Unlimited` / `Bounded(n)`)
//! - **executor**: one tokio task per unit of work, bounded-wait shutdown
//! - **queue**: `TaskQueue` - dequeue loop, dispatch, start / stop / shutdown
//! - **retry**: `RetryableTask` - bounded re-attempts reported through a callback
//! - **task**: the `Task` trait and closure adapter
//!
//! # Example
//! ```ignore
//! let queue = Arc::new(TaskQueue::with_limit(4)?);
//! queue.start()?;
//! queue.put(task_fn(|| async { fetch().await })).await;
//! queue.shutdown().await;
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod ids;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod task;

pub use config::{Concurrency, QueueConfig};
pub use error::{BoxError, QueueError, SharedError, TaskError};
pub use executor::Executor;
pub use ids::TaskId;
pub use observability::QueueStats;
pub use queue::TaskQueue;
pub use retry::{Outcome, RetryCallback, RetryConfig, RetryableTask};
pub use task::{FnTask, Task, TaskRef, task_fn};
