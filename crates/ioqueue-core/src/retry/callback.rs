use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::RetryableTask;
use crate::error::SharedError;

/// Result of one attempt, delivered to the [`RetryCallback`].
pub enum Outcome<V> {
    Success(V),
    Failure(SharedError),
}

impl<V> Outcome<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

impl<V: fmt::Debug> fmt::Debug for Outcome<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(v) => f.debug_tuple("Success").field(v).finish(),
            Self::Failure(e) => f.debug_tuple("Failure").field(&e.to_string()).finish(),
        }
    }
}

/// Receives the outcome of every attempt.
///
/// Exactly one call per attempt, always on the task's callback executor and
/// never on the dequeue loop. Re-submitting `task` (usually from the failure
/// branch) is the only way a task gets retried.
///
/// # Example
/// ```ignore
/// struct Requeue(Arc<TaskQueue>);
///
/// #[async_trait]
/// impl RetryCallback<String> for Requeue {
///     async fn on_outcome(&self, task: Arc<RetryableTask<String>>, outcome: Outcome<String>) {
///         if outcome.is_failure() {
///             self.0.put(task).await;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait RetryCallback<V>: Send + Sync {
    async fn on_outcome(&self, task: Arc<RetryableTask<V>>, outcome: Outcome<V>);
}
