use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::RetryCallback;
use crate::error::BoxError;
use crate::executor::Executor;

pub type OperationFuture<V> = Pin<Box<dyn Future<Output = Result<V, BoxError>> + Send>>;

/// The fallible unit of work wrapped by a [`RetryableTask`](super::RetryableTask).
pub type Operation<V> = Arc<dyn Fn() -> OperationFuture<V> + Send + Sync>;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Everything a [`RetryableTask`](super::RetryableTask) is built from.
///
/// Start from [`RetryConfig::new`] and override with struct update syntax:
///
/// ```ignore
/// let task = RetryableTask::new(RetryConfig {
///     max_retries: 3,
///     retry_delay: Duration::from_millis(10),
///     callback: Some(Arc::new(my_callback)),
///     ..RetryConfig::new(|| async { fetch().await })
/// });
/// ```
pub struct RetryConfig<V> {
    pub operation: Operation<V>,

    /// Attempts allowed after the first one.
    pub max_retries: u32,

    /// Fixed pause before every attempt except the first.
    pub retry_delay: Duration,

    /// Without a callback outcomes are only logged.
    pub callback: Option<Arc<dyn RetryCallback<V>>>,

    pub callback_executor: Executor,
}

impl<V: Send + 'static> RetryConfig<V> {
    pub fn new<F, Fut, E>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let operation: Operation<V> = Arc::new(move || -> OperationFuture<V> {
            let fut = operation();
            Box::pin(async move { fut.await.map_err(Into::into) })
        });

        Self {
            operation,
            max_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            callback: None,
            callback_executor: Executor::new(),
        }
    }
}

impl<V> Clone for RetryConfig<V> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            callback: self.callback.clone(),
            callback_executor: self.callback_executor.clone(),
        }
    }
}

impl<V> fmt::Debug for RetryConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}
