//! Task - the opaque unit of work the queue moves around.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BoxError, TaskError};
use crate::ids::TaskId;

/// A zero-argument, side-effecting unit of work.
///
/// `run` takes `Arc<Self>` so a task can hand itself to a callback, which is
/// how a task finds its way back into the queue.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// ログ用の識別子
    fn id(&self) -> TaskId;

    /// 本体を 1 回実行する。エラーは実行ユニットの外には出ない

    async fn run(self: Arc<Self>) -> Result<(), TaskError>;
}

/// queue が持ち回るタスクの参照
pub type TaskRef = Arc<dyn Task>;

/// Adapts a plain async closure into a [`Task`].
///
/// # 使用例
/// ```ignore
/// let task = task_fn(|| async {
///     fetch("https://example.com").await?;
///     Ok::<_, BoxError>(())
/// });
/// queue.put(task).await;
/// ```
pub struct FnTask<F> {
    id: TaskId,
    f: F,
}

impl<F> FnTask<F> {
    /// 新しい id を振って closure を包む
    pub fn new(f: F) -> Self {
        Self {
            id: TaskId::new(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<F, Fut, E> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn id(&self) -> TaskId {
        self.id
    }

    async fn run(self: Arc<Self>) -> Result<(), TaskError> {
        (self.f)().await.map_err(TaskError::operation)
    }
}

/// Shorthand for `Arc::new(FnTask::new(f))`.
pub fn task_fn<F, Fut, E>(f: F) -> TaskRef
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(FnTask::new(f))
}
