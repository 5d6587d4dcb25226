use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// Error type accepted from user operations.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A failure that has to be observed in more than one place
/// (the result callback and the caller of the attempt).
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Failure of a single task body.
///
/// These never leave the execution unit that ran the task; the dequeue loop
/// only ever sees them in logs.
///
/// # 集計上の扱い
/// - `Operation` / `Panicked` は `failed` に数える
/// - `Exhausted` は何も実行していないので success にも failure にも数えない
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// ユーザーの operation がエラーを返した
    #[error("operation failed: {0}")]
    Operation(#[source] SharedError),

    /// task 本体が panic した（payload の文字列）
    #[error("task panicked: {0}")]
    Panicked(String),

    /// 試行回数を使い切ったタスクがまた実行された。operation も callback も呼ばれていない
    #[error("attempts exhausted, nothing was run")]
    Exhausted,
}

impl TaskError {
    /// 任意のエラーを `Operation` に包む
    pub fn operation(err: impl Into<BoxError>) -> Self {
        Self::Operation(Arc::from(err.into()))
    }
}

/// Queue-level failures: lifecycle and configuration, never task outcomes.
#[derive(Debug, Error)]
pub enum QueueError {
    /// tokio runtime の外から start / spawn した
    #[error("no tokio runtime available to start the dequeue loop")]
    NoRuntime,

    /// shutdown 後の実行コンテキストに spawn しようとした
    #[error("execution context is closed")]
    ExecutorClosed,

    #[error("invalid queue config: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_keeps_source_message() {
        let err = TaskError::operation("disk on fire");
        assert_eq!(err.to_string(), "operation failed: disk on fire");
        assert_eq!(err.source().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn exhausted_has_no_source() {
        let err = TaskError::Exhausted;
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "attempts exhausted, nothing was run");
    }
}
