//! AdmissionGate - bounds how many tasks execute at once.
//!
//! 待たない gate。permit が取れなければ `None` を返すだけで、
//! 後回しにするかどうかは呼び出し側（dispatch）が決める。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Concurrency;

/// 同時実行数の制限
///
/// # 実装詳細
/// - `Unlimited` は常に通す（permit なしの `Admission` を返す）
/// - `Bounded` は `Semaphore::try_acquire_owned`。owned permit なので実行ユニットに move できる
///
/// # 使用例
/// ```ignore
/// let gate = AdmissionGate::new(Concurrency::Bounded(2));
/// if let Some(admission) = gate.try_admit() {
///     tokio::spawn(async move {
///         let _admission = admission;
///         work().await;
///     });
/// }
/// ```
pub enum AdmissionGate {
    Unlimited,
    Bounded {
        /// 作成時の permit 数
        limit: usize,
        permits: Arc<Semaphore>,
    },
}

/// Proof of admission. The permit (if any) goes back to the gate on drop,
/// so it is released whether the task finishes, fails or panics.
#[derive(Debug)]
#[must_use = "dropping an Admission releases the permit immediately"]
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionGate {
    /// 設定から gate を作成。`Bounded(n)` なら permit を n 個用意する
    pub fn new(concurrency: Concurrency) -> Self {
        match concurrency {
            Concurrency::Unlimited => Self::Unlimited,
            Concurrency::Bounded(limit) => Self::Bounded {
                limit,
                permits: Arc::new(Semaphore::new(limit)),
            },
        }
    }

    /// Non-blocking. `None` means every permit is taken.
    pub fn try_admit(&self) -> Option<Admission> {
        match self {
            Self::Unlimited => Some(Admission { _permit: None }),
            Self::Bounded { permits, .. } => Arc::clone(permits)
                .try_acquire_owned()
                .ok()
                .map(|permit| Admission {
                    _permit: Some(permit),
                }),
        }
    }

    /// 同時実行数の上限。制限なしなら `None`
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Bounded { limit, .. } => Some(*limit),
        }
    }

    /// Permits currently held. Always 0 for an unlimited gate.
    pub fn in_use(&self) -> usize {
        match self {
            Self::Unlimited => 0,
            Self::Bounded { limit, permits } => limit - permits.available_permits(),
        }
    }
}
