//! Observability - queue の状態をスナップショットで見せる
//!
//! カウンタはすべて atomic。ロックは取らないので、`stats()` の各値は
//! 同じ瞬間のものとは限らない（ずれても 1 件程度）。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a queue.
///
/// # 使用例
/// ```ignore
/// let stats = queue.stats();
/// println!("{}", serde_json::to_string_pretty(&stats)?);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// dequeue loop が動いているか
    pub running: bool,
    /// buffer で待っているタスク数
    pub pending: usize,
    /// 本体を実行中のタスク数（throttle 待ちや callback は含まない）
    pub in_flight: usize,
    /// 保持されている permit 数。制限なしなら常に 0
    pub permits_in_use: usize,
    /// 実行ユニットに渡したタスクの累計
    pub dispatched: u64,
    /// permit が取れず後回しにした回数の累計
    pub deferred: u64,
    /// 本体が `Ok` で終わった回数
    pub succeeded: u64,
    /// 本体がエラーか panic で終わった回数
    pub failed: u64,
    pub taken_at: DateTime<Utc>,
}

/// Counters bumped by the dispatch path.
///
/// `in_flight` だけは増減する。ほかは単調増加。
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: AtomicU64,
    pub deferred: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    in_flight: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// 本体の実行が始まったことを記録する。
    /// 返ってきた guard が drop されると（正常終了・panic・キャンセルのどれでも）1 減る。
    pub fn enter(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(&self.in_flight)
    }
}

#[must_use = "dropping the guard ends the in-flight span immediately"]
pub(crate) struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let counters = Counters::default();

        let a = counters.enter();
        let b = counters.enter();
        assert_eq!(counters.in_flight(), 2);

        drop(a);
        assert_eq!(counters.in_flight(), 1);
        drop(b);
        assert_eq!(counters.in_flight(), 0);
    }

    #[test]
    fn stats_serialize_with_field_names() {
        let stats = QueueStats {
            running: true,
            pending: 1,
            in_flight: 2,
            permits_in_use: 2,
            dispatched: 5,
            deferred: 1,
            succeeded: 2,
            failed: 1,
            taken_at: Utc::now(),
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["in_flight"], 2);
        assert_eq!(json["deferred"], 1);
    }
}
