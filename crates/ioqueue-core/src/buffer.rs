//! Buffer - ordered, thread-safe FIFO of pending tasks.
//!
//! `Mutex<VecDeque<_>>` holds the items and two `Notify`s stand in for the
//! "not empty" / "not full" conditions, so waiting happens on the async side
//! without parking a runtime thread.
//!
//! Every wait registers its `Notified` future before re-checking the deque;
//! a notification that lands between the check and the await is not lost.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Buffer はタスク待ち行列（FIFO）
///
/// # 実装詳細
/// - `Mutex<VecDeque<T>>` で排他制御。await をまたいでロックは持たない
/// - `not_empty` は insert 時、`not_full` は取り出し時に通知
/// - capacity が `None` なら満杯にならない
///
/// # 使用例
/// ```ignore
/// let buffer = Buffer::bounded(2);
/// buffer.put(1).await;
/// assert!(buffer.offer(2).is_ok());
/// assert_eq!(buffer.offer(3), Err(3));
/// let head = buffer.poll(Duration::from_secs(1)).await;
/// ```
pub struct Buffer<T> {
    /// 待ちアイテム（先頭が次に取り出される）
    items: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    /// insert 時の通知用
    not_empty: Notify,
    /// 取り出し時の通知用
    not_full: Notify,
}

impl<T> Buffer<T> {
    /// `None` capacity means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// 上限なしの Buffer を作成
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// 最大 `capacity` 件の Buffer を作成
    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking insert. Hands the item back when the buffer is full.
    ///
    /// # 実装
    /// 1. Mutex をロック
    /// 2. 満杯なら `Err(item)` で返す
    /// 3. push_back してロックを外してから `not_empty` に通知
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut items = self.lock();
        if let Some(cap) = self.capacity
            && items.len() >= cap
        {
            return Err(item);
        }
        items.push_back(item);
        drop(items);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert, waiting as long as it takes for space.
    pub async fn put(&self, item: T) {
        // deadline なしなので Err にはならない
        let _ = self.insert(item, None).await;
    }

    /// Insert, waiting at most `timeout` for space.
    pub async fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.insert(item, Some(Instant::now() + timeout)).await
    }

    /// put / offer_timeout の共通部分。`deadline` が `None` なら無期限に待つ
    async fn insert(&self, mut item: T, deadline: Option<Instant>) -> Result<(), T> {
        loop {
            let mut notified = pin!(self.not_full.notified());
            notified.as_mut().enable();

            match self.offer(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(item);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-blocking removal of the head.
    pub fn try_poll(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Remove the head, waiting at most `timeout` for one to arrive.
    ///
    /// Returns `None` once the timeout elapses; it never waits indefinitely.
    pub async fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();

            if let Some(item) = self.try_poll() {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Move up to `max` (or all, when `None`) pending items into `sink`.
    ///
    /// Returns how many items were moved.
    pub fn drain_to<E: Extend<T>>(&self, sink: &mut E, max: Option<usize>) -> usize {
        let drained: Vec<T> = {
            let mut items = self.lock();
            let n = max.map_or(items.len(), |max| max.min(items.len()));
            items.drain(..n).collect()
        };
        let count = drained.len();
        sink.extend(drained);

        if count > 0 {
            self.not_full.notify_waiters();
        }
        count
    }

    /// 待ちアイテム数
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 待ちアイテムがないか
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Free slots left. Unbounded buffers report `usize::MAX`.
    pub fn remaining_capacity(&self) -> usize {
        match self.capacity {
            Some(cap) => cap.saturating_sub(self.len()),
            None => usize::MAX,
        }
    }

    /// 作成時の上限。`None` は上限なし
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn poll_returns_items_in_insertion_order() {
        let buffer = Buffer::unbounded();
        for i in 0..3 {
            buffer.put(i).await;
        }

        assert_eq!(buffer.poll(Duration::from_millis(10)).await, Some(0));
        assert_eq!(buffer.poll(Duration::from_millis(10)).await, Some(1));
        assert_eq!(buffer.poll(Duration::from_millis(10)).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_with_none() {
        let buffer: Buffer<u32> = Buffer::unbounded();
        let start = Instant::now();

        let popped = buffer.poll(Duration::from_millis(500)).await;

        assert_eq!(popped, None);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn put_wakes_waiting_poll() {
        let buffer = Arc::new(Buffer::unbounded());

        let waiter = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.poll(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.put("hello").await;

        assert_eq!(waiter.await.unwrap(), Some("hello"));
    }

    #[test]
    fn offer_on_full_buffer_hands_item_back() {
        let buffer = Buffer::bounded(1);
        assert!(buffer.offer(1).is_ok());
        assert_eq!(buffer.offer(2), Err(2));
        assert_eq!(buffer.remaining_capacity(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offer_timeout_gives_up_when_still_full() {
        let buffer = Buffer::bounded(1);
        buffer.put(1).await;

        let result = buffer.offer_timeout(2, Duration::from_millis(200)).await;

        assert_eq!(result, Err(2));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn put_blocks_until_space_frees_up() {
        let buffer = Arc::new(Buffer::bounded(1));
        buffer.put(1).await;

        let producer = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.put(2).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(buffer.poll(Duration::from_millis(10)).await, Some(1));
        producer.await.unwrap();
        assert_eq!(buffer.poll(Duration::from_millis(10)).await, Some(2));
    }

    #[test]
    fn drain_to_respects_max() {
        let buffer = Buffer::unbounded();
        for i in 0..5 {
            buffer.offer(i).unwrap();
        }

        let mut sink = Vec::new();
        assert_eq!(buffer.drain_to(&mut sink, Some(2)), 2);
        assert_eq!(sink, vec![0, 1]);

        assert_eq!(buffer.drain_to(&mut sink, None), 3);
        assert_eq!(sink, vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn unbounded_reports_max_remaining_capacity() {
        let buffer: Buffer<u8> = Buffer::unbounded();
        assert_eq!(buffer.remaining_capacity(), usize::MAX);
        assert_eq!(buffer.capacity(), None);
    }
}
