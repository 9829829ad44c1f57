//! Bounded FIFO durable queue (§ Durable Queue).
//!
//! Mirrors a mutex-plus-two-signal-channels design: a plain [`std::sync::Mutex`]
//! guards the deque (never held across an `.await`), and two [`Notify`]
//! instances stand in for the `notEmpty`/`notFull` channels. Notify
//! coalesces redundant wake-ups the same way a buffered-1 channel does, so
//! callers must always loop back to [`DurableQueue::try_pop`] rather than
//! trust a single wake-up to mean "exactly one item is ready".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Errors raised by [`DurableQueue`] operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed while a push was pending.
    #[error("queue was closed")]
    Closed,
    /// The caller's cancellation token fired while a push was pending.
    #[error("push was cancelled")]
    Cancelled,
}

/// Bounded (or unbounded, when `max_depth == 0`) FIFO queue with blocking,
/// cancellable push and non-blocking pop.
pub struct DurableQueue<T> {
    inner: Mutex<VecDeque<T>>,
    max_depth: usize,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
}

impl<T> DurableQueue<T> {
    /// Create a queue bounded at `max_depth` items. `max_depth == 0` means
    /// unbounded.
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            max_depth,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push `item` onto the queue, blocking until space is available, the
    /// queue is closed, or `cancel` fires.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), QueueError> {
        loop {
            {
                let mut guard = self.inner.lock().expect("durable queue mutex poisoned");
                if self.closed.load(Ordering::Acquire) {
                    return Err(QueueError::Closed);
                }
                if self.max_depth == 0 || guard.len() < self.max_depth {
                    guard.push_back(item);
                    drop(guard);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = self.not_full.notified() => continue,
            }
        }
    }

    /// Remove and return the head of the queue, or `None` if empty.
    ///
    /// If the queue was at capacity immediately before this pop, wakes one
    /// pending [`DurableQueue::push`] waiter.
    pub fn try_pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().expect("durable queue mutex poisoned");
        if guard.is_empty() {
            return None;
        }
        let was_at_capacity = self.max_depth != 0 && guard.len() == self.max_depth;
        let item = guard.pop_front();
        drop(guard);
        if was_at_capacity {
            self.not_full.notify_one();
        }
        item
    }

    /// Wait for a not-empty hint. Callers must loop back to [`Self::try_pop`]
    /// — this only signals that *something* may be ready, coalesced across
    /// any number of intervening pushes.
    pub async fn wait_not_empty(&self) {
        self.not_empty.notified().await;
    }

    /// Pop the next item, waiting (cancellably) if the queue is currently
    /// empty. Returns `None` once the queue is closed and drained, or if
    /// `cancel` fires first.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.not_empty.notified() => continue,
            }
        }
    }

    /// Close the queue: pending and future pushes fail with
    /// [`QueueError::Closed`]; pending pops wake to observe closure once the
    /// backlog is drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("durable queue mutex poisoned").len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_and_pop_preserve_fifo_order() {
        let q: DurableQueue<i32> = DurableQueue::new(0);
        let cancel = CancellationToken::new();
        for i in 0..5 {
            q.push(i, &cancel).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn push_blocks_when_at_capacity_until_pop_frees_space() {
        let q = Arc::new(DurableQueue::<i32>::new(1));
        let cancel = CancellationToken::new();
        q.push(1, &cancel).await.unwrap();

        let q2 = q.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { q2.push(2, &cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        assert_eq!(q.try_pop(), Some(1));
        handle.await.unwrap().unwrap();
        assert_eq!(q.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn push_respects_cancellation() {
        let q: DurableQueue<i32> = DurableQueue::new(1);
        let cancel = CancellationToken::new();
        q.push(1, &cancel).await.unwrap();

        cancel.cancel();
        let result = q.push(2, &cancel).await;
        assert_eq!(result, Err(QueueError::Cancelled));
    }

    #[tokio::test]
    async fn push_after_close_fails() {
        let q: DurableQueue<i32> = DurableQueue::new(0);
        q.close();
        let cancel = CancellationToken::new();
        let result = q.push(1, &cancel).await;
        assert_eq!(result, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = Arc::new(DurableQueue::<i32>::new(0));
        let cancel = CancellationToken::new();
        let q2 = q.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { q2.pop(&cancel2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(42, &cancel).await.unwrap();

        assert_eq!(handle.await.unwrap(), Some(42));
    }
}
