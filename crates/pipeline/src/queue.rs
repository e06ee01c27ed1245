//! Bounded async FIFO connecting pipeline stages.
//!
//! This is the only synchronization primitive between stages: every
//! cross-stage handoff is a `put`/`take` pair, which keeps backpressure in
//! one auditable place.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Returned by [`BoundedQueue::put`] when the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled when an item arrives or the queue closes.
    readable: Notify,
    /// Signalled when space frees, the queue clears, or the queue closes.
    writable: Notify,
}

/// Cloneable handle to a bounded FIFO channel.
///
/// `take` returns `None` once the queue is closed and drained; `put` on a
/// closed queue fails immediately. `open` resets the closed flag so the
/// queue can be reused after a pause.
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    capacity: capacity.max(1),
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    /// Queue with no practical capacity bound.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // A poisoned queue mutex only means a panicking thread held it;
        // the VecDeque itself is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues `item`, suspending while the queue is full.
    ///
    /// Fails with [`QueueClosed`] if the queue is closed before or while
    /// waiting.
    pub async fn put(&self, item: T) -> Result<(), QueueClosed> {
        let mut item = item;
        loop {
            // Arm the notification before checking state so a wakeup
            // between unlock and await is not lost.
            let notified = self.inner.writable.notified();
            {
                let mut st = self.lock();
                if st.closed {
                    return Err(QueueClosed);
                }
                if st.items.len() < st.capacity {
                    st.items.push_back(item);
                    drop(st);
                    self.inner.readable.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Dequeues the next item, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.inner.readable.notified();
            {
                let mut st = self.lock();
                if let Some(item) = st.items.pop_front() {
                    drop(st);
                    self.inner.writable.notify_one();
                    return Some(item);
                }
                if st.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue: pending takers drain the remaining items and then
    /// observe end-of-stream, pending putters fail. Idempotent.
    pub fn close(&self) {
        {
            let mut st = self.lock();
            if st.closed {
                return;
            }
            st.closed = true;
        }
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
    }

    /// Reopens a closed queue for reuse.
    pub fn open(&self) {
        self.lock().closed = false;
    }

    /// Drops all queued items without closing.
    pub fn clear(&self) {
        self.lock().items.clear();
        self.inner.writable.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
