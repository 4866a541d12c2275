//! Awaitable FIFO queue shared between pipeline stages
//!
//! Producers push without ever blocking. A consumer asks for "at least N
//! items, or whatever is there after T" and gets every item present at the
//! moment the request is satisfied. This lets each stage pick its own
//! latency/smoothness trade-off with the same primitive.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Inner<T> {
    items: VecDeque<T>,
    /// Bumped by every `clear`
    generation: u64,
}

/// Items taken by one dequeue, tagged with the queue generation they were
/// taken under
#[derive(Debug)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub generation: u64,
}

/// FIFO queue with minimum-count-or-timeout dequeue
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    changed: Notify,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                generation: 0,
            }),
            changed: Notify::new(),
        }
    }

    /// Append one item
    pub fn push(&self, item: T) {
        self.inner.lock().items.push_back(item);
        self.changed.notify_waiters();
    }

    /// Append items in order. An empty iterator is a no-op.
    pub fn enqueue<I: IntoIterator<Item = T>>(&self, items: I) {
        let added = {
            let mut inner = self.inner.lock();
            let before = inner.items.len();
            inner.items.extend(items);
            inner.items.len() != before
        };
        if added {
            self.changed.notify_waiters();
        }
    }

    /// Wait until at least `min_count` items are queued, then take all of them.
    ///
    /// With a timeout, gives up once it elapses, invokes `on_timeout` with
    /// the number of items present and returns them (possibly none).
    /// Items are only removed when the future completes, so dropping it
    /// early loses nothing.
    pub async fn dequeue<F>(
        &self,
        min_count: usize,
        timeout: Option<Duration>,
        on_timeout: Option<F>,
    ) -> Vec<T>
    where
        F: FnOnce(usize),
    {
        self.dequeue_batch(min_count, timeout, on_timeout).await.items
    }

    /// `dequeue` that also reports the generation the items came from
    pub async fn dequeue_batch<F>(
        &self,
        min_count: usize,
        timeout: Option<Duration>,
        on_timeout: Option<F>,
    ) -> Batch<T>
    where
        F: FnOnce(usize),
    {
        let min_count = min_count.max(1);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Register before checking so a push between the check and the
            // await still wakes us.
            let notified = self.changed.notified();

            {
                let mut inner = self.inner.lock();
                if inner.items.len() >= min_count {
                    return inner.take_all();
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        let batch = self.inner.lock().take_all();
                        if let Some(callback) = on_timeout {
                            callback(batch.items.len());
                        }
                        return batch;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// `dequeue` without a timeout callback
    pub async fn dequeue_min(&self, min_count: usize, timeout: Option<Duration>) -> Vec<T> {
        self.dequeue(min_count, timeout, None::<fn(usize)>).await
    }

    /// Put a batch back at the head of the queue. Does nothing and returns
    /// false if the queue was cleared since the batch was taken.
    pub fn restore(&self, batch: Batch<T>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.generation != batch.generation {
                return false;
            }
            for item in batch.items.into_iter().rev() {
                inner.items.push_front(item);
            }
        }
        self.changed.notify_waiters();
        true
    }

    /// Discard all buffered items and start a new generation
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.generation += 1;
    }

    /// Number of `clear` calls so far
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

impl<T> Inner<T> {
    fn take_all(&mut self) -> Batch<T> {
        Batch {
            items: self.items.drain(..).collect(),
            generation: self.generation,
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to a queue
pub type SharedQueue<T> = Arc<BlockingQueue<T>>;
