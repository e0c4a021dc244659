//! Bounded FIFO between ingestion and the broadcast hub
//!
//! Producers never wait: a full queue rejects. The consumer waits on a
//! [`Notify`] tied to the queue while it is empty and then takes whatever
//! is available, up to the requested count, without waiting for more.
//!
//! Closing happens under the same lock as enqueue, so once [`close`]
//! returns no further update can land in the queue.
//!
//! [`close`]: UpdateQueue::close

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use types::pixel::PixelUpdate;

use crate::config::QueueConfig;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("update queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("update queue is closed")]
    Closed,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<PixelUpdate>,
    closed: bool,
}

#[derive(Debug)]
pub struct UpdateQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
    capacity: usize,
}

impl UpdateQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Notify::new(),
            capacity,
        }
    }

    // The lock is never held across an await and no code under it panics,
    // so a poisoned queue still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append at the tail, or fail immediately when full or closed.
    pub fn enqueue(&self, update: PixelUpdate) -> Result<(), EnqueueError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(EnqueueError::Closed);
            }
            if inner.items.len() >= self.capacity {
                return Err(EnqueueError::Full {
                    capacity: self.capacity,
                });
            }
            inner.items.push_back(update);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Wait until the queue is non-empty, then take up to `max` updates
    /// from the head in FIFO order.
    ///
    /// Cancel safe: nothing is removed unless the call returns. `max == 0`
    /// returns immediately with nothing.
    pub async fn dequeue_batch(&self, max: usize) -> Vec<PixelUpdate> {
        if max == 0 {
            return Vec::new();
        }
        loop {
            let batch = self.try_dequeue_batch(max);
            if !batch.is_empty() {
                return batch;
            }
            self.not_empty.notified().await;
        }
    }

    /// Take up to `max` updates without waiting. Still drains a closed
    /// queue.
    pub fn try_dequeue_batch(&self, max: usize) -> Vec<PixelUpdate> {
        let (batch, more) = {
            let mut inner = self.lock();
            let n = max.min(inner.items.len());
            let batch: Vec<PixelUpdate> = inner.items.drain(..n).collect();
            (batch, !inner.items.is_empty())
        };
        if more && !batch.is_empty() {
            // Pass the wakeup on so another waiter sees the remainder.
            self.not_empty.notify_one();
        }
        batch
    }

    /// Refuse every later enqueue. Updates already queued stay drainable.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use types::canvas::CanvasBounds;
    use types::pixel::PixelRequest;

    fn update(x: i64) -> PixelUpdate {
        PixelRequest::new(x, 0, "#FF0000", "alice")
            .validate(&CanvasBounds::default())
            .unwrap()
            .stamp(x)
    }

    #[test]
    fn test_enqueue_until_full() {
        let q = UpdateQueue::with_capacity(2);
        q.enqueue(update(1)).unwrap();
        q.enqueue(update(2)).unwrap();
        assert_eq!(q.enqueue(update(3)), Err(EnqueueError::Full { capacity: 2 }));
        assert_eq!(q.len(), 2);

        // Full never evicts.
        let batch = q.try_dequeue_batch(10);
        assert_eq!(batch.iter().map(|u| u.x).collect::<Vec<_>>(), vec![1, 2]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_returns_partial_batch_without_waiting() {
        let q = UpdateQueue::with_capacity(10);
        for x in 0..3 {
            q.enqueue(update(x)).unwrap();
        }
        let batch = q.dequeue_batch(50).await;
        assert_eq!(batch.len(), 3);

        for x in 0..5 {
            q.enqueue(update(x)).unwrap();
        }
        let batch = q.dequeue_batch(2).await;
        assert_eq!(batch.iter().map(|u| u.x).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(q.len(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_does_not_block_while_consumer_waits() {
        let q = Arc::new(UpdateQueue::with_capacity(1));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue_batch(10).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        q.enqueue(update(7)).unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].x, 7);

        q.enqueue(update(8)).unwrap();
        assert!(q.enqueue(update(9)).is_err());
    }

    #[test]
    fn test_closed_queue_rejects_but_still_drains() {
        let q = UpdateQueue::with_capacity(4);
        q.enqueue(update(1)).unwrap();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.enqueue(update(2)), Err(EnqueueError::Closed));

        let batch = q.try_dequeue_batch(4);
        assert_eq!(batch.iter().map(|u| u.x).collect::<Vec<_>>(), vec![1]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_zero_max_returns_immediately() {
        let q = UpdateQueue::with_capacity(4);
        assert!(q.dequeue_batch(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_dequeue_loses_nothing() {
        let q = UpdateQueue::with_capacity(4);
        let cancelled = tokio::time::timeout(Duration::from_millis(10), q.dequeue_batch(4)).await;
        assert!(cancelled.is_err());

        q.enqueue(update(1)).unwrap();
        assert_eq!(q.dequeue_batch(4).await.len(), 1);
    }
}
