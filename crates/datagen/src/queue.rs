// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unbounded ingestion queue shared by handlers (producers) and workers
//! (consumers).
//!
//! The queue tracks an outstanding count: items enqueued minus items
//! acknowledged. Workers acknowledge an item only once its flush reached a
//! terminal outcome, so [`IngestQueue::await_drain`] returning means the
//! backend has seen every enqueued point.
//!
//! ```text
//!   handlers ──enqueue──▶ [ VecDeque ] ──try_dequeue──▶ workers
//!      │                                                  │
//!      └──── outstanding += 1          outstanding -= 1 ◀─┘ acknowledge
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::error;

use crate::point::QueueItem;

#[derive(Debug)]
struct Inner {
    items: Mutex<VecDeque<QueueItem>>,
    outstanding: watch::Sender<u64>,
}

/// Handle to the ingestion queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    inner: Arc<Inner>,
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestQueue {
    #[must_use]
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                outstanding,
            }),
        }
    }

    #[allow(clippy::expect_used)]
    fn items(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.inner.items.lock().expect("lock poisoned")
    }

    /// Adds an item. Never waits on capacity.
    pub fn enqueue(&self, item: QueueItem) {
        // Count first so a worker can never acknowledge an item the counter
        // has not seen yet.
        self.inner.outstanding.send_modify(|count| *count += 1);
        self.items().push_back(item);
    }

    /// Takes the oldest item, or `None` right away if the queue is empty.
    pub fn try_dequeue(&self) -> Option<QueueItem> {
        self.items().pop_front()
    }

    /// Takes up to `max` items under a single lock. Returns fewer, possibly
    /// none, when the queue runs out.
    pub fn try_dequeue_batch(&self, max: usize) -> Vec<QueueItem> {
        let mut queue = self.items();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Marks a dequeued item as done, whatever its outcome was.
    pub fn acknowledge(&self, item: QueueItem) {
        drop(item);
        self.inner.outstanding.send_modify(|count| {
            if *count == 0 {
                error!("Acknowledged an item that was never enqueued on this queue");
            } else {
                *count -= 1;
            }
        });
    }

    /// Puts dequeued items back at the front without touching the
    /// outstanding count.
    pub fn requeue(&self, items: Vec<QueueItem>) {
        let mut queue = self.items();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
    }

    /// Waits until every enqueued item has been acknowledged.
    pub async fn await_drain(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Items enqueued but not acknowledged yet.
    pub fn outstanding(&self) -> u64 {
        *self.inner.outstanding.borrow()
    }

    /// Items waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}
