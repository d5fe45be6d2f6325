// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch workers draining the ingestion queue into a backend.
//!
//! Each worker loops through the same states:
//!
//! ```text
//!   Idle ──▶ Draining ──(items)──▶ Flushing ──▶ Idle
//!                │
//!                └──(empty)──▶ Backoff ──▶ Idle
//! ```
//!
//! Items are acknowledged only once their flush reached a terminal outcome:
//! delivered, rejected as permanent, or still failing after the last retry.
//! A failing flush never stops the worker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backends::Backend;
use crate::error::{CreationError, FlushError};
use crate::point::QueueItem;
use crate::queue::IngestQueue;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often, and how far apart, a failed flush is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Attempts, no delay in between.
    Immediate(u64),
    /// Attempts, and a delay in milliseconds that grows with each attempt.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    /// Total number of flush attempts, the first one included.
    pub fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(attempt))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::LinearBackoff(3, 100)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub max_batch_size: usize,
    /// Sleep when the queue is found empty.
    pub backoff: Duration,
    /// Upper bound on a single backend call.
    pub flush_timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            backoff: DEFAULT_BACKOFF,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), CreationError> {
        if self.workers == 0 {
            return Err(CreationError::ZeroWorkers);
        }
        if self.max_batch_size == 0 {
            return Err(CreationError::ZeroBatchSize);
        }
        if self.backoff.is_zero() {
            return Err(CreationError::ZeroBackoff);
        }
        if self.flush_timeout.is_zero() {
            return Err(CreationError::ZeroFlushTimeout);
        }
        Ok(())
    }
}

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    batches_flushed: AtomicU64,
    items_delivered: AtomicU64,
    items_dropped: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub batches_flushed: u64,
    pub items_delivered: u64,
    pub items_dropped: u64,
    pub retries: u64,
}

impl WorkerStats {
    fn record_batch(&self, delivered: usize, dropped: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.items_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.items_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// A fixed set of workers sharing one queue and one backend.
///
/// Dropping the pool cancels its workers without waiting for them.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Validates `config` and spawns `config.workers` tasks on the current
    /// runtime. Workers stop when `cancel` fires or the pool is dropped.
    pub fn start(
        queue: IngestQueue,
        backend: Arc<dyn Backend>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, CreationError> {
        config.validate()?;
        let cancel = cancel.child_token();
        let config = Arc::new(config);
        let stats = Arc::new(WorkerStats::default());

        let handles = (0..config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    backend: Arc::clone(&backend),
                    config: Arc::clone(&config),
                    stats: Arc::clone(&stats),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        debug!("Started {} batch workers", config.workers);
        Ok(Self {
            handles,
            cancel,
            stats,
        })
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancels every worker and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                error!("Batch worker failed: {e}");
            }
        }
        debug!("Batch workers stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    id: usize,
    queue: IngestQueue,
    backend: Arc<dyn Backend>,
    config: Arc<WorkerConfig>,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Batch worker started");
        loop {
            let batch = self.queue.try_dequeue_batch(self.config.max_batch_size);

            if batch.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.backoff) => continue,
                }
            }

            if self.cancel.is_cancelled() {
                debug!(worker = self.id, "Returning {} items to the queue", batch.len());
                self.queue.requeue(batch);
                break;
            }

            self.flush(batch).await;
        }
        debug!(worker = self.id, "Batch worker stopped");
    }

    /// Flushes `batch`, retrying failed items, then acknowledges all of it.
    async fn flush(&self, batch: Vec<QueueItem>) {
        let size = batch.len();
        let attempts = self.config.retry_strategy.attempts();
        let mut pending = batch;
        let mut delivered: Vec<QueueItem> = Vec::with_capacity(size);
        let mut rejected: Vec<QueueItem> = Vec::new();
        let mut attempt = 0;

        debug!(worker = self.id, "Flushing {size} items");

        loop {
            attempt += 1;
            match self.flush_once(&pending).await {
                Ok(()) => {
                    delivered.append(&mut pending);
                    break;
                }
                Err(FlushError::Partial {
                    failed,
                    rejected: rejected_positions,
                    message,
                }) => {
                    let total = pending.len();
                    let (retry, refused, ok) =
                        split_positions(pending, &failed, &rejected_positions);
                    warn!(
                        worker = self.id,
                        "{} of {total} items failed, {} rejected, on attempt {attempt}: {message}",
                        retry.len(),
                        refused.len()
                    );
                    delivered.extend(ok);
                    rejected.extend(refused);
                    pending = retry;
                    if pending.is_empty() {
                        break;
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(worker = self.id, "Flush attempt {attempt} failed: {e}");
                }
                Err(e) => {
                    error!(worker = self.id, "Flush failed permanently: {e}");
                    break;
                }
            }

            if attempt >= attempts {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(worker = self.id, "Shutting down during retry");
                    break;
                }
                _ = tokio::time::sleep(self.config.retry_strategy.delay(attempt)) => {}
            }
            self.stats.record_retry();
        }

        let dropped = pending.len() + rejected.len();
        if dropped > 0 {
            error!(
                worker = self.id,
                "Dropping {dropped} of {size} items after {attempt} attempts"
            );
        } else {
            debug!(worker = self.id, "Successfully flushed {size} items");
        }
        self.stats.record_batch(delivered.len(), dropped);

        for item in delivered.into_iter().chain(pending).chain(rejected) {
            self.queue.acknowledge(item);
        }
    }

    async fn flush_once(&self, items: &[QueueItem]) -> Result<(), FlushError> {
        let timeout = self.config.flush_timeout;
        match tokio::time::timeout(timeout, self.backend.flush(items)).await {
            Ok(result) => result,
            Err(_) => Err(FlushError::Timeout(timeout)),
        }
    }
}

/// Splits `items` into (failed, rejected, succeeded) by batch position.
/// A position listed as both failed and rejected is retried.
fn split_positions(
    items: Vec<QueueItem>,
    failed: &[usize],
    rejected: &[usize],
) -> (Vec<QueueItem>, Vec<QueueItem>, Vec<QueueItem>) {
    let failed: HashSet<usize> = failed.iter().copied().collect();
    let rejected: HashSet<usize> = rejected.iter().copied().collect();
    let mut split = (Vec::new(), Vec::new(), Vec::new());
    for (position, item) in items.into_iter().enumerate() {
        if failed.contains(&position) {
            split.0.push(item);
        } else if rejected.contains(&position) {
            split.1.push(item);
        } else {
            split.2.push(item);
        }
    }
    split
}
