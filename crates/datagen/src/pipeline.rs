// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline owns the ingestion queue and the worker pool, hands out
//! queue-backed handlers, and runs agents to completion.
//!
//! ```text
//!   Agent ─┐                                ┌─ Worker ─┐
//!   Agent ─┼─▶ QueueHandler ─▶ IngestQueue ─┼─ Worker ─┼─▶ Backend
//!   Agent ─┘                                └─ Worker ─┘
//! ```
//!
//! Shutdown runs in a fixed order: every agent returns, the queue drains,
//! then the workers are cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::agent::{Agent, AgentReport};
use crate::backends::Backend;
use crate::error::CreationError;
use crate::handler::{QueueHandler, Route};
use crate::queue::IngestQueue;
use crate::worker::{WorkerConfig, WorkerPool, WorkerStatsSnapshot};

/// Totals reported once every agent finished and the queue drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub agents: Vec<AgentReport>,
    pub total_points: u64,
    pub elapsed: Duration,
    /// Agents whose task panicked. Their points are not in `total_points`.
    pub failed_agents: usize,
}

pub struct Pipeline {
    queue: IngestQueue,
    workers: WorkerPool,
    agents_cancel: CancellationToken,
}

impl Pipeline {
    /// Starts the worker pool against `backend`.
    pub fn start(backend: Arc<dyn Backend>, config: WorkerConfig) -> Result<Self, CreationError> {
        let queue = IngestQueue::new();
        let workers = WorkerPool::start(
            queue.clone(),
            backend,
            config,
            CancellationToken::new(),
        )?;
        Ok(Self {
            queue,
            workers,
            agents_cancel: CancellationToken::new(),
        })
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    /// A handler that routes points with `route` onto this pipeline's queue.
    pub fn handler(&self, route: Route, doc_type: impl Into<String>) -> QueueHandler {
        QueueHandler::new(self.queue.clone(), route, doc_type)
    }

    /// Cancelling this token stops every agent started by [`Pipeline::run_agents`].
    /// The queue still drains afterwards.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.agents_cancel.clone()
    }

    /// Runs every agent concurrently, waits for all of them, then waits for
    /// the queue to drain.
    pub async fn run_agents(&self, agents: Vec<Agent>) -> RunReport {
        let start = Instant::now();
        let mut set = JoinSet::new();
        for agent in agents {
            debug!("Spawning agent {}", agent.name());
            set.spawn(agent.run(self.agents_cancel.child_token()));
        }

        let mut reports = Vec::with_capacity(set.len());
        let mut failed_agents = 0;
        while let Some(result) = set.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Agent task failed: {e}");
                    failed_agents += 1;
                }
            }
        }

        debug!(
            "All agents finished, waiting for {} outstanding items",
            self.queue.outstanding()
        );
        self.drain().await;

        let elapsed = start.elapsed();
        let total_points = reports.iter().map(|report| report.points_emitted).sum();
        info!(
            "Pushed {total_points} points in {:.3} seconds",
            elapsed.as_secs_f64()
        );
        RunReport {
            agents: reports,
            total_points,
            elapsed,
            failed_agents,
        }
    }

    /// Waits until the backend has seen every enqueued item.
    pub async fn drain(&self) {
        self.queue.await_drain().await;
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.workers.stats()
    }

    /// Stops agents that are still running and the worker pool.
    pub async fn shutdown(self) {
        self.agents_cancel.cancel();
        self.workers.shutdown().await;
    }
}
