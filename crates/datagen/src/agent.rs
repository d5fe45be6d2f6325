// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Random metric agents.
//!
//! An agent measures a point, hands it to each of its handlers in order,
//! checks its stop condition and then waits out its cadence. The check
//! always comes after the dispatch, so an agent emits at least one point.

use rand::Rng;
use std::fmt::Debug;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CreationError;
use crate::handler::Handler;
use crate::point::{now_ms, Point};

pub type DelayFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type DelayFn = Arc<dyn Fn() -> DelayFuture + Send + Sync>;

/// How long an agent waits between two points.
#[derive(Clone)]
pub enum Cadence {
    Fixed(Duration),
    /// The agent awaits the returned future; what it does in between is up
    /// to the function.
    Dynamic(DelayFn),
}

impl Cadence {
    /// Sleeps a uniformly random duration in `[0, max)` between points.
    pub fn uniform(max: Duration) -> Self {
        Cadence::Dynamic(Arc::new(move || -> DelayFuture {
            let delay = if max.is_zero() {
                Duration::ZERO
            } else {
                max.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
            };
            Box::pin(tokio::time::sleep(delay))
        }))
    }

    async fn wait(&self) {
        match self {
            Cadence::Fixed(delay) if delay.is_zero() => tokio::task::yield_now().await,
            Cadence::Fixed(delay) => tokio::time::sleep(*delay).await,
            Cadence::Dynamic(delay_fn) => delay_fn().await,
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::Fixed(Duration::from_secs(1))
    }
}

impl Debug for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Fixed(delay) => write!(f, "Cadence::Fixed({delay:?})"),
            Cadence::Dynamic(_) => write!(f, "Cadence::Dynamic"),
        }
    }
}

/// When an agent stops. With neither limit set it runs until cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopCondition {
    pub max_points: Option<u64>,
    pub duration: Option<Duration>,
}

impl StopCondition {
    pub fn is_met(&self, points_emitted: u64, elapsed: Duration) -> bool {
        self.max_points.is_some_and(|max| points_emitted >= max)
            || self.duration.is_some_and(|duration| elapsed > duration)
    }
}

pub struct AgentConfig {
    pub name: String,
    pub range_start: i64,
    /// Exclusive.
    pub range_stop: i64,
    pub stop: StopCondition,
    pub cadence: Cadence,
    pub handlers: Vec<Arc<dyn Handler>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "randomagent".to_string(),
            range_start: 0,
            range_stop: 100,
            stop: StopCondition::default(),
            cadence: Cadence::default(),
            handlers: Vec::new(),
        }
    }
}

/// What an agent did during its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReport {
    pub name: String,
    pub points_emitted: u64,
    pub elapsed: Duration,
}

/// Emits uniformly random integer points.
///
/// [`Agent::run`] takes the agent by value, so an agent runs at most once.
pub struct Agent {
    name: String,
    range: Range<i64>,
    stop: StopCondition,
    cadence: Cadence,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, CreationError> {
        if config.range_stop <= config.range_start {
            return Err(CreationError::InvalidRange {
                low: config.range_start,
                high: config.range_stop,
            });
        }
        Ok(Self {
            name: config.name,
            range: config.range_start..config.range_stop,
            stop: config.stop,
            cadence: config.cadence,
            handlers: config.handlers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn measure(&self) -> Point {
        let value = rand::thread_rng().gen_range(self.range.clone());
        Point::new(self.name.clone(), value, now_ms())
    }

    fn dispatch(&self, point: &Point) {
        for (position, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.handle(point) {
                warn!(agent = %self.name, handler = position, "Handler failed, skipping point: {e}");
            }
        }
    }

    /// Emits points until the stop condition holds or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> AgentReport {
        let start = Instant::now();
        let mut points_emitted: u64 = 0;
        debug!(agent = %self.name, "Agent started");

        loop {
            if cancel.is_cancelled() {
                debug!(agent = %self.name, "Agent cancelled");
                break;
            }

            let point = self.measure();
            points_emitted += 1;
            self.dispatch(&point);

            if self.stop.is_met(points_emitted, start.elapsed()) {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(agent = %self.name, "Agent cancelled while waiting");
                    break;
                }
                _ = self.cadence.wait() => {}
            }
        }

        let elapsed = start.elapsed();
        debug!(agent = %self.name, points_emitted, "Agent finished in {elapsed:?}");
        AgentReport {
            name: self.name,
            points_emitted,
            elapsed,
        }
    }
}

impl Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("range", &self.range)
            .field("stop", &self.stop)
            .field("cadence", &self.cadence)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
