// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use datagen::{
    agent::{Agent, AgentConfig, Cadence, StopCondition},
    backends::Backend,
    error::{FlushError, HandlerError},
    handler::{Handler, Route},
    pipeline::Pipeline,
    point::{Point, QueueItem},
    worker::{RetryStrategy, WorkerConfig},
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration};

/// Remembers the destination index of every item it accepted.
#[derive(Default)]
struct RecordingBackend {
    indexes: Mutex<Vec<String>>,
    fail_first: AtomicU64,
}

impl RecordingBackend {
    fn failing_first(calls: u64) -> Self {
        Self {
            indexes: Mutex::default(),
            fail_first: AtomicU64::new(calls),
        }
    }

    fn indexes(&self) -> Vec<String> {
        self.indexes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn flush(&self, batch: &[QueueItem]) -> Result<(), FlushError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(FlushError::Destination {
                status: Some(503),
                message: "unavailable".to_string(),
            });
        }
        let mut indexes = self.indexes.lock().unwrap();
        for item in batch {
            let destination = item.destination.as_ref().expect("queued items carry a destination");
            indexes.push(destination.index.clone());
        }
        Ok(())
    }
}

struct FailingHandler;

impl Handler for FailingHandler {
    fn handle(&self, _point: &Point) -> Result<(), HandlerError> {
        Err(HandlerError::Other("always fails".to_string()))
    }
}

struct PanickingHandler;

impl Handler for PanickingHandler {
    fn handle(&self, _point: &Point) -> Result<(), HandlerError> {
        panic!("handler bug");
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        workers: 2,
        max_batch_size: 4,
        backoff: Duration::from_millis(5),
        flush_timeout: Duration::from_secs(1),
        retry_strategy: RetryStrategy::Immediate(3),
    }
}

/// Each point is routed to "<agent>-<sequence>" so every delivery is unique.
fn sequenced_route() -> Route {
    let sequence = Arc::new(AtomicU64::new(0));
    Route::Dynamic(Arc::new(move |point: &Point| {
        let seq = sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}-{seq}", point.name())
    }))
}

fn agent(pipeline: &Pipeline, name: &str, stop: StopCondition, cadence: Cadence) -> Agent {
    Agent::new(AgentConfig {
        name: name.to_string(),
        stop,
        cadence,
        handlers: vec![Arc::new(pipeline.handler(sequenced_route(), "random"))],
        ..Default::default()
    })
    .expect("failed to create agent")
}

#[tokio::test]
async fn bounded_agents_deliver_every_point_once() {
    let backend = Arc::new(RecordingBackend::default());
    let pipeline =
        Pipeline::start(backend.clone(), worker_config()).expect("failed to start pipeline");

    let stop = StopCondition {
        max_points: Some(10),
        duration: None,
    };
    let agents = (1..=3)
        .map(|i| {
            agent(
                &pipeline,
                &format!("agent.random.{i}"),
                stop,
                Cadence::Fixed(Duration::ZERO),
            )
        })
        .collect();

    let report = timeout(Duration::from_secs(10), pipeline.run_agents(agents))
        .await
        .expect("pipeline did not drain");

    assert_eq!(report.total_points, 30);
    assert_eq!(report.failed_agents, 0);
    assert_eq!(report.agents.len(), 3);
    assert!(report.agents.iter().all(|agent| agent.points_emitted == 10));

    let indexes = backend.indexes();
    assert_eq!(indexes.len(), 30);
    let unique: HashSet<&String> = indexes.iter().collect();
    assert_eq!(unique.len(), 30);
    for i in 1..=3 {
        for seq in 0..10 {
            assert!(unique.contains(&format!("agent.random.{i}-{seq}")));
        }
    }

    assert_eq!(pipeline.queue().outstanding(), 0);
    assert_eq!(pipeline.stats().items_delivered, 30);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn cancelled_agents_still_drain() {
    let backend = Arc::new(RecordingBackend::default());
    let pipeline =
        Pipeline::start(backend.clone(), worker_config()).expect("failed to start pipeline");

    let agents = (1..=4)
        .map(|i| {
            agent(
                &pipeline,
                &format!("agent.random.{i}"),
                StopCondition::default(),
                Cadence::Fixed(Duration::from_millis(1)),
            )
        })
        .collect();

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = timeout(Duration::from_secs(10), pipeline.run_agents(agents))
        .await
        .expect("cancelled agents did not return");

    assert!(report.total_points >= 4);
    assert_eq!(backend.indexes().len() as u64, report.total_points);
    assert_eq!(pipeline.queue().outstanding(), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn transient_backend_errors_are_retried() {
    let backend = Arc::new(RecordingBackend::failing_first(2));
    let config = WorkerConfig {
        workers: 1,
        ..worker_config()
    };
    let pipeline = Pipeline::start(backend.clone(), config).expect("failed to start pipeline");

    let stop = StopCondition {
        max_points: Some(3),
        duration: None,
    };
    let agents = vec![agent(
        &pipeline,
        "agent.random.1",
        stop,
        Cadence::Fixed(Duration::ZERO),
    )];

    let report = timeout(Duration::from_secs(10), pipeline.run_agents(agents))
        .await
        .expect("pipeline did not drain");

    assert_eq!(report.total_points, 3);
    assert_eq!(backend.indexes().len(), 3);
    let stats = pipeline.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.items_dropped, 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn failing_handler_does_not_stop_delivery() {
    let backend = Arc::new(RecordingBackend::default());
    let pipeline =
        Pipeline::start(backend.clone(), worker_config()).expect("failed to start pipeline");

    let agent = Agent::new(AgentConfig {
        name: "agent.random.1".to_string(),
        stop: StopCondition {
            max_points: Some(5),
            duration: None,
        },
        cadence: Cadence::Fixed(Duration::ZERO),
        handlers: vec![
            Arc::new(FailingHandler),
            Arc::new(pipeline.handler(Route::default(), "random")),
        ],
        ..Default::default()
    })
    .expect("failed to create agent");

    let report = timeout(Duration::from_secs(10), pipeline.run_agents(vec![agent]))
        .await
        .expect("pipeline did not drain");

    assert_eq!(report.total_points, 5);
    assert_eq!(backend.indexes(), vec!["datagen".to_string(); 5]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn panicking_handler_only_ends_its_agent() {
    let backend = Arc::new(RecordingBackend::default());
    let pipeline =
        Pipeline::start(backend.clone(), worker_config()).expect("failed to start pipeline");

    let stop = StopCondition {
        max_points: Some(10),
        duration: None,
    };
    let mut agents: Vec<Agent> = (1..=2)
        .map(|i| {
            agent(
                &pipeline,
                &format!("agent.random.{i}"),
                stop,
                Cadence::Fixed(Duration::ZERO),
            )
        })
        .collect();
    agents.push(
        Agent::new(AgentConfig {
            name: "agent.broken".to_string(),
            stop,
            cadence: Cadence::Fixed(Duration::ZERO),
            handlers: vec![Arc::new(PanickingHandler)],
            ..Default::default()
        })
        .expect("failed to create agent"),
    );

    let report = timeout(Duration::from_secs(10), pipeline.run_agents(agents))
        .await
        .expect("pipeline did not drain");

    assert_eq!(report.failed_agents, 1);
    assert_eq!(report.agents.len(), 2);
    assert!(report.agents.iter().all(|agent| agent.points_emitted == 10));
    assert_eq!(report.total_points, 20);
    assert_eq!(backend.indexes().len(), 20);
    assert_eq!(pipeline.queue().outstanding(), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_without_agents_returns() {
    let backend = Arc::new(RecordingBackend::default());
    let pipeline = Pipeline::start(backend, worker_config()).expect("failed to start pipeline");

    let report = pipeline.run_agents(Vec::new()).await;
    assert_eq!(report.total_points, 0);

    timeout(Duration::from_secs(1), pipeline.shutdown())
        .await
        .expect("shutdown hung");
}
