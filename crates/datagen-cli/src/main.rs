// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use datagen::{
    agent::{Agent, AgentConfig, Cadence, StopCondition},
    config::DatagenConfig,
    handler::{Handler, PrintHandler, Route},
    logger::{self, Formatter},
    pipeline::Pipeline,
};

#[derive(Parser)]
#[command(name = "datagen")]
#[command(about = "Spawns random metric agents and pushes their points to a backend")]
#[command(version)]
struct Cli {
    /// Number of agents to run
    agents: usize,

    /// Points emitted by each agent
    points: u64,

    /// Delay between two points of the same agent, in milliseconds. 0 pushes
    /// as fast as the pipeline accepts
    #[arg(short, long, default_value = "0")]
    interval_ms: u64,

    /// Lowest value an agent may emit
    #[arg(long, default_value = "0")]
    range_start: i64,

    /// Exclusive upper bound of emitted values
    #[arg(long, default_value = "100")]
    range_stop: i64,

    /// Stop every agent after this many seconds even if points remain
    #[arg(short, long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DatagenConfig::from_env().context("invalid DATAGEN_* configuration")?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(logger::env_filter(&config.log_level))
                .context("could not parse log level in configuration")?,
        )
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let backend = config
        .build_backend()
        .context("failed to create backend")?;
    let pipeline =
        Pipeline::start(backend, config.worker_config()).context("failed to start workers")?;

    let printer: Option<Arc<dyn Handler>> = config
        .print_points
        .then(|| Arc::new(PrintHandler::stdout()) as Arc<dyn Handler>);
    let route = Route::Fixed(config.es_index.clone());

    let agents = (1..=cli.agents)
        .map(|i| {
            let mut handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(
                pipeline.handler(route.clone(), config.es_doc_type.clone()),
            )];
            handlers.extend(printer.clone());
            Agent::new(AgentConfig {
                name: format!("agent.random.{i}"),
                range_start: cli.range_start,
                range_stop: cli.range_stop,
                stop: StopCondition {
                    max_points: Some(cli.points),
                    duration: cli.duration_secs.map(Duration::from_secs),
                },
                cadence: Cadence::Fixed(Duration::from_millis(cli.interval_ms)),
                handlers,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .context("failed to create agents")?;

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping agents and draining the queue");
                cancel.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {e}"),
        }
    });

    info!("Starting {} agents with {:?} backend", cli.agents, config.backend);
    let report = pipeline.run_agents(agents).await;
    let stats = pipeline.stats();
    if report.failed_agents > 0 || stats.items_dropped > 0 {
        warn!(
            "{} agents failed, {} points dropped by the backend",
            report.failed_agents, stats.items_dropped
        );
    }
    pipeline.shutdown().await;

    println!(
        "Pushed {} points in {:.3} seconds.",
        report.total_points,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
