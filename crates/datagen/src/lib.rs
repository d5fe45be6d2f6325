// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synthetic metric agents feeding a batching ingestion pipeline.
//!
//! Agents emit random [`point::Point`]s on a cadence and hand them to their
//! [`handler::Handler`]s. The [`handler::QueueHandler`] places them on an
//! [`queue::IngestQueue`], which a [`worker::WorkerPool`] drains in batches
//! into a [`backends::Backend`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod backends;
pub mod config;
pub mod error;
pub mod handler;
pub mod logger;
pub mod pipeline;
pub mod point;
pub mod queue;
pub mod worker;
