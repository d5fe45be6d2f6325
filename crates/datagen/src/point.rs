// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Points produced by agents and the items that carry them through the queue.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single synthetic measurement.
///
/// Points are immutable once measured; every downstream consumer reads them
/// through shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Point {
    name: String,
    value: i64,
    #[serde(rename = "time")]
    timestamp_ms: i64,
}

impl Point {
    pub fn new(name: impl Into<String>, value: i64, timestamp_ms: i64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Where a queued point should land in a document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub index: String,
    pub doc_type: String,
}

/// A point travelling from a handler to a worker.
///
/// Items are moved, never cloned, on their way through the queue: the
/// handler gives one up on enqueue and the worker gives it up on
/// acknowledgment.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub point: Point,
    pub destination: Option<Destination>,
}

impl QueueItem {
    pub fn new(point: Point) -> Self {
        Self {
            point,
            destination: None,
        }
    }

    pub fn with_destination(point: Point, destination: Destination) -> Self {
        Self {
            point,
            destination: Some(destination),
        }
    }
}

/// Milliseconds since the unix epoch, or 0 if the clock is set before it.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
