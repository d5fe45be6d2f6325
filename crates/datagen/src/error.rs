// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors raised while building agents, worker pools or pipelines.
///
/// Every one of these is detected at construction, never mid-run.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CreationError {
    #[error("Invalid value range: high ({high}) must be greater than low ({low})")]
    InvalidRange { low: i64, high: i64 },

    #[error("Batch size must be greater than 0")]
    ZeroBatchSize,

    #[error("Backoff interval must be greater than 0")]
    ZeroBackoff,

    #[error("Worker count must be greater than 0")]
    ZeroWorkers,

    #[error("Flush timeout must be greater than 0")]
    ZeroFlushTimeout,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Error returned by a [`crate::handler::Handler`] that could not process a point.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Failed to serialize point: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write point: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Outcome of a failed flush against a [`crate::backends::Backend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlushError {
    /// The batch could not be encoded. Retrying will not help.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// The backend could not be reached or answered with an error status.
    #[error("Error shipping data: {status:?} {message}")]
    Destination {
        status: Option<u16>,
        message: String,
    },

    /// Only some items of the batch were not stored. Items at `failed`
    /// positions may be sent again, items at `rejected` positions never will.
    #[error("{} items failed, {} rejected: {message}", failed.len(), rejected.len())]
    Partial {
        failed: Vec<usize>,
        rejected: Vec<usize>,
        message: String,
    },

    #[error("Flush timed out after {0:?}")]
    Timeout(Duration),
}

impl FlushError {
    /// Whether sending the same items again may succeed.
    ///
    /// 4xx answers are permanent, as are payload errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlushError::Payload(_) => false,
            FlushError::Destination { status, .. } => {
                !status.is_some_and(|code| (400..500).contains(&code) && code != 429)
            }
            FlushError::Partial { .. } => true,
            FlushError::Timeout(_) => true,
        }
    }
}

/// Errors raised by the read side of a backend client.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned error: {status} - {body}")]
    Server { status: u16, body: String },
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown backend '{0}'. Must be one of: elasticsearch, blueflood")]
    UnknownBackend(String),
}
