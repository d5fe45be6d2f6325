// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage backends the worker pool flushes batches to.

use async_trait::async_trait;
use reqwest::Response;

use crate::error::FlushError;
use crate::point::QueueItem;

pub mod blueflood;
pub mod elasticsearch;

/// Accepts an ordered batch of queued points in one bulk call.
///
/// Returning [`FlushError::Partial`] tells the worker which positions of
/// `batch` failed; only those are sent again.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn flush(&self, batch: &[QueueItem]) -> Result<(), FlushError>;
}

pub(crate) fn destination_error(e: &reqwest::Error) -> FlushError {
    FlushError::Destination {
        status: e.status().map(|status| status.as_u16()),
        message: e.to_string(),
    }
}

/// Turns a non-2xx answer into a [`FlushError::Destination`].
pub(crate) async fn check_status(resp: Response) -> Result<Response, FlushError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(FlushError::Destination {
        status: Some(status.as_u16()),
        message: resp.text().await.unwrap_or_default(),
    })
}
