// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk writes to an Elasticsearch cluster.
//!
//! A batch becomes one `_bulk` request: an action line naming the index and
//! type, then the point document, for every item. Per-item failures come
//! back as a partial failure: 429 and 5xx items are retried, other failed
//! items are reported as rejected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

use crate::backends::{check_status, destination_error, Backend};
use crate::error::{CreationError, FlushError};
use crate::handler::{DEFAULT_DOC_TYPE, DEFAULT_INDEX};
use crate::point::QueueItem;

#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. `http://127.0.0.1:9200`.
    pub url: String,
    /// Index used for items that carry no destination.
    pub index: String,
    pub doc_type: String,
    pub timeout: Duration,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9200".to_string(),
            index: DEFAULT_INDEX.to_string(),
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkTarget<'a>,
}

#[derive(Serialize)]
struct BulkTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    doc_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    bulk_url: String,
    index: String,
    doc_type: String,
}

impl ElasticsearchBackend {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, CreationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CreationError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", config.url.trim_end_matches('/')),
            index: config.index,
            doc_type: config.doc_type,
        })
    }

    fn encode(&self, batch: &[QueueItem]) -> Result<Vec<u8>, FlushError> {
        let mut body = Vec::new();
        for item in batch {
            let (index, doc_type) = match &item.destination {
                Some(destination) => (destination.index.as_str(), destination.doc_type.as_str()),
                None => (self.index.as_str(), self.doc_type.as_str()),
            };
            let action = BulkAction {
                index: BulkTarget { index, doc_type },
            };
            serde_json::to_writer(&mut body, &action)
                .map_err(|e| FlushError::Payload(e.to_string()))?;
            body.push(b'\n');
            serde_json::to_writer(&mut body, &item.point)
                .map_err(|e| FlushError::Payload(e.to_string()))?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

/// Splits the failed items of a bulk response into positions worth
/// retrying and positions rejected for good. Entries past `batch_len` are
/// ignored.
fn failed_positions(response: &BulkResponse, batch_len: usize) -> (Vec<usize>, Vec<usize>) {
    let mut retry = Vec::new();
    let mut rejected = Vec::new();
    for (position, item) in response.items.iter().take(batch_len).enumerate() {
        let Some(result) = item.values().next() else {
            continue;
        };
        match result.status {
            status if status < 300 => {}
            status if status == 429 || status >= 500 => retry.push(position),
            status => {
                error!(
                    "Document rejected by Elasticsearch with status {status}: {}",
                    result.error.as_ref().map(ToString::to_string).unwrap_or_default()
                );
                rejected.push(position);
            }
        }
    }
    (retry, rejected)
}

#[async_trait]
impl Backend for ElasticsearchBackend {
    async fn flush(&self, batch: &[QueueItem]) -> Result<(), FlushError> {
        let body = self.encode(batch)?;
        let resp = self
            .client
            .post(&self.bulk_url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| destination_error(&e))?;
        let resp = check_status(resp).await?;
        let status = resp.status().as_u16();

        let bulk: BulkResponse = resp.json().await.map_err(|e| FlushError::Destination {
            status: Some(status),
            message: format!("Invalid bulk response: {e}"),
        })?;
        if !bulk.errors {
            debug!("Bulk indexed {} documents", batch.len());
            return Ok(());
        }

        let (retry, rejected) = failed_positions(&bulk, batch.len());
        if retry.is_empty() && rejected.is_empty() {
            debug!("Bulk indexed {} documents", batch.len());
            return Ok(());
        }
        Err(FlushError::Partial {
            message: format!(
                "{} documents throttled or failed, {} rejected",
                retry.len(),
                rejected.len()
            ),
            failed: retry,
            rejected,
        })
    }
}
