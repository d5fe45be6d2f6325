// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the Blueflood metrics store.
//!
//! Writes go to the ingest port as a JSON array of [`Datapoint`]s; reads go
//! to the query port. Both live under `/v2.0/{tenant}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::backends::{check_status, destination_error, Backend};
use crate::error::{CreationError, FlushError, QueryError};
use crate::point::{Point, QueueItem};

/// 180 days.
pub const DEFAULT_TTL_SECONDS: i64 = 60 * 60 * 24 * 180;
pub const DEFAULT_WRITE_PORT: u16 = 19000;
pub const DEFAULT_READ_PORT: u16 = 20000;

/// One metric sample in the shape Blueflood ingests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoint {
    pub metric_name: String,
    pub metric_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_time: Option<i64>,
    pub ttl_in_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Datapoint {
    /// Builds a datapoint, clamping negative times and TTLs to zero.
    ///
    /// A missing or zero TTL falls back to [`DEFAULT_TTL_SECONDS`].
    pub fn new(
        metric_name: impl Into<String>,
        metric_value: f64,
        collection_time_ms: Option<i64>,
        ttl_seconds: Option<i64>,
        unit: Option<String>,
    ) -> Self {
        let ttl_in_seconds = match ttl_seconds {
            None | Some(0) => DEFAULT_TTL_SECONDS,
            Some(ttl) => ttl.max(0),
        };
        Self {
            metric_name: metric_name.into(),
            metric_value,
            collection_time: collection_time_ms.map(|time| time.max(0)),
            ttl_in_seconds,
            unit,
        }
    }

    pub fn from_point(point: &Point, ttl_seconds: Option<i64>, unit: Option<String>) -> Self {
        Self::new(
            point.name(),
            point.value() as f64,
            Some(point.timestamp_ms()),
            ttl_seconds,
            unit,
        )
    }
}

/// Rollup granularity for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Full,
    Min5,
    Min20,
    Min60,
    Min240,
    Min1440,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Full => "FULL",
            Resolution::Min5 => "MIN5",
            Resolution::Min20 => "MIN20",
            Resolution::Min60 => "MIN60",
            Resolution::Min240 => "MIN240",
            Resolution::Min1440 => "MIN1440",
        }
    }
}

/// Statistics that can be requested alongside a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selectable {
    Average,
    Min,
    Max,
    NumPoints,
    Variance,
}

impl Selectable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selectable::Average => "average",
            Selectable::Min => "min",
            Selectable::Max => "max",
            Selectable::NumPoints => "numPoints",
            Selectable::Variance => "variance",
        }
    }

    pub fn all() -> &'static [Selectable] {
        &[
            Selectable::Average,
            Selectable::Min,
            Selectable::Max,
            Selectable::NumPoints,
            Selectable::Variance,
        ]
    }
}

/// A read window between two times given in seconds, shared by single and
/// multi-metric reads.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub start_secs: f64,
    pub stop_secs: f64,
    /// Ignored when `resolution` is set.
    pub points: Option<u32>,
    pub resolution: Option<Resolution>,
    pub select: Vec<Selectable>,
}

impl MetricQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("from", to_millis(self.start_secs).to_string()),
            ("to", to_millis(self.stop_secs).to_string()),
        ];
        if let Some(resolution) = self.resolution {
            params.push(("resolution", resolution.as_str().to_string()));
        } else if let Some(points) = self.points {
            params.push(("points", points.to_string()));
        }
        let select = selects(&self.select);
        if !select.is_empty() {
            params.push(("select", select));
        }
        params
    }
}

/// Seconds to milliseconds, with negative times clamped to zero.
fn to_millis(secs: f64) -> i64 {
    (secs.max(0.0) * 1000.0) as i64
}

/// Comma separated selectables, in canonical order and without duplicates.
fn selects(requested: &[Selectable]) -> String {
    Selectable::all()
        .iter()
        .filter(|selectable| requested.contains(selectable))
        .map(Selectable::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone)]
pub struct BluefloodConfig {
    pub host: String,
    pub tenant_id: String,
    pub write_port: u16,
    pub read_port: u16,
    pub timeout: Duration,
    /// Applied to every ingested point. `None` means the default retention.
    pub ttl_seconds: Option<i64>,
    pub unit: Option<String>,
}

impl Default for BluefloodConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tenant_id: "datagen".to_string(),
            write_port: DEFAULT_WRITE_PORT,
            read_port: DEFAULT_READ_PORT,
            timeout: Duration::from_secs(5),
            ttl_seconds: None,
            unit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BluefloodBackend {
    client: reqwest::Client,
    write_url: String,
    read_url: String,
    ttl_seconds: Option<i64>,
    unit: Option<String>,
}

impl BluefloodBackend {
    pub fn new(config: BluefloodConfig) -> Result<Self, CreationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CreationError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            write_url: format!(
                "http://{}:{}/v2.0/{}",
                config.host, config.write_port, config.tenant_id
            ),
            read_url: format!(
                "http://{}:{}/v2.0/{}",
                config.host, config.read_port, config.tenant_id
            ),
            ttl_seconds: config.ttl_seconds,
            unit: config.unit,
        })
    }

    /// Posts `points` to the ingest endpoint.
    pub async fn ingest(&self, points: &[Datapoint]) -> Result<(), FlushError> {
        let resp = self
            .client
            .post(format!("{}/ingest", self.write_url))
            .json(points)
            .send()
            .await
            .map_err(|e| destination_error(&e))?;
        check_status(resp).await?;
        debug!("Ingested {} datapoints", points.len());
        Ok(())
    }

    /// Lists the metric names matching `query` (`*` for all).
    pub async fn metric_list(&self, query: &str) -> Result<serde_json::Value, QueryError> {
        let resp = self
            .client
            .get(format!("{}/metrics/search", self.read_url))
            .query(&[("query", query)])
            .send()
            .await?;
        Self::read_json(resp).await
    }

    pub async fn get_metric(
        &self,
        metric: &str,
        query: &MetricQuery,
    ) -> Result<serde_json::Value, QueryError> {
        let resp = self
            .client
            .get(format!("{}/views/{metric}", self.read_url))
            .query(&query.params())
            .send()
            .await?;
        Self::read_json(resp).await
    }

    /// Reads several metrics in one request. The names travel as a JSON
    /// array in the body.
    pub async fn get_metrics(
        &self,
        metrics: &[String],
        query: &MetricQuery,
    ) -> Result<serde_json::Value, QueryError> {
        let resp = self
            .client
            .post(format!("{}/views", self.read_url))
            .query(&query.params())
            .json(metrics)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, QueryError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(QueryError::Server {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Backend for BluefloodBackend {
    async fn flush(&self, batch: &[QueueItem]) -> Result<(), FlushError> {
        let points: Vec<Datapoint> = batch
            .iter()
            .map(|item| Datapoint::from_point(&item.point, self.ttl_seconds, self.unit.clone()))
            .collect();
        self.ingest(&points).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datapoint_defaults() {
        let datapoint = Datapoint::new("cpu", 12.5, None, None, None);
        assert_eq!(datapoint.ttl_in_seconds, DEFAULT_TTL_SECONDS);
        assert_eq!(datapoint.collection_time, None);

        let json = serde_json::to_value(&datapoint).expect("failed to serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "metricName": "cpu",
                "metricValue": 12.5,
                "ttlInSeconds": 15_552_000,
            })
        );
    }

    #[test]
    fn test_datapoint_clamps_negative_values() {
        let datapoint = Datapoint::new("cpu", 1.0, Some(-5), Some(-10), Some("percent".into()));
        assert_eq!(datapoint.collection_time, Some(0));
        assert_eq!(datapoint.ttl_in_seconds, 0);
        assert_eq!(datapoint.unit.as_deref(), Some("percent"));
    }

    #[test]
    fn test_datapoint_from_point() {
        let point = Point::new("agent.random.1", 42, 1_700_000_000_000);
        let datapoint = Datapoint::from_point(&point, Some(3600), None);
        assert_eq!(datapoint.metric_name, "agent.random.1");
        assert_eq!(datapoint.metric_value, 42.0);
        assert_eq!(datapoint.collection_time, Some(1_700_000_000_000));
        assert_eq!(datapoint.ttl_in_seconds, 3600);
    }

    #[test]
    fn test_query_params_prefers_resolution() {
        let query = MetricQuery {
            start_secs: -3.0,
            stop_secs: 1.5,
            points: Some(100),
            resolution: Some(Resolution::Min5),
            select: vec![Selectable::Variance, Selectable::Average, Selectable::Average],
        };
        assert_eq!(
            query.params(),
            vec![
                ("from", "0".to_string()),
                ("to", "1500".to_string()),
                ("resolution", "MIN5".to_string()),
                ("select", "average,variance".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_params_points_without_select() {
        let query = MetricQuery {
            start_secs: 10.0,
            stop_secs: 20.0,
            points: Some(100),
            resolution: None,
            select: vec![],
        };
        assert_eq!(
            query.params(),
            vec![
                ("from", "10000".to_string()),
                ("to", "20000".to_string()),
                ("points", "100".to_string()),
            ]
        );
    }
}
