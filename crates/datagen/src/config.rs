// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::blueflood::{BluefloodBackend, BluefloodConfig};
use crate::backends::elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
use crate::backends::Backend;
use crate::error::{ConfigError, CreationError};
use crate::handler::{DEFAULT_DOC_TYPE, DEFAULT_INDEX};
use crate::worker::{
    RetryStrategy, WorkerConfig, DEFAULT_BACKOFF, DEFAULT_FLUSH_TIMEOUT, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_WORKERS,
};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which store the worker pool writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Elasticsearch,
    Blueflood,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(BackendKind::Elasticsearch),
            "blueflood" => Ok(BackendKind::Blueflood),
            _ => Err(ConfigError::UnknownBackend(value.to_string())),
        }
    }
}

/// Runtime configuration, read from `DATAGEN_*` environment variables.
#[derive(Debug, Clone)]
pub struct DatagenConfig {
    pub backend: BackendKind,
    /// Elasticsearch base URL
    pub es_url: String,
    /// Elasticsearch index for points without a routed destination
    pub es_index: String,
    pub es_doc_type: String,
    pub blueflood_host: String,
    pub blueflood_tenant: String,
    /// Also pretty-print every point to stdout
    pub print_points: bool,
    pub workers: usize,
    pub batch_size: usize,
    pub backoff: Duration,
    pub flush_timeout: Duration,
    pub retry_attempts: u64,
    pub retry_delay_ms: u64,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for DatagenConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Elasticsearch,
            es_url: "http://127.0.0.1:9200".to_string(),
            es_index: DEFAULT_INDEX.to_string(),
            es_doc_type: DEFAULT_DOC_TYPE.to_string(),
            blueflood_host: "127.0.0.1".to_string(),
            blueflood_tenant: "datagen".to_string(),
            print_points: false,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_MAX_BATCH_SIZE,
            backoff: DEFAULT_BACKOFF,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            retry_attempts: 3,
            retry_delay_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

impl DatagenConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable numbers
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|val| val.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let backend = match lookup("DATAGEN_BACKEND") {
            Some(val) => BackendKind::parse(&val)?,
            None => defaults.backend,
        };

        let config = Self {
            backend,
            es_url: lookup("DATAGEN_ES_URL").unwrap_or(defaults.es_url),
            es_index: lookup("DATAGEN_ES_INDEX").unwrap_or(defaults.es_index),
            es_doc_type: lookup("DATAGEN_ES_TYPE").unwrap_or(defaults.es_doc_type),
            blueflood_host: lookup("DATAGEN_BLUEFLOOD_HOST").unwrap_or(defaults.blueflood_host),
            blueflood_tenant: lookup("DATAGEN_BLUEFLOOD_TENANT")
                .unwrap_or(defaults.blueflood_tenant),
            print_points: lookup("DATAGEN_PRINT_POINTS")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(defaults.print_points),
            workers: number("DATAGEN_WORKERS", defaults.workers as u64) as usize,
            batch_size: number("DATAGEN_BATCH_SIZE", defaults.batch_size as u64) as usize,
            backoff: Duration::from_millis(number(
                "DATAGEN_BACKOFF_MS",
                defaults.backoff.as_millis() as u64,
            )),
            flush_timeout: Duration::from_secs(number(
                "DATAGEN_FLUSH_TIMEOUT_SECS",
                defaults.flush_timeout.as_secs(),
            )),
            retry_attempts: number("DATAGEN_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_delay_ms: number("DATAGEN_RETRY_DELAY_MS", defaults.retry_delay_ms),
            log_level: lookup("DATAGEN_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = self.worker_config().validate() {
            return Err(ConfigError::Invalid(e.to_string()));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "DATAGEN_RETRY_ATTEMPTS must be greater than 0".to_string(),
            ));
        }

        match self.backend {
            BackendKind::Elasticsearch if self.es_url.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "DATAGEN_ES_URL cannot be empty".to_string(),
                ));
            }
            BackendKind::Blueflood if self.blueflood_host.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "DATAGEN_BLUEFLOOD_HOST cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.workers,
            max_batch_size: self.batch_size,
            backoff: self.backoff,
            flush_timeout: self.flush_timeout,
            retry_strategy: RetryStrategy::LinearBackoff(self.retry_attempts, self.retry_delay_ms),
        }
    }

    pub fn build_backend(&self) -> Result<Arc<dyn Backend>, CreationError> {
        Ok(match self.backend {
            BackendKind::Elasticsearch => Arc::new(ElasticsearchBackend::new(ElasticsearchConfig {
                url: self.es_url.clone(),
                index: self.es_index.clone(),
                doc_type: self.es_doc_type.clone(),
                timeout: self.flush_timeout,
            })?),
            BackendKind::Blueflood => Arc::new(BluefloodBackend::new(BluefloodConfig {
                host: self.blueflood_host.clone(),
                tenant_id: self.blueflood_tenant.clone(),
                timeout: self.flush_timeout,
                ..Default::default()
            })?),
        })
    }
}
