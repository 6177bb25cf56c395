// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tracing::error;

use crate::batch::BatchLimits;
use crate::constants::{
    DEFAULT_BATCH_SIZE_LIMIT, DEFAULT_EVENT_SIZE_LIMIT, DEFAULT_MAX_BATCHING_TIME,
    DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY, DEFAULT_SERVER_URL,
    ENVELOPE_BYTES, INGESTION_PATH,
};
use crate::error::LoggerError;
use crate::remote_config::{RemoteConfig, RemoteConfigHandler};

/// Callback receiving every error the logger recovers from or gives up on.
pub type ErrorHandler = Arc<dyn Fn(&LoggerError) + Send + Sync>;

/// User-facing options. Every field is optional and falls back to the
/// defaults in [`crate::constants`].
///
/// An explicit value is never replaced by its default: a `max_retries` or
/// `event_size_limit` of `0`, a zero `request_timeout` or a
/// `batch_size_limit` that cannot hold the batch envelope makes
/// [`LoggerConfig::resolve`] fail with [`LoggerError::InvalidConfig`].
#[derive(Clone, Default)]
pub struct LoggerOptions {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub max_batching_time: Option<Duration>,
    pub event_size_limit: Option<usize>,
    pub batch_size_limit: Option<usize>,
    pub request_timeout: Option<Duration>,
    /// Total POST attempts per batch.
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub on_error: Option<ErrorHandler>,
    pub on_remote_config_change: Option<RemoteConfigHandler>,
}

impl LoggerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads options from `SEQ_*` environment variables. Unset variables
    /// leave the option empty; unparseable values are rejected.
    pub fn from_env() -> Result<Self, LoggerError> {
        Ok(Self {
            server_url: env_string("SEQ_SERVER_URL"),
            api_key: env_string("SEQ_API_KEY"),
            max_batching_time: env_parse::<u64>("SEQ_MAX_BATCHING_TIME_MS")?
                .map(Duration::from_millis),
            event_size_limit: env_parse("SEQ_EVENT_SIZE_LIMIT")?,
            batch_size_limit: env_parse("SEQ_BATCH_SIZE_LIMIT")?,
            request_timeout: env_parse::<u64>("SEQ_REQUEST_TIMEOUT_MS")?
                .map(Duration::from_millis),
            max_retries: env_parse("SEQ_MAX_RETRIES")?,
            retry_delay: env_parse::<u64>("SEQ_RETRY_DELAY_MS")?.map(Duration::from_millis),
            on_error: None,
            on_remote_config_change: None,
        })
    }

    #[must_use]
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_max_batching_time(mut self, max_batching_time: Duration) -> Self {
        self.max_batching_time = Some(max_batching_time);
        self
    }

    #[must_use]
    pub fn with_event_size_limit(mut self, event_size_limit: usize) -> Self {
        self.event_size_limit = Some(event_size_limit);
        self
    }

    #[must_use]
    pub fn with_batch_size_limit(mut self, batch_size_limit: usize) -> Self {
        self.batch_size_limit = Some(batch_size_limit);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    #[must_use]
    pub fn with_on_error(
        mut self,
        on_error: impl Fn(&LoggerError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    #[must_use]
    pub fn with_on_remote_config_change(
        mut self,
        handler: impl Fn(&RemoteConfig) + Send + Sync + 'static,
    ) -> Self {
        self.on_remote_config_change = Some(Arc::new(handler));
        self
    }
}

impl Debug for LoggerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerOptions")
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_batching_time", &self.max_batching_time)
            .field("event_size_limit", &self.event_size_limit)
            .field("batch_size_limit", &self.batch_size_limit)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_error", &self.on_error.is_some())
            .field(
                "on_remote_config_change",
                &self.on_remote_config_change.is_some(),
            )
            .finish()
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, LoggerError> {
    env_string(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| {
                LoggerError::InvalidConfig(format!("{name} has an invalid value '{value}'"))
            })
        })
        .transpose()
}

/// Resolved configuration used by the logger internals.
#[derive(Clone)]
pub struct LoggerConfig {
    /// Server URL, always ending with `/`.
    pub server_url: String,
    /// `<server_url>api/events/raw`.
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub max_batching_time: Duration,
    pub event_size_limit: usize,
    pub batch_size_limit: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub on_error: ErrorHandler,
    pub on_remote_config_change: Option<RemoteConfigHandler>,
}

impl LoggerConfig {
    pub fn resolve(options: LoggerOptions) -> Result<Self, LoggerError> {
        let mut server_url = options
            .server_url
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        if !server_url.ends_with('/') {
            server_url.push('/');
        }
        let endpoint = Url::parse(&server_url)
            .and_then(|base| base.join(INGESTION_PATH))
            .map_err(|e| {
                LoggerError::InvalidConfig(format!("Invalid server URL '{server_url}': {e}"))
            })?;

        let config = Self {
            server_url,
            endpoint,
            api_key: options.api_key.filter(|key| !key.is_empty()),
            max_batching_time: options
                .max_batching_time
                .unwrap_or(DEFAULT_MAX_BATCHING_TIME),
            event_size_limit: options.event_size_limit.unwrap_or(DEFAULT_EVENT_SIZE_LIMIT),
            batch_size_limit: options.batch_size_limit.unwrap_or(DEFAULT_BATCH_SIZE_LIMIT),
            request_timeout: options.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: options.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            on_error: options.on_error.unwrap_or_else(default_error_handler),
            on_remote_config_change: options.on_remote_config_change,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(LoggerError::InvalidConfig(format!(
                "Server URL must use http or https, got '{}'",
                self.endpoint.scheme()
            )));
        }
        if self.event_size_limit == 0 {
            return Err(LoggerError::InvalidConfig(
                "Event size limit must be greater than 0".to_string(),
            ));
        }
        if self.batch_size_limit <= ENVELOPE_BYTES {
            return Err(LoggerError::InvalidConfig(format!(
                "Batch size limit must be greater than {ENVELOPE_BYTES} bytes"
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(LoggerError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(LoggerError::InvalidConfig(
                "Max retries must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            event_size_limit: self.event_size_limit,
            batch_size_limit: self.batch_size_limit,
        }
    }
}

impl Debug for LoggerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_batching_time", &self.max_batching_time)
            .field("event_size_limit", &self.event_size_limit)
            .field("batch_size_limit", &self.batch_size_limit)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(|e: &LoggerError| error!("[seq] {e}"))
}
