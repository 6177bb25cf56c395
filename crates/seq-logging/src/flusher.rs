// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use tokio::time::{sleep, timeout};
use tracing::{debug, error};

use crate::batch::Batch;
use crate::config::{ErrorHandler, LoggerConfig};
use crate::error::LoggerError;
use crate::remote_config::RemoteConfigTracker;
use crate::transport::{PostRequest, Transport, TransportError};

/// Sends framed batches to the ingestion endpoint, retrying transient
/// failures.
pub struct Flusher {
    transport: Arc<dyn Transport>,
    endpoint: Url,
    api_key: Option<String>,
    request_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    remote_config: RemoteConfigTracker,
    on_error: ErrorHandler,
}

impl Flusher {
    #[must_use]
    pub fn new(config: &LoggerConfig, transport: Arc<dyn Transport>) -> Self {
        Flusher {
            transport,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            remote_config: RemoteConfigTracker::new(config.on_remote_config_change.clone()),
            on_error: Arc::clone(&config.on_error),
        }
    }

    /// POSTs `batch` until it is accepted, a non-retryable failure occurs or
    /// `max_retries` attempts have been made.
    pub async fn post(&self, batch: Batch) -> Result<(), LoggerError> {
        let events = batch.events.len();
        let request = PostRequest {
            url: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            content_type: "application/json",
            body: batch.into_body(),
        };

        let mut attempts = 0;
        loop {
            let time = Instant::now();
            attempts += 1;
            let result = self.attempt(request.clone()).await;
            let elapsed = time.elapsed();

            let e = match result {
                Ok(()) => {
                    debug!(
                        "SEQ | Sent {} events in {} ms after {} attempts",
                        events,
                        elapsed.as_millis(),
                        attempts
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            if e.is_retryable() && attempts < self.max_retries {
                debug!(
                    "SEQ | Attempt {} of {} failed after {} ms: {}",
                    attempts,
                    self.max_retries,
                    elapsed.as_millis(),
                    e
                );
                sleep(self.retry_delay).await;
                continue;
            }

            error!(
                "SEQ | Failed to send {} events after {} attempts: {}",
                events, attempts, e
            );
            return Err(e);
        }
    }

    async fn attempt(&self, request: PostRequest) -> Result<(), LoggerError> {
        let response = match timeout(self.request_timeout, self.transport.post(request)).await {
            Err(_) => {
                return Err(LoggerError::Timeout {
                    timeout_ms: self.request_timeout.as_millis(),
                })
            }
            Ok(Err(TransportError::Network(e))) => return Err(LoggerError::Transport(e)),
            Ok(Err(TransportError::Request(e))) => return Err(LoggerError::Runtime(e)),
            Ok(Ok(response)) => response,
        };

        if !matches!(response.status, 200 | 201) {
            return Err(LoggerError::Http {
                status: response.status,
            });
        }

        if let Err(e) = self.remote_config.observe(&response.body) {
            (self.on_error)(&e);
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
