// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The seam between the shipping logic and the network.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::config::LoggerConfig;
use crate::constants::API_KEY_HEADER;
use crate::http::get_client;

/// A single POST to the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub url: Url,
    /// Sent as the `X-Seq-ApiKey` header when present.
    pub api_key: Option<String>,
    pub content_type: &'static str,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure: refused, reset, unreachable, DNS.
    #[error("{0}")]
    Network(String),
    /// The request could not be built or the transport is shut down.
    #[error("{0}")]
    Request(String),
}

impl TransportError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: PostRequest) -> Result<TransportResponse, TransportError>;

    /// Releases pooled connections. Later posts fail.
    async fn shutdown(&self) {}
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: RwLock<Option<reqwest::Client>>,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(config: &LoggerConfig) -> Self {
        ReqwestTransport {
            client: RwLock::new(Some(get_client(config))),
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: PostRequest) -> Result<TransportResponse, TransportError> {
        let Some(client) = self.client() else {
            return Err(TransportError::Request(
                "HTTP client has been shut down".to_string(),
            ));
        };

        let mut builder = client
            .post(request.url)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.body);
        if let Some(api_key) = &request.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn shutdown(&self) {
        debug!("SEQ | Releasing HTTP connections");
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::Request(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
