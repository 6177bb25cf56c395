// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget delivery used when the process is about to go away.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::debug;

use crate::constants::API_KEY_QUERY_PARAM;
use crate::transport::{PostRequest, Transport};

/// A primitive that queues a single request for delivery without waiting
/// for it. Returns whether the request was accepted for sending.
pub trait Beacon: Send + Sync {
    fn send_beacon(&self, request: PostRequest) -> bool;
}

/// Ingestion URL carrying the API key as a query parameter, since beacon
/// requests cannot set custom headers.
#[must_use]
pub fn beacon_url(endpoint: &Url, api_key: Option<&str>) -> Url {
    let mut url = endpoint.clone();
    if let Some(api_key) = api_key {
        url.query_pairs_mut()
            .append_pair(API_KEY_QUERY_PARAM, api_key);
    }
    url
}

/// [`Beacon`] that spawns the POST on the current tokio runtime. The
/// spawned request is abandoned after `request_timeout`.
pub struct TokioBeacon {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl TokioBeacon {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        TokioBeacon {
            transport,
            request_timeout,
        }
    }
}

impl Beacon for TokioBeacon {
    fn send_beacon(&self, request: PostRequest) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            debug!("SEQ | No runtime available for beacon delivery");
            return false;
        };
        let transport = Arc::clone(&self.transport);
        let request_timeout = self.request_timeout;
        runtime.spawn(async move {
            match timeout(request_timeout, transport.post(request)).await {
                Ok(Ok(response)) => {
                    debug!("SEQ | Beacon delivered with status {}", response.status);
                }
                Ok(Err(e)) => debug!("SEQ | Beacon delivery failed: {}", e),
                Err(_) => debug!(
                    "SEQ | Beacon delivery timed out after {} ms",
                    request_timeout.as_millis()
                ),
            }
        });
        true
    }
}
