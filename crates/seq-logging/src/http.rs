// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction.

use core::time::Duration;
use std::error::Error;

use tracing::error;

use crate::config::LoggerConfig;

/// Builds the client shared by every request of one logger.
///
/// Per-request deadlines are enforced by the caller, so no client-wide
/// timeout is set here.
#[must_use]
pub fn get_client(config: &LoggerConfig) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("SEQ | Unable to build HTTP client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        }
    }
}

fn build_client(config: &LoggerConfig) -> Result<reqwest::Client, Box<dyn Error>> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()?;
    Ok(client)
}
