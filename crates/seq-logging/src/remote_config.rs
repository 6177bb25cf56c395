// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server-supplied configuration returned alongside accepted batches.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LoggerError;
use crate::event::Level;

pub type RemoteConfigHandler = Arc<dyn Fn(&RemoteConfig) + Send + Sync>;

/// Body of a successful ingestion response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Lowest level the server will store, `None` when unrestricted or when
    /// the server sent a level name this client does not know.
    #[serde(
        rename = "MinimumLevelAccepted",
        default,
        deserialize_with = "lenient_level"
    )]
    pub minimum_level_accepted: Option<Level>,
    /// Any other settings sent by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    Ok(name.as_deref().and_then(Level::parse))
}

impl RemoteConfig {
    pub fn from_slice(body: &[u8]) -> Result<Self, LoggerError> {
        serde_json::from_slice(body).map_err(|e| LoggerError::RemoteConfig(e.to_string()))
    }
}

/// Remembers the last payload seen and notifies the handler when it changes.
pub struct RemoteConfigTracker {
    handler: Option<RemoteConfigHandler>,
    last: Mutex<Option<Vec<u8>>>,
}

impl RemoteConfigTracker {
    #[must_use]
    pub fn new(handler: Option<RemoteConfigHandler>) -> Self {
        RemoteConfigTracker {
            handler,
            last: Mutex::new(None),
        }
    }

    /// Records a response body. Returns `Ok(true)` when the handler was
    /// invoked with a new configuration.
    ///
    /// Payloads are compared by raw bytes, so a reformatted but equivalent
    /// body counts as a change.
    pub fn observe(&self, body: &[u8]) -> Result<bool, LoggerError> {
        let Some(handler) = &self.handler else {
            return Ok(false);
        };
        if body.is_empty() {
            return Ok(false);
        }
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(body) {
                return Ok(false);
            }
            *last = Some(body.to_vec());
        }

        let config = RemoteConfig::from_slice(body)?;
        debug!("SEQ | Remote configuration changed: {:?}", config);
        handler(&config);
        Ok(true)
    }
}

impl Debug for RemoteConfigTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteConfigTracker")
    }
}
