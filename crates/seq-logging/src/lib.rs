// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side batching of structured log events for the Seq raw ingestion
//! API (`POST /api/events/raw`).
//!
//! Events are normalized and queued by [`Logger::emit`], then shipped in
//! size-bounded batches by a background worker, either when
//! `max_batching_time` has elapsed or when [`Logger::flush`] is called.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod beacon;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod flusher;
pub mod http;
pub mod logger;
pub mod property;
pub mod remote_config;
pub mod shipper;
pub mod size_guard;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use beacon::{Beacon, TokioBeacon};
pub use config::{ErrorHandler, LoggerConfig, LoggerOptions};
pub use error::LoggerError;
pub use event::{Level, RawEvent};
pub use logger::{Capabilities, Logger, LoggerService};
pub use property::Property;
pub use remote_config::RemoteConfig;
pub use transport::{PostRequest, Transport, TransportError, TransportResponse};
