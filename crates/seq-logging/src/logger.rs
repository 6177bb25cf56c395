// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Url;
use tokio::runtime::Handle;
use tracing::debug;

use crate::batch::{self, BatchLimits, EventQueue, SharedQueue};
use crate::beacon::{beacon_url, Beacon, TokioBeacon};
use crate::config::{ErrorHandler, LoggerConfig, LoggerOptions};
use crate::constants::{BEACON_CONTENT_TYPE, BEACON_SIZE_LIMIT};
use crate::error::LoggerError;
use crate::event::{to_wire_format, RawEvent};
use crate::flusher::Flusher;
use crate::shipper::{ShipperHandle, ShipperService};
use crate::transport::{PostRequest, ReqwestTransport, Transport};

/// Platform primitives the logger ships through.
#[derive(Clone)]
pub struct Capabilities {
    pub transport: Arc<dyn Transport>,
    /// `None` disables [`Logger::flush_to_beacon`].
    pub beacon: Option<Arc<dyn Beacon>>,
}

impl Capabilities {
    /// A `reqwest` transport and a beacon spawning on the current runtime.
    #[must_use]
    pub fn reqwest(config: &LoggerConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config));
        let beacon: Arc<dyn Beacon> = Arc::new(TokioBeacon::new(
            Arc::clone(&transport),
            config.request_timeout,
        ));
        Capabilities {
            transport,
            beacon: Some(beacon),
        }
    }
}

struct Inner {
    queue: SharedQueue,
    shipper: ShipperHandle,
    beacon: Option<Arc<dyn Beacon>>,
    beacon_url: Url,
    limits: BatchLimits,
    on_error: ErrorHandler,
    closed: AtomicBool,
}

/// Batching client for the Seq raw ingestion API.
///
/// Cloning is cheap; clones share the queue and the background worker.
///
/// ```no_run
/// use seq_logging::{Level, Logger, LoggerOptions, RawEvent};
///
/// # async fn run() -> Result<(), seq_logging::LoggerError> {
/// let logger = Logger::new(LoggerOptions::new().with_server_url("http://localhost:5341"))?;
/// logger.emit(
///     RawEvent::new()
///         .level(Level::Information)
///         .message_template("Hello for the {n}th time, {user}!")
///         .property("user", "Alice")
///         .property("n", 20),
/// )?;
/// logger.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

/// The background worker of a [`Logger`]. Must be spawned with
/// [`LoggerService::run`] for events to be shipped.
pub struct LoggerService {
    shipper: ShipperService,
}

impl LoggerService {
    #[must_use]
    pub fn new(config: LoggerConfig, capabilities: Capabilities) -> (Self, Logger) {
        let queue: SharedQueue = Arc::new(Mutex::new(EventQueue::new()));
        let flusher = Arc::new(Flusher::new(&config, capabilities.transport));
        let (shipper, handle) = ShipperService::new(&config, Arc::clone(&queue), flusher);

        let inner = Inner {
            queue,
            shipper: handle,
            beacon: capabilities.beacon,
            beacon_url: beacon_url(&config.endpoint, config.api_key.as_deref()),
            limits: config.limits(),
            on_error: Arc::clone(&config.on_error),
            closed: AtomicBool::new(false),
        };
        (
            LoggerService { shipper },
            Logger {
                inner: Arc::new(inner),
            },
        )
    }

    pub async fn run(self) {
        self.shipper.run().await;
    }
}

impl Logger {
    /// Resolves `options` and spawns the worker on the current tokio runtime.
    pub fn new(options: LoggerOptions) -> Result<Self, LoggerError> {
        let runtime = Handle::try_current().map_err(|e| LoggerError::Runtime(e.to_string()))?;
        let config = LoggerConfig::resolve(options)?;
        debug!("SEQ | Creating logger: {:?}", config);
        let capabilities = Capabilities::reqwest(&config);
        let (service, logger) = LoggerService::new(config, capabilities);
        runtime.spawn(service.run());
        Ok(logger)
    }

    /// Normalizes and queues an event. Never waits on the network.
    ///
    /// Fails with [`LoggerError::InvalidArgument`] when `event` is `None`.
    /// After [`Logger::close`] events are silently dropped.
    pub fn emit(&self, event: impl Into<Option<RawEvent>>) -> Result<(), LoggerError> {
        let Some(event) = event.into() else {
            return Err(LoggerError::InvalidArgument(
                "An event must be provided".to_string(),
            ));
        };
        if self.is_closed() {
            return Ok(());
        }

        batch::lock(&self.inner.queue).push(to_wire_format(event));
        self.inner.shipper.event_queued()
    }

    /// Ships everything queued so far. Resolves with `false` if there was
    /// nothing to ship.
    pub async fn flush(&self) -> Result<bool, LoggerError> {
        self.inner.shipper.flush().await
    }

    /// Flushes, then releases network resources. Emitting afterwards is a
    /// no-op. A failed final flush is reported to the error handler only.
    pub async fn close(&self) -> Result<(), LoggerError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(LoggerError::AlreadyClosed);
        }
        self.inner.shipper.close().await
    }

    /// Hands a single batch, capped to [`BEACON_SIZE_LIMIT`], to the beacon
    /// primitive. Returns whether it was accepted for delivery.
    ///
    /// Nothing is retried and the outcome of the request is never observed.
    pub fn flush_to_beacon(&self) -> bool {
        let Some(beacon) = &self.inner.beacon else {
            return false;
        };
        let next = {
            let mut queue = batch::lock(&self.inner.queue);
            if queue.is_empty() {
                return false;
            }
            queue.dequeue_batch(
                self.inner.limits.capped(BEACON_SIZE_LIMIT),
                &self.inner.on_error,
            )
        };
        debug!(
            "SEQ | Sending {} events ({} bytes) by beacon",
            next.events.len(),
            next.bytes
        );
        beacon.send_beacon(PostRequest {
            url: self.inner.beacon_url.clone(),
            api_key: None,
            content_type: BEACON_CONTENT_TYPE,
            body: next.into_body(),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of events waiting to be shipped.
    #[must_use]
    pub fn queued(&self) -> usize {
        batch::lock(&self.inner.queue).len()
    }
}
