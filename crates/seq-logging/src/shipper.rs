// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background worker deciding when queued events are shipped.
//!
//! The worker is in one of three states:
//!
//! - **Idle**: no shipment running. A flush starts one, or resolves with
//!   `false` when the queue is empty.
//! - **Shipping**: a shipment task is draining the queue. A flush is
//!   deferred to a follow-up drain, timer expiry is ignored.
//! - **Shipping more**: a follow-up drain is pending. Further flushes join
//!   it. When the running shipment completes the follow-up starts.
//!
//! Only one shipment task exists at a time, so batches leave in queue order.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use crate::batch::{self, BatchLimits, SharedQueue};
use crate::config::{ErrorHandler, LoggerConfig};
use crate::error::LoggerError;
use crate::flusher::Flusher;

#[derive(Debug)]
pub enum ShipperCommand {
    /// An event was pushed to the queue.
    EventQueued,
    /// Drain the queue, replying whether anything was shipped.
    Flush(oneshot::Sender<Result<bool, LoggerError>>),
    /// Final drain, then release the transport.
    Close(oneshot::Sender<Result<(), LoggerError>>),
}

#[derive(Clone, Debug)]
pub struct ShipperHandle {
    tx: mpsc::UnboundedSender<ShipperCommand>,
}

impl ShipperHandle {
    pub fn event_queued(&self) -> Result<(), LoggerError> {
        self.tx
            .send(ShipperCommand::EventQueued)
            .map_err(|e| LoggerError::Runtime(format!("Failed to notify shipper: {e}")))
    }

    pub async fn flush(&self) -> Result<bool, LoggerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ShipperCommand::Flush(response_tx))
            .map_err(|e| LoggerError::Runtime(format!("Failed to send flush command: {e}")))?;
        response_rx.await.map_err(|e| {
            LoggerError::Runtime(format!("Failed to receive flush response: {e}"))
        })?
    }

    pub async fn close(&self) -> Result<(), LoggerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ShipperCommand::Close(response_tx))
            .map_err(|e| LoggerError::Runtime(format!("Failed to send close command: {e}")))?;
        response_rx.await.map_err(|e| {
            LoggerError::Runtime(format!("Failed to receive close response: {e}"))
        })?
    }
}

enum Waiter {
    Flush(oneshot::Sender<Result<bool, LoggerError>>),
    Close(oneshot::Sender<Result<(), LoggerError>>),
}

type Shipment = JoinHandle<Result<bool, LoggerError>>;

pub struct ShipperService {
    queue: SharedQueue,
    flusher: Arc<Flusher>,
    limits: BatchLimits,
    max_batching_time: Duration,
    on_error: ErrorHandler,
    rx: mpsc::UnboundedReceiver<ShipperCommand>,
    timer: Option<Instant>,
    active: Option<Shipment>,
    /// Resolved when the active shipment completes.
    waiters: Vec<Waiter>,
    /// Resolved by the drain that runs after the active shipment.
    follow_up: Vec<Waiter>,
    closed: bool,
}

impl ShipperService {
    #[must_use]
    pub fn new(
        config: &LoggerConfig,
        queue: SharedQueue,
        flusher: Arc<Flusher>,
    ) -> (Self, ShipperHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = ShipperService {
            queue,
            flusher,
            limits: config.limits(),
            max_batching_time: config.max_batching_time,
            on_error: Arc::clone(&config.on_error),
            rx,
            timer: None,
            active: None,
            waiters: Vec::new(),
            follow_up: Vec::new(),
            closed: false,
        };
        (service, ShipperHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("SEQ | Shipper service started");

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                () = wait_for_timer(self.timer) => {
                    self.timer = None;
                    if self.active.is_none() {
                        self.start_shipment();
                    }
                }
                result = wait_for_shipment(&mut self.active) => {
                    self.active = None;
                    self.complete_shipment(result).await;
                }
            }
        }

        debug!("SEQ | Shipper service stopped");
    }

    async fn handle_command(&mut self, command: ShipperCommand) {
        match command {
            ShipperCommand::EventQueued => {
                if self.active.is_none() && self.timer.is_none() && !self.closed {
                    self.timer = Some(Instant::now() + self.max_batching_time);
                }
            }
            ShipperCommand::Flush(response_tx) => {
                self.add_waiter(Waiter::Flush(response_tx)).await;
            }
            ShipperCommand::Close(response_tx) => {
                debug!("SEQ | Closing, flushing remaining events");
                self.closed = true;
                self.timer = None;
                self.add_waiter(Waiter::Close(response_tx)).await;
            }
        }
    }

    async fn add_waiter(&mut self, waiter: Waiter) {
        if self.active.is_some() {
            self.follow_up.push(waiter);
        } else if self.start_shipment() {
            self.waiters.push(waiter);
        } else {
            self.resolve(vec![waiter], Ok(false)).await;
        }
    }

    /// Spawns a shipment if there is anything to ship.
    fn start_shipment(&mut self) -> bool {
        if batch::lock(&self.queue).is_empty() {
            return false;
        }
        self.active = Some(tokio::spawn(ship(
            Arc::clone(&self.queue),
            Arc::clone(&self.flusher),
            self.limits,
            Arc::clone(&self.on_error),
        )));
        true
    }

    async fn complete_shipment(&mut self, result: Result<bool, LoggerError>) {
        if let Err(e) = &result {
            (self.on_error)(e);
        }

        let waiters = mem::take(&mut self.waiters);
        self.resolve(waiters, result.clone()).await;

        if !self.follow_up.is_empty() {
            let follow_up = mem::take(&mut self.follow_up);
            if self.start_shipment() {
                self.waiters = follow_up;
            } else {
                self.resolve(follow_up, result).await;
            }
        }

        if self.active.is_none()
            && self.timer.is_none()
            && !self.closed
            && !batch::lock(&self.queue).is_empty()
        {
            self.timer = Some(Instant::now() + self.max_batching_time);
        }
    }

    async fn resolve(&self, waiters: Vec<Waiter>, result: Result<bool, LoggerError>) {
        if waiters.iter().any(|waiter| matches!(waiter, Waiter::Close(_))) {
            self.flusher.shutdown().await;
        }
        for waiter in waiters {
            let sent = match waiter {
                Waiter::Flush(response_tx) => response_tx.send(result.clone()).is_ok(),
                // The final flush error has already gone to the error handler.
                Waiter::Close(response_tx) => response_tx.send(Ok(())).is_ok(),
            };
            if !sent {
                debug!("SEQ | Flush response dropped, receiver gone");
            }
        }
    }
}

/// Sends batches until the queue is empty or a batch fails.
async fn ship(
    queue: SharedQueue,
    flusher: Arc<Flusher>,
    limits: BatchLimits,
    on_error: ErrorHandler,
) -> Result<bool, LoggerError> {
    loop {
        let (next, drained) = {
            let mut queue = batch::lock(&queue);
            if queue.is_empty() {
                return Ok(true);
            }
            let next = queue.dequeue_batch(limits, &on_error);
            (next, queue.is_empty())
        };
        flusher.post(next).await?;
        if drained {
            return Ok(true);
        }
    }
}

async fn wait_for_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_shipment(active: &mut Option<Shipment>) -> Result<bool, LoggerError> {
    match active {
        Some(shipment) => shipment.await.unwrap_or_else(|e| {
            error!("SEQ | Shipment task failed: {}", e);
            Err(LoggerError::Runtime(e.to_string()))
        }),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::batch::EventQueue;
    use crate::config::LoggerOptions;
    use crate::event::{to_wire_format, RawEvent};
    use crate::test_utils::{recording_handler, MockTransport, Reply};
    use crate::transport::Transport;
    use std::sync::Mutex;
    use tokio::time::sleep;

    struct Fixture {
        queue: SharedQueue,
        handle: ShipperHandle,
        transport: Arc<MockTransport>,
        errors: Arc<Mutex<Vec<LoggerError>>>,
    }

    impl Fixture {
        fn emit(&self, template: &str) {
            let event = to_wire_format(RawEvent::new().message_template(template));
            batch::lock(&self.queue).push(event);
            self.handle.event_queued().unwrap();
        }

        fn bodies(&self) -> Vec<String> {
            self.transport
                .requests()
                .into_iter()
                .map(|request| request.body)
                .collect()
        }
    }

    fn start(options: LoggerOptions, transport: MockTransport) -> Fixture {
        let (handler, errors) = recording_handler();
        let mut options = options.with_retry_delay(Duration::from_millis(10));
        options.on_error = Some(handler);
        let config = LoggerConfig::resolve(options).unwrap();
        let transport = Arc::new(transport);
        let flusher = Arc::new(Flusher::new(
            &config,
            Arc::clone(&transport) as Arc<dyn Transport>,
        ));
        let queue: SharedQueue = Arc::new(Mutex::new(EventQueue::new()));
        let (service, handle) = ShipperService::new(&config, Arc::clone(&queue), flusher);
        tokio::spawn(service.run());
        Fixture {
            queue,
            handle,
            transport,
            errors,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_empty_queue() {
        let fixture = start(LoggerOptions::new(), MockTransport::repeat(Reply::Status(201)));

        assert_eq!(fixture.handle.flush().await, Ok(false));
        assert!(fixture.transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_ships_queued_events() {
        let fixture = start(LoggerOptions::new(), MockTransport::repeat(Reply::Status(201)));
        fixture.emit("one");
        fixture.emit("two");

        assert_eq!(fixture.handle.flush().await, Ok(true));

        let bodies = fixture.bodies();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("\"one\"") && bodies[0].contains("\"two\""));
        assert!(batch::lock(&fixture.queue).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_flushes_share_one_post() {
        let fixture = start(
            LoggerOptions::new(),
            MockTransport::repeat(Reply::Status(201)).with_delay(Duration::from_millis(100)),
        );
        fixture.emit("only");

        let (first, second) = tokio::join!(fixture.handle.flush(), fixture.handle.flush());

        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(true));
        assert_eq!(fixture.transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_during_shipment_waits_for_follow_up() {
        let fixture = start(
            LoggerOptions::new(),
            MockTransport::repeat(Reply::Status(201)).with_delay(Duration::from_millis(100)),
        );
        fixture.emit("first");
        let handle = fixture.handle.clone();
        let first_flush = tokio::spawn(async move { handle.flush().await });
        sleep(Duration::from_millis(10)).await;

        fixture.emit("second");
        assert_eq!(fixture.handle.flush().await, Ok(true));
        assert_eq!(first_flush.await.unwrap(), Ok(true));

        let bodies = fixture.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("\"first\"") && !bodies[0].contains("\"second\""));
        assert!(bodies[1].contains("\"second\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ships_after_max_batching_time() {
        let fixture = start(
            LoggerOptions::new().with_max_batching_time(Duration::from_millis(2000)),
            MockTransport::repeat(Reply::Status(201)),
        );
        fixture.emit("timed");

        sleep(Duration::from_millis(1500)).await;
        assert!(fixture.transport.requests().is_empty());

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(fixture.transport.requests().len(), 1);
        assert!(batch::lock(&fixture.queue).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flush_drains_multiple_batches() {
        let event_bytes = to_wire_format(RawEvent::new().message_template("e0"))
            .to_json()
            .unwrap()
            .len();
        let fixture = start(
            LoggerOptions::new().with_batch_size_limit(event_bytes + 20),
            MockTransport::repeat(Reply::Status(201)),
        );
        for i in 0..3 {
            fixture.emit(&format!("e{i}"));
        }

        assert_eq!(fixture.handle.flush().await, Ok(true));

        let bodies = fixture.bodies();
        assert_eq!(bodies.len(), 3);
        for (i, body) in bodies.iter().enumerate() {
            assert!(body.contains(&format!("\"e{i}\"")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_shipment_reports_once_and_keeps_remaining_events() {
        let event_bytes = to_wire_format(RawEvent::new().message_template("e0"))
            .to_json()
            .unwrap()
            .len();
        let fixture = start(
            LoggerOptions::new().with_batch_size_limit(event_bytes + 20),
            MockTransport::repeat(Reply::Status(400)),
        );
        fixture.emit("e0");
        fixture.emit("e1");

        let result = fixture.handle.flush().await;

        assert_eq!(result, Err(LoggerError::Http { status: 400 }));
        assert_eq!(fixture.transport.requests().len(), 1);
        assert_eq!(batch::lock(&fixture.queue).len(), 1);
        assert_eq!(
            *fixture.errors.lock().unwrap(),
            vec![LoggerError::Http { status: 400 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearmed_after_failure() {
        let event_bytes = to_wire_format(RawEvent::new().message_template("e0"))
            .to_json()
            .unwrap()
            .len();
        let fixture = start(
            LoggerOptions::new()
                .with_batch_size_limit(event_bytes + 20)
                .with_max_batching_time(Duration::from_millis(500)),
            MockTransport::new(vec![Reply::Status(400), Reply::Status(201)]),
        );
        fixture.emit("e0");
        fixture.emit("e1");
        assert!(fixture.handle.flush().await.is_err());

        sleep(Duration::from_millis(600)).await;

        assert_eq!(fixture.transport.requests().len(), 2);
        assert!(batch::lock(&fixture.queue).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_and_releases_transport() {
        let fixture = start(LoggerOptions::new(), MockTransport::repeat(Reply::Status(201)));
        fixture.emit("last");

        assert_eq!(fixture.handle.close().await, Ok(()));

        assert_eq!(fixture.transport.requests().len(), 1);
        assert!(fixture.transport.is_shut_down());
        assert_eq!(fixture.handle.flush().await, Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_succeeds_when_final_flush_fails() {
        let fixture = start(
            LoggerOptions::new().with_max_batching_time(Duration::from_millis(100)),
            MockTransport::repeat(Reply::Status(500)),
        );
        fixture.emit("lost");

        assert_eq!(fixture.handle.close().await, Ok(()));
        assert_eq!(fixture.errors.lock().unwrap().len(), 1);
        assert!(fixture.transport.is_shut_down());

        // No timer runs after close.
        let requests = fixture.transport.requests().len();
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(fixture.transport.requests().len(), requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_shipment_waits_for_it() {
        let fixture = start(
            LoggerOptions::new(),
            MockTransport::repeat(Reply::Status(201)).with_delay(Duration::from_millis(100)),
        );
        fixture.emit("first");
        let handle = fixture.handle.clone();
        let flush = tokio::spawn(async move { handle.flush().await });
        sleep(Duration::from_millis(10)).await;
        fixture.emit("second");

        assert_eq!(fixture.handle.close().await, Ok(()));

        assert_eq!(flush.await.unwrap(), Ok(true));
        assert_eq!(fixture.transport.requests().len(), 2);
        assert!(batch::lock(&fixture.queue).is_empty());
    }
}
