// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event queue and batch assembly.
//!
//! Batches are framed for the raw ingestion endpoint:
//! ```json
//! {"Events":[{"Timestamp":"...","MessageTemplate":"first"},{"Timestamp":"...","MessageTemplate":"second"}]}
//! ```
//! The envelope and the `,` separators count toward the batch size limit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::config::ErrorHandler;
use crate::constants::{ENVELOPE_BYTES, FOOTER, HEADER};
use crate::error::LoggerError;
use crate::event::WireEvent;
use crate::size_guard::{check_size, SizeCheck};

/// Size limits applied while assembling one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub event_size_limit: usize,
    pub batch_size_limit: usize,
}

impl BatchLimits {
    /// Both limits lowered to at most `ceiling` bytes.
    #[must_use]
    pub fn capped(self, ceiling: usize) -> Self {
        BatchLimits {
            event_size_limit: self.event_size_limit.min(ceiling),
            batch_size_limit: self.batch_size_limit.min(ceiling),
        }
    }
}

/// Serialized events removed from the queue, in queue order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub events: Vec<String>,
    /// Length of the framed body, envelope included.
    pub bytes: usize,
}

impl Batch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Frames the events as `{"Events":[...]}`.
    #[must_use]
    pub fn into_body(self) -> String {
        let mut body = String::with_capacity(self.bytes);
        body.push_str(HEADER);
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                body.push(',');
            }
            body.push_str(event);
        }
        body.push_str(FOOTER);
        body
    }
}

/// FIFO of normalized events waiting to be shipped.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<WireEvent>,
}

pub type SharedQueue = Arc<Mutex<EventQueue>>;

/// Locks the shared queue, recovering the data if a holder panicked.
pub fn lock(queue: &SharedQueue) -> MutexGuard<'_, EventQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: WireEvent) {
        self.events.push_back(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes the longest prefix of the queue that fits in
    /// `limits.batch_size_limit` once framed. The first event is always
    /// taken, whatever its size.
    ///
    /// Events larger than `limits.event_size_limit` are replaced by a
    /// diagnostic record (see [`check_size`]). Events whose properties
    /// contain a cycle are sanitized in place and a circular-structure
    /// diagnostic is appended to the tail of the queue. Properties nested
    /// deeper than [`crate::constants::MAX_PROPERTY_DEPTH`] are truncated the
    /// same way and reported through `on_error`.
    pub fn dequeue_batch(&mut self, limits: BatchLimits, on_error: &ErrorHandler) -> Batch {
        let mut batch = Batch {
            events: Vec::new(),
            bytes: ENVELOPE_BYTES,
        };
        let mut delimiter = 0;

        while let Some(mut event) = self.events.pop_front() {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("SEQ | {e}, sending a sanitized copy");
                    if matches!(e, LoggerError::CircularStructure { .. }) {
                        self.events
                            .push_back(WireEvent::circular_structure(event.timestamp));
                    } else {
                        on_error(&e);
                    }
                    event.sanitize();
                    event.to_json_lossy()
                }
            };

            let SizeCheck { event, json, .. } =
                check_size(event, json, limits.event_size_limit, on_error);

            if !batch.events.is_empty()
                && batch.bytes + json.len() + delimiter > limits.batch_size_limit
            {
                // Keep the processed record so it is not checked twice.
                self.events.push_front(event);
                break;
            }

            batch.bytes += json.len() + delimiter;
            delimiter = 1;
            batch.events.push(json);
        }

        batch
    }
}
