// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire-format constants and configuration defaults for the Seq raw
//! ingestion API.
//!
//! # Envelope
//!
//! Every batch is framed as a single JSON object:
//!
//! ```json
//! {"Events":[{...},{...}]}
//! ```
//!
//! The framing bytes count toward the batch size limit, see
//! [`ENVELOPE_BYTES`].

use std::time::Duration;

/// Server used when no URL is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5341";

/// How long emitted events may wait in the queue before a shipment is
/// started by the batching timer.
pub const DEFAULT_MAX_BATCHING_TIME: Duration = Duration::from_millis(2_000);

/// Maximum serialized size of a single event (256 KiB).
///
/// Larger events are replaced by a diagnostic record, see
/// [`crate::size_guard`].
pub const DEFAULT_EVENT_SIZE_LIMIT: usize = 256 * 1_024;

/// Maximum size of one framed batch (1 MiB).
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 1_024 * 1_024;

/// Per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Total number of POST attempts made for one batch.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Delay between two POST attempts of the same batch.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);

/// Hard ceiling applied to both the event and the batch size limit when
/// flushing through a beacon (63 KiB).
pub const BEACON_SIZE_LIMIT: usize = 63 * 1_024;

/// Path of the raw ingestion endpoint, relative to the server URL.
pub const INGESTION_PATH: &str = "api/events/raw";

/// Header carrying the API key on regular requests.
pub const API_KEY_HEADER: &str = "X-Seq-ApiKey";

/// Query parameter carrying the API key on beacon requests.
pub const API_KEY_QUERY_PARAM: &str = "apiKey";

/// Content type of beacon payloads (CORS-safelisted, no preflight).
pub const BEACON_CONTENT_TYPE: &str = "text/plain";

/// Opening bytes of the batch envelope.
pub const HEADER: &str = "{\"Events\":[";

/// Closing bytes of the batch envelope.
pub const FOOTER: &str = "]}";

/// Bytes added to every batch by the envelope.
pub const ENVELOPE_BYTES: usize = HEADER.len() + FOOTER.len();

/// Message template used when an event carries none.
pub const NO_MESSAGE_TEMPLATE: &str = "(No message provided)";

/// Message template of the record substituted for an oversized event.
pub const EVENT_TOO_LARGE_TEMPLATE: &str = "(Event too large) {initial}...";

/// Number of characters of the original template kept in the substitute.
pub const EVENT_TOO_LARGE_INITIAL_CHARS: usize = 12;

/// Message template of the event recording a circular property graph.
pub const CIRCULAR_STRUCTURE_TEMPLATE: &str = "[seq] Circular structure found";

/// Deepest nesting of property objects and arrays that is serialized.
/// Deeper nodes are replaced by a marker string.
pub const MAX_PROPERTY_DEPTH: usize = 128;

/// `sourceContext` property attached to diagnostics raised by this client.
pub const SOURCE_CONTEXT: &str = "Seq Rust Client";
