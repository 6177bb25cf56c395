// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-event size enforcement.

use tracing::warn;

use crate::config::ErrorHandler;
use crate::error::LoggerError;
use crate::event::WireEvent;

/// Outcome of [`check_size`]: the record to keep and its serialized form.
#[derive(Debug, Clone)]
pub struct SizeCheck {
    pub event: WireEvent,
    pub json: String,
    pub too_large: bool,
}

/// Replaces `event` with a diagnostic record if `json`, its serialized
/// form, is larger than `event_size_limit` bytes.
///
/// `on_error` is called once, synchronously, when a substitution happens.
/// The returned `json` is always the serialization of the returned event.
pub fn check_size(
    event: WireEvent,
    json: String,
    event_size_limit: usize,
    on_error: &ErrorHandler,
) -> SizeCheck {
    if json.len() <= event_size_limit {
        return SizeCheck {
            event,
            json,
            too_large: false,
        };
    }

    warn!(
        "SEQ | Event of {} bytes exceeds the {} byte limit, replacing it",
        json.len(),
        event_size_limit
    );
    on_error(&LoggerError::EventTooLarge {
        limit: event_size_limit,
        body: json,
    });

    let replacement = WireEvent::too_large(&event, event_size_limit);
    let json = replacement.to_json_lossy();
    SizeCheck {
        event: replacement,
        json,
        too_large: true,
    }
}
