// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application events and their normalized wire form.
//!
//! A [`RawEvent`] is whatever the application hands to
//! [`crate::logger::Logger::emit`]: every field is optional and loosely
//! typed. [`to_wire_format`] turns it into a [`WireEvent`], the record that
//! is queued and eventually serialized into a batch:
//!
//! ```json
//! {"Timestamp":"2024-05-01T10:00:00Z","Level":"Error","MessageTemplate":"Hello {user}","Properties":{"user":"ann"}}
//! ```

use std::error::Error;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    CIRCULAR_STRUCTURE_TEMPLATE, EVENT_TOO_LARGE_INITIAL_CHARS, EVENT_TOO_LARGE_TEMPLATE,
    NO_MESSAGE_TEMPLATE, SOURCE_CONTEXT,
};
use crate::error::LoggerError;
use crate::property::Property;

/// Seq event levels. Any other level name is dropped during formatting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    derive_more::Display,
)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    /// Parses an exact level name, `None` for anything else.
    #[must_use]
    pub fn parse(name: &str) -> Option<Level> {
        match name {
            "Verbose" => Some(Level::Verbose),
            "Debug" => Some(Level::Debug),
            "Information" => Some(Level::Information),
            "Warning" => Some(Level::Warning),
            "Error" => Some(Level::Error),
            "Fatal" => Some(Level::Fatal),
            _ => None,
        }
    }
}

impl FromStr for Level {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::parse(s).ok_or_else(|| LoggerError::InvalidArgument(format!("unknown level '{s}'")))
    }
}

impl From<Level> for Property {
    fn from(level: Level) -> Self {
        Property::String(level.to_string())
    }
}

/// An event as supplied by the application.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub timestamp: Option<Property>,
    pub level: Option<Property>,
    pub message_template: Option<Property>,
    pub exception: Option<Property>,
    pub properties: Option<Property>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl RawEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<Property>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    #[must_use]
    pub fn level(mut self, level: impl Into<Property>) -> Self {
        self.level = Some(level.into());
        self
    }

    #[must_use]
    pub fn message_template(mut self, template: impl Into<Property>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    #[must_use]
    pub fn exception(mut self, exception: impl Into<Property>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Renders `error` and its chain of sources as the exception text, one
    /// cause per line.
    #[must_use]
    pub fn with_error(mut self, error: &(dyn Error + 'static)) -> Self {
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            text.push_str("\nCaused by: ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        self.exception = Some(Property::String(text));
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: impl Into<Property>) -> Self {
        self.properties = Some(properties.into());
        self
    }

    /// Sets a single property, creating the properties object if needed.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        let properties = match self.properties.take() {
            Some(existing) if existing.is_object() => existing,
            _ => Property::object(),
        };
        properties.insert(key, value);
        self.properties = Some(properties);
        self
    }

    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

/// The normalized record queued for shipment.
#[derive(Debug, Clone)]
pub struct WireEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Option<Level>,
    pub message_template: String,
    pub exception: Option<String>,
    /// Always an object when present.
    pub properties: Option<Property>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl WireEvent {
    /// Serializes the record, failing if its properties contain a cycle or
    /// are nested too deeply.
    pub fn to_json(&self) -> Result<String, LoggerError> {
        let properties = self.properties.as_ref().map(Property::to_json).transpose()?;
        Ok(self.to_value(properties).to_string())
    }

    /// Serializes the record with cycles and over-deep nodes replaced by
    /// marker strings.
    #[must_use]
    pub fn to_json_lossy(&self) -> String {
        let properties = self.properties.as_ref().map(Property::sanitized);
        self.to_value(properties).to_string()
    }

    /// Replaces the properties with their sanitized form.
    pub fn sanitize(&mut self) {
        if let Some(properties) = &self.properties {
            self.properties = Some(Property::from(properties.sanitized()));
        }
    }

    fn to_value(&self, properties: Option<Value>) -> Value {
        let mut record = Map::new();
        record.insert(
            "Timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        if let Some(level) = self.level {
            record.insert("Level".to_string(), Value::String(level.to_string()));
        }
        record.insert(
            "MessageTemplate".to_string(),
            Value::String(self.message_template.clone()),
        );
        if let Some(exception) = &self.exception {
            record.insert("Exception".to_string(), Value::String(exception.clone()));
        }
        if let Some(properties) = properties {
            record.insert("Properties".to_string(), properties);
        }
        if let Some(trace_id) = &self.trace_id {
            record.insert("TraceId".to_string(), Value::String(trace_id.clone()));
        }
        if let Some(span_id) = &self.span_id {
            record.insert("SpanId".to_string(), Value::String(span_id.clone()));
        }
        Value::Object(record)
    }

    /// Record substituted for an event whose serialized form exceeds
    /// `event_size_limit`.
    #[must_use]
    pub fn too_large(original: &WireEvent, event_size_limit: usize) -> WireEvent {
        let initial: String = original
            .message_template
            .chars()
            .take(EVENT_TOO_LARGE_INITIAL_CHARS)
            .collect();
        let properties = Property::object();
        properties.insert("initial", initial);
        properties.insert("sourceContext", SOURCE_CONTEXT);
        properties.insert("eventSizeLimit", event_size_limit);
        WireEvent {
            timestamp: original.timestamp,
            level: original.level,
            message_template: EVENT_TOO_LARGE_TEMPLATE.to_string(),
            exception: None,
            properties: Some(properties),
            trace_id: None,
            span_id: None,
        }
    }

    /// Record that reports a circular property graph found in another event.
    #[must_use]
    pub fn circular_structure(timestamp: DateTime<Utc>) -> WireEvent {
        WireEvent {
            timestamp,
            level: Some(Level::Error),
            message_template: CIRCULAR_STRUCTURE_TEMPLATE.to_string(),
            exception: None,
            properties: None,
            trace_id: None,
            span_id: None,
        }
    }
}

/// Normalizes an application event.
///
/// - `timestamp`: kept only if it is a [`Property::Timestamp`], otherwise now.
/// - `level`: kept only if it names a [`Level`] exactly.
/// - `message_template`: coerced to text, placeholder when absent or null.
/// - `exception`: coerced to text, dropped when absent or null.
/// - `properties`: kept only if it is an object.
#[must_use]
pub fn to_wire_format(event: RawEvent) -> WireEvent {
    let timestamp = event
        .timestamp
        .as_ref()
        .and_then(Property::as_timestamp)
        .unwrap_or_else(Utc::now);
    let level = event
        .level
        .as_ref()
        .and_then(Property::as_str)
        .and_then(Level::parse);
    let message_template = match event.message_template {
        Some(template) if !template.is_null() => template.display_string(),
        _ => NO_MESSAGE_TEMPLATE.to_string(),
    };
    let exception = event
        .exception
        .filter(|exception| !exception.is_null())
        .map(|exception| exception.display_string());
    let properties = event.properties.filter(Property::is_object);

    WireEvent {
        timestamp,
        level,
        message_template,
        exception,
        properties,
        trace_id: event.trace_id,
        span_id: event.span_id,
    }
}
