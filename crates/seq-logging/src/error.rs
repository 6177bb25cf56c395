// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the logger, either returned from a call or handed to
/// the configured error callback.
///
/// The type is `Clone` so a single shipment failure can be delivered to every
/// caller waiting on the same flush.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The logger has already been closed")]
    AlreadyClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("[seq] Event body is larger than {limit} bytes: {body}")]
    EventTooLarge { limit: usize, body: String },

    #[error("[seq] Circular structure found at '{path}'")]
    CircularStructure { path: String },

    #[error("[seq] Properties nested deeper than {limit} levels at '{path}'")]
    PropertiesTooDeep { limit: usize, path: String },

    #[error("HTTP log shipping failed: {status}")]
    Http { status: u16 },

    #[error("HTTP log shipping failed, reached timeout ({timeout_ms} ms)")]
    Timeout { timeout_ms: u128 },

    #[error("HTTP log shipping failed: {0}")]
    Transport(String),

    #[error("Invalid remote configuration: {0}")]
    RemoteConfig(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl LoggerError {
    /// Whether a failed attempt with this error may be retried by the
    /// transport adapter.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status } => (500..600).contains(status),
            Self::Timeout { .. } | Self::Transport(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = LoggerError::Http { status: 400 };
        assert_eq!(error.to_string(), "HTTP log shipping failed: 400");

        let error = LoggerError::Timeout { timeout_ms: 30000 };
        assert_eq!(
            error.to_string(),
            "HTTP log shipping failed, reached timeout (30000 ms)"
        );

        let error = LoggerError::EventTooLarge {
            limit: 10,
            body: "{}".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "[seq] Event body is larger than 10 bytes: {}"
        );

        let error = LoggerError::PropertiesTooDeep {
            limit: 128,
            path: "a.b".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "[seq] Properties nested deeper than 128 levels at 'a.b'"
        );
    }

    #[test]
    fn test_error_debug() {
        let error = LoggerError::AlreadyClosed;
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("AlreadyClosed"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LoggerError::Http { status: 500 }.is_retryable());
        assert!(LoggerError::Http { status: 503 }.is_retryable());
        assert!(LoggerError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(LoggerError::Transport("connection refused".into()).is_retryable());

        assert!(!LoggerError::Http { status: 400 }.is_retryable());
        assert!(!LoggerError::Http { status: 404 }.is_retryable());
        assert!(!LoggerError::Http { status: 302 }.is_retryable());
        assert!(!LoggerError::AlreadyClosed.is_retryable());
        assert!(!LoggerError::RemoteConfig("bad".into()).is_retryable());
    }
}
