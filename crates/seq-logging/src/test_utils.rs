// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ErrorHandler;
use crate::error::LoggerError;
use crate::transport::{PostRequest, Transport, TransportError, TransportResponse};

/// Scripted outcome of one mock POST.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Body(u16, &'static str),
    NetworkError,
    /// Never answers.
    Hang,
}

/// Transport that records requests and answers from a script. Once the
/// script is exhausted the last reply repeats.
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Reply>,
    requests: Mutex<Vec<PostRequest>>,
    delay: Option<Duration>,
    shut_down: AtomicBool,
}

impl MockTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        MockTransport {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(Reply::Status(201)),
            requests: Mutex::new(Vec::new()),
            delay: None,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn repeat(reply: Reply) -> Self {
        Self::new(vec![reply])
    }

    /// Every reply is sent after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<PostRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            *last = reply;
        }
        last.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: PostRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if self.is_shut_down() {
            return Err(TransportError::Request("shut down".to_string()));
        }
        let reply = self.next_reply();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Status(status) => Ok(TransportResponse {
                status,
                body: Vec::new(),
            }),
            Reply::Body(status, body) => Ok(TransportResponse {
                status,
                body: body.as_bytes().to_vec(),
            }),
            Reply::NetworkError => Err(TransportError::Network("connection refused".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

pub fn recording_handler() -> (ErrorHandler, Arc<Mutex<Vec<LoggerError>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let handler: ErrorHandler = Arc::new(move |e: &LoggerError| {
        sink.lock().unwrap().push(e.clone());
    });
    (handler, errors)
}
