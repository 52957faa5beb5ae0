//! Scripted transport for tests and offline development.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;

use super::http::{Transport, TransportRequest, TransportResponse};
use crate::error::TransportError;

type Handler = Box<dyn Fn(&TransportRequest, usize) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// A [`Transport`] that answers from a closure and records every request.
///
/// The handler receives the request and its zero-based call index. An
/// optional latency is slept (on the tokio clock) before answering, which
/// keeps requests in flight long enough to observe deduplication and
/// cancellation.
pub struct MockTransport {
    handler: Handler,
    latency: Duration,
    calls: Mutex<Vec<TransportRequest>>,
    completed: AtomicUsize,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest, usize) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    /// Always answer with `status` and a JSON body.
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        let body = Bytes::from(body.to_string());
        Self::new(move |_, _| Ok(TransportResponse::from_bytes(status, body.clone())))
    }

    /// Answer with `statuses[i]` on call `i`, repeating the last one.
    pub fn statuses(statuses: Vec<(u16, serde_json::Value)>) -> Self {
        Self::new(move |_, index| {
            let (status, body) = statuses
                .get(index)
                .or_else(|| statuses.last())
                .cloned()
                .unwrap_or((200, serde_json::Value::Null));
            Ok(TransportResponse::from_bytes(status, body.to_string()))
        })
    }

    /// Fail every call at the connection level.
    pub fn unreachable() -> Self {
        Self::new(|request, _| Err(TransportError::Connection(format!("{} unreachable", request.url))))
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests that reached the transport, including in-flight ones.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    /// Requests that ran to completion (not dropped mid-flight).
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn last_call(&self) -> Option<TransportRequest> {
        self.calls.lock().ok().and_then(|calls| calls.last().cloned())
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let index = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(request.clone());
                calls.len() - 1
            }
            Err(_) => return Err(TransportError::Other("mock transport poisoned".into())),
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = (self.handler)(&request, index);
        self.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}
