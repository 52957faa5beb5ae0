//! Bounded retries with backoff around single transport attempts.
//!
//! `Idle -> Attempting -> {Success | RetryWait -> Attempting | Exhausted | Cancelled}`
//!
//! A retryable status that survives every attempt is handed back as the
//! last response rather than an error, so the caller classifies it the same
//! way as any other failed response.

use std::time::Duration;

use tracing::{debug, warn};

use super::http::{Transport, TransportRequest, TransportResponse};
use crate::core::{backoff_delay, is_retryable_status, with_jitter};
use crate::data::RetryPolicy;
use crate::error::{ClientError, Result};
use crate::signal::{AbortSignal, cancelled};

/// Run `request` until it succeeds, fails permanently, exhausts the retry
/// budget, or `signal` fires.
pub async fn send_with_retry<T: Transport + ?Sized>(
    transport: &T,
    request: &TransportRequest,
    policy: &RetryPolicy,
    signal: Option<&AbortSignal>,
) -> Result<TransportResponse> {
    let mut retry_count = 0u32;

    loop {
        if signal.is_some_and(AbortSignal::is_aborted) {
            return Err(ClientError::Cancelled);
        }

        let attempts_left = retry_count < policy.max_retries;

        match attempt(transport, request.clone(), policy.timeout, signal).await {
            Ok(response) if !is_retryable_status(response.status) => return Ok(response),
            Ok(response) if !attempts_left => {
                warn!(
                    url = %request.url,
                    status = response.status,
                    attempts = retry_count + 1,
                    "retries exhausted"
                );
                return Ok(response);
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, retry_count, "retryable status");
            }
            Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
            Err(e) if !attempts_left || !e.is_retryable() => {
                if attempts_left {
                    debug!(url = %request.url, error = %e, "non-retryable failure");
                } else {
                    warn!(url = %request.url, error = %e, attempts = retry_count + 1, "retries exhausted");
                }
                return Err(e);
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, retry_count, "retryable failure");
            }
        }

        let delay = next_delay(retry_count, policy);
        debug!(url = %request.url, delay_ms = delay.as_millis() as u64, "waiting before retry");
        sleep_or_cancel(delay, signal).await?;
        retry_count += 1;
    }
}

/// Delay before retry `retry_count`, including jitter for exponential
/// backoff.
pub fn next_delay(retry_count: u32, policy: &RetryPolicy) -> Duration {
    let delay = backoff_delay(retry_count, policy);
    if policy.exponential {
        with_jitter(delay, policy.max_delay)
    } else {
        delay
    }
}

/// One attempt raced against its timeout and the caller's signal.
///
/// Losing either race drops the transport future, which aborts the call.
async fn attempt<T: Transport + ?Sized>(
    transport: &T,
    request: TransportRequest,
    timeout: Duration,
    signal: Option<&AbortSignal>,
) -> Result<TransportResponse> {
    tokio::select! {
        biased;
        _ = cancelled(signal) => Err(ClientError::Cancelled),
        result = tokio::time::timeout(timeout, transport.send(request)) => match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ClientError::from(e)),
            Err(_) => Err(ClientError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
        },
    }
}

async fn sleep_or_cancel(delay: Duration, signal: Option<&AbortSignal>) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancelled(signal) => Err(ClientError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::MockTransport;
    use crate::signal::AbortController;
    use crate::data::Method;
    use serde_json::json;
    use tokio::time::Instant;

    fn request() -> TransportRequest {
        TransportRequest {
            method: Method::Get,
            url: "http://localhost/api/characters".into(),
            headers: Default::default(),
            body: None,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_one_attempt() {
        let transport = MockTransport::json(200, json!({"ok": true}));
        let response = send_with_retry(&transport, &request(), &policy(3), None).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retryable_status_returns_last_response() {
        let transport = MockTransport::json(503, json!({"message": "down"}));
        let response = send_with_retry(&transport, &request(), &policy(2), None).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = MockTransport::statuses(vec![(502, json!({})), (429, json!({})), (200, json!([]))]);
        let response = send_with_retry(&transport, &request(), &policy(3), None).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let transport = MockTransport::json(404, json!({"message": "missing"}));
        let response = send_with_retry(&transport, &request(), &policy(3), None).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_retry_then_surface() {
        let transport = MockTransport::unreachable();
        let err = send_with_retry(&transport, &request(), &policy(2), None).await.unwrap_err();

        assert!(matches!(err, ClientError::Network { .. }));
        assert_eq!(err.status(), 0);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_attempt() {
        let transport = MockTransport::json(200, json!({})).with_latency(Duration::from_secs(60));
        let mut p = policy(1);
        p.timeout = Duration::from_millis(500);

        let err = send_with_retry(&transport, &request(), &p, None).await.unwrap_err();

        assert_eq!(err, ClientError::Timeout { timeout_ms: 500 });
        assert_eq!(err.status(), 408);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.completed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_backoff() {
        let transport = MockTransport::json(500, json!({}));
        let start = Instant::now();
        send_with_retry(&transport, &request(), &policy(2), None).await.unwrap();

        // 100ms + 200ms, each with at most 10% jitter.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(330), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_is_immediate() {
        let transport = MockTransport::json(503, json!({}));
        let controller = AbortController::new();
        let signal = controller.signal();
        let mut p = policy(3);
        p.base_delay = Duration::from_secs(30);
        p.max_delay = Duration::from_secs(60);

        let start = Instant::now();
        let task = tokio::spawn(async move { send_with_retry(&transport, &request(), &p, Some(&signal)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.abort();
        let err = task.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_signal_never_reaches_transport() {
        let transport = MockTransport::json(200, json!({}));
        let signal = AbortSignal::aborted();
        let err = send_with_retry(&transport, &request(), &policy(3), Some(&signal)).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn constant_delay_has_no_jitter() {
        let mut p = policy(3);
        p.exponential = false;
        assert_eq!(next_delay(0, &p), Duration::from_millis(100));
        assert_eq!(next_delay(4, &p), Duration::from_millis(100));
    }
}
