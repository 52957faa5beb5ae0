//! Turning a transport response into a parsed body or a classified error.

use serde_json::Value;

use super::http::TransportResponse;
use crate::core::{extract_message, is_success, sanitize, status_message};
use crate::error::{ClientError, Result};

/// Read the body and classify the response.
///
/// `204 No Content` yields [`Value::Null`]. Any other success must carry a
/// JSON body.
pub async fn process_response(response: TransportResponse) -> Result<Value> {
    let status = response.status;
    let body = response.bytes().await?;

    if !is_success(status) {
        return Err(classify_failure(status, &body));
    }
    parse_success(status, &body)
}

pub fn parse_success(status: u16, body: &[u8]) -> Result<Value> {
    if status == 204 {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| ClientError::invalid_response(format!("malformed JSON in {status} response: {e}")))
}

/// Build the error for a non-2xx response.
///
/// The body is sanitised before a message is taken from it; when it has no
/// usable message the fixed text for the status is used instead.
pub fn classify_failure(status: u16, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .map(|body| sanitize(&body))
        .and_then(|body| extract_message(&body))
        .unwrap_or_else(|| status_message(status));
    ClientError::http(status, message)
}
