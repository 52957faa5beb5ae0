use serde_json::{Map, Value};

/// Field-name fragments that mark a value as credential material.
const SENSITIVE_FIELDS: [&str; 9] = [
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "credential",
    "cookie",
];

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Strip every object field whose name looks like a credential, recursively.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_sensitive(key))
                .map(|(key, value)| (key.clone(), sanitize(value)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_FIELDS.iter().any(|fragment| key.contains(fragment))
}

/// Pull a human-readable message out of an error body.
///
/// Recognised shapes, in order: `{error: {detail}}`, `{error: {message}}`,
/// `{errors: [{detail}]}`, `{message}`. Expects an already sanitised body.
pub fn extract_message(body: &Value) -> Option<String> {
    let from_error = body.get("error").and_then(|error| {
        error
            .get("detail")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
    });
    let from_errors = || {
        body.get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(|first| first.get("detail"))
            .and_then(Value::as_str)
    };
    let from_message = || body.get("message").and_then(Value::as_str);

    from_error
        .or_else(from_errors)
        .or_else(from_message)
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

/// Fixed message for a status when the body offers nothing usable.
pub fn status_message(status: u16) -> String {
    match status {
        400 => "Invalid request parameters".to_string(),
        401 => "Authentication required".to_string(),
        403 => "Permission denied".to_string(),
        404 => "Resource not found".to_string(),
        409 => "Resource conflict".to_string(),
        429 => "Too many requests, please try again later".to_string(),
        500 => "Internal server error".to_string(),
        502 => "Bad gateway: the server received an invalid upstream response".to_string(),
        503 => "Service temporarily unavailable".to_string(),
        504 => "Gateway timeout: the server took too long to respond".to_string(),
        other => format!("Request failed with status {other}"),
    }
}
