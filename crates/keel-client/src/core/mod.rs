//! Pure transformations for API requests.
//!
//! Header construction, key derivation, backoff arithmetic, status and
//! error-body classification, and progress computation. Nothing here
//! performs I/O or touches shared state.

mod cache_control;
mod headers;
mod key;
mod progress;
mod response;
mod retry;

pub use cache_control::CacheControl;
pub use headers::build_headers;
pub use key::{CACHE_KEY_HEADERS, DEDUP_EXCLUDED_HEADERS, cache_key, dedup_key};
pub use progress::{PROGRESS_WINDOW, ProgressTracker};
pub use response::{extract_message, is_success, sanitize, status_message};
pub use retry::{RETRYABLE_STATUSES, backoff_delay, is_retryable_status, retry_delay, with_jitter};
