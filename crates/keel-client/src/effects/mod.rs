//! I/O and coordination.
//!
//! The transport seam, the retry executor, the deduplication registry, the
//! response cache and the client that composes them.

pub mod cache;
pub mod client;
pub mod dedup;
pub mod download;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod response;
pub mod retry;

pub use cache::{CacheEntryStats, CacheStats, Lookup, ResponseCache, ResponseMeta};
pub use client::ApiClient;
pub use dedup::DedupRegistry;
pub use download::DownloadStream;
#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;
pub use http::{BoxStream, Transport, TransportRequest, TransportResponse};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
pub use response::{classify_failure, parse_success, process_response};
pub use retry::{next_delay, send_with_retry};
