//! Tenant-aware JSON API client.
//!
//! [`ApiClient`] layers, outermost first, a response cache with TTL and
//! stale-while-revalidate, deduplication of identical in-flight requests,
//! and bounded retries with exponential backoff over a pluggable
//! [`Transport`]. Failures surface as a classified, sanitised
//! [`ClientError`].
//!
//! The crate is split the usual way:
//!
//! - [`data`]: configuration and value types
//! - [`core`]: pure transformations (headers, keys, backoff, classification,
//!   progress)
//! - [`effects`]: transport, retry, deduplication, caching and the client
//!
//! ```no_run
//! use keel_client::{ApiClient, CacheConfig, ClientConfig, RequestOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::from_config(ClientConfig::load()?)?;
//! let options = RequestOptions::default()
//!     .cache(CacheConfig::new(Duration::from_secs(5)).key_prefix("templates"));
//!
//! let templates = client.get("/api/templates", &options).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod effects;
pub mod error;
pub mod signal;

pub use config::ClientConfig;
pub use crate::core::ProgressTracker;
pub use data::{
    CacheConfig, DedupPolicy, HeaderSet, Method, ProgressCallback, ProgressInfo, RequestDescriptor, RequestOptions,
    RetryPolicy, TenantContext,
};
#[cfg(feature = "reqwest")]
pub use effects::ReqwestTransport;
#[cfg(any(test, feature = "test-util"))]
pub use effects::MockTransport;
pub use effects::{ApiClient, CacheStats, DownloadStream, Transport, TransportRequest, TransportResponse};
pub use error::{ClientError, ConfigError, HttpErrorKind, Result, TransportError};
pub use signal::{AbortController, AbortSignal};
