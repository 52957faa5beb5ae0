//! Immutable data types for API requests.
//!
//! Configuration objects, request descriptions, tenant context and progress
//! snapshots. Nothing in here performs I/O.

pub mod options;
pub mod progress;
pub mod request;
pub mod tenant;

pub use options::{CacheConfig, DedupPolicy, ProgressCallback, RequestOptions, RetryPolicy};
pub use progress::{ProgressInfo, ProgressSample};
pub use request::{HeaderSet, Method, RequestDescriptor};
pub use tenant::TenantContext;
