use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::progress::ProgressInfo;
use super::request::HeaderSet;
use super::tenant::TenantContext;
use crate::signal::AbortSignal;

/// Callback receiving progress snapshots for uploads and downloads.
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Per-request response caching configuration.
///
/// Only GET requests consult the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a stored response is served without touching the network.
    pub ttl: Duration,

    /// Namespace prepended to the cache key, usable with
    /// [`ApiClient::clear_cache_prefix`](crate::ApiClient::clear_cache_prefix).
    pub key_prefix: Option<String>,

    /// Serve expired entries while refreshing them in the background.
    pub stale_while_revalidate: bool,

    /// How long past `ttl` an entry may still be served stale.
    pub max_stale_time: Duration,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            key_prefix: None,
            stale_while_revalidate: false,
            max_stale_time: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Enable stale-while-revalidate with the given stale window.
    #[must_use]
    pub fn stale_while_revalidate(mut self, max_stale_time: Duration) -> Self {
        self.stale_while_revalidate = true;
        self.max_stale_time = max_stale_time;
        self
    }
}

/// Resolved retry/timeout settings for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for each individual attempt.
    pub timeout: Duration,

    /// Retries after the initial attempt; total attempts = 1 + max_retries.
    pub max_retries: u32,

    /// Base delay between attempts.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Double the delay per retry; otherwise wait `min(base, max)` each time.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            exponential: true,
        }
    }
}

/// Which verbs share in-flight requests by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every verb is deduplicated unless the request opts out.
    #[default]
    All,
    /// Only GET is deduplicated unless the request opts in.
    SafeMethods,
}

/// Per-request configuration.
///
/// Unset retry/timeout fields fall back to the client's configuration.
///
/// # Examples
///
/// ```
/// use keel_client::{CacheConfig, RequestOptions};
/// use std::time::Duration;
///
/// let options = RequestOptions::default()
///     .max_retries(2)
///     .retry_delay(Duration::from_millis(100))
///     .cache(CacheConfig::new(Duration::from_secs(5)))
///     .header("Accept-Language", "en");
/// ```
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub max_retry_delay: Option<Duration>,
    pub exponential_backoff: Option<bool>,

    /// Cancels this caller's interest in the request.
    pub signal: Option<AbortSignal>,

    /// Never join or publish an in-flight request.
    pub skip_deduplication: bool,

    /// Join or publish in-flight requests even when the client policy
    /// would not deduplicate this verb.
    pub deduplicate: bool,

    /// Do not inject tenant identification headers.
    pub skip_tenant_headers: bool,

    /// `None` disables caching for this request unless `cached` is set.
    pub cache: Option<CacheConfig>,

    /// Cache with the client's configured default TTL and stale window
    /// when `cache` is unset.
    pub cached: bool,

    pub on_progress: Option<ProgressCallback>,

    /// Caller headers, merged last.
    pub headers: HeaderSet,

    /// Overrides the client's current tenant for this request.
    pub tenant: Option<TenantContext>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("signal", &self.signal)
            .field("skip_deduplication", &self.skip_deduplication)
            .field("deduplicate", &self.deduplicate)
            .field("skip_tenant_headers", &self.skip_tenant_headers)
            .field("cache", &self.cache)
            .field("cached", &self.cached)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "{ ... }"))
            .field("headers", &self.headers)
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl RequestOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = Some(enabled);
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn skip_deduplication(mut self, skip: bool) -> Self {
        self.skip_deduplication = skip;
        self
    }

    #[must_use]
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    #[must_use]
    pub fn skip_tenant_headers(mut self, skip: bool) -> Self {
        self.skip_tenant_headers = skip;
        self
    }

    #[must_use]
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Cache with the client defaults (`default_cache_ttl_ms`,
    /// `default_max_stale_ms`).
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self.cached = false;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn tenant(mut self, tenant: TenantContext) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Fill unset retry fields from `defaults`.
    pub fn retry_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: self.retry_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_retry_delay.unwrap_or(defaults.max_delay),
            exponential: self.exponential_backoff.unwrap_or(defaults.exponential),
        }
    }

    pub(crate) fn report_progress(&self, info: &ProgressInfo) {
        if let Some(ref callback) = self.on_progress {
            callback(info);
        }
    }
}
