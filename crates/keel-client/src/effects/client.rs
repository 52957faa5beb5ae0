//! The public client.
//!
//! Every JSON verb runs the same chain, outermost first:
//!
//! ```text
//! cache (GET only) -> deduplication -> retry/backoff -> transport
//! ```
//!
//! Uploads and downloads skip the cache and deduplication layers.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::cache::{CacheStats, Lookup, ResponseCache, ResponseMeta};
use super::dedup::DedupRegistry;
use super::download::DownloadStream;
use super::http::{Transport, TransportRequest};
use super::response::{classify_failure, process_response};
use super::retry::send_with_retry;
use crate::config::ClientConfig;
use crate::core::{ProgressTracker, build_headers, cache_key, dedup_key, is_success};
use crate::data::{CacheConfig, DedupPolicy, Method, RequestDescriptor, RequestOptions, RetryPolicy, TenantContext};
use crate::error::{ClientError, ConfigError, Result};
use crate::signal::{AbortSignal, cancelled};

/// A parsed response plus the validators needed to cache it.
#[derive(Debug, Clone)]
struct Fetched {
    payload: Arc<Value>,
    meta: ResponseMeta,
}

#[derive(serde::Deserialize)]
struct Envelope<D> {
    data: D,
}

struct Prepared {
    descriptor: RequestDescriptor,
    policy: RetryPolicy,
}

struct Inner<T> {
    transport: T,
    config: ClientConfig,
    base_url: Option<Url>,
    defaults: RetryPolicy,
    tenant: RwLock<Option<TenantContext>>,
    pending: DedupRegistry<Fetched>,
    cache: Arc<ResponseCache<Arc<Value>>>,
}

/// Tenant-aware JSON API client.
///
/// Cloning is cheap; clones share the transport, the deduplication registry
/// and the response cache.
///
/// # Examples
///
/// ```no_run
/// # #[cfg(feature = "reqwest")]
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use keel_client::{ApiClient, ClientConfig, RequestOptions, TenantContext};
///
/// let client = ApiClient::from_config(ClientConfig::new("https://api.example.com"))?;
/// client.set_tenant(TenantContext::new("tenant-1", "GMS", 83, 1));
///
/// let options = RequestOptions::default().cached();
/// let templates: Vec<serde_json::Value> = client.get_list("/templates", &options).await?;
/// # Ok(())
/// # }
/// ```
pub struct ApiClient<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for ApiClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("tenant", &self.tenant())
            .field("pending", &self.inner.pending.len())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

#[cfg(feature = "reqwest")]
impl ApiClient<super::http::ReqwestTransport> {
    /// Client over a default reqwest transport.
    pub fn from_config(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(super::http::ReqwestTransport::new()?, config)
    }
}

impl<T: Transport> ApiClient<T> {
    /// Build a client. Starts the periodic cache sweep when called inside a
    /// tokio runtime and the sweep interval is non-zero.
    pub fn new(transport: T, config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        let base_url = config.base_url()?;
        let cache = Arc::new(ResponseCache::new(config.cache_capacity));
        cache.start_sweeper(config.sweep_interval());

        debug!(base_url = ?config.base_url, dedup = ?config.dedup_policy, "api client created");
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                defaults: config.retry_policy(),
                base_url,
                config,
                tenant: RwLock::new(None),
                pending: DedupRegistry::new(),
                cache,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Tenant used by requests that do not carry their own.
    pub fn set_tenant(&self, tenant: TenantContext) {
        *self.inner.tenant.write().unwrap_or_else(PoisonError::into_inner) = Some(tenant);
    }

    pub fn clear_tenant(&self) {
        *self.inner.tenant.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn tenant(&self) -> Option<TenantContext> {
        self.inner.tenant.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// GET returning the parsed body unmodified.
    pub async fn get(&self, path: &str, options: &RequestOptions) -> Result<Value> {
        self.execute(Method::Get, path, None, options).await
    }

    /// GET a collection and unwrap its `{data: [...]}` envelope.
    pub async fn get_list<R: DeserializeOwned>(&self, path: &str, options: &RequestOptions) -> Result<Vec<R>> {
        self.get_data(path, options).await
    }

    /// GET a single resource and unwrap its `{data: ...}` envelope.
    pub async fn get_one<R: DeserializeOwned>(&self, path: &str, options: &RequestOptions) -> Result<R> {
        self.get_data(path, options).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B, options: &RequestOptions) -> Result<Value> {
        self.execute(Method::Post, path, Some(encode(body)?), options).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B, options: &RequestOptions) -> Result<Value> {
        self.execute(Method::Put, path, Some(encode(body)?), options).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B, options: &RequestOptions) -> Result<Value> {
        self.execute(Method::Patch, path, Some(encode(body)?), options).await
    }

    pub async fn delete(&self, path: &str, options: &RequestOptions) -> Result<Value> {
        self.execute(Method::Delete, path, None, options).await
    }

    /// POST raw bytes, reporting progress at the start and at completion.
    ///
    /// The body is sent as-is; set `Content-Type` through the options when
    /// it is not JSON.
    pub async fn upload(&self, path: &str, body: impl Into<Bytes>, options: &RequestOptions) -> Result<Value> {
        let body = body.into();
        let total = body.len() as u64;
        let prepared = self.prepare(Method::Post, path, Some(body), options)?;

        let mut tracker = ProgressTracker::new(Some(total));
        options.report_progress(&tracker.update(0, Some(total)));

        let request = TransportRequest::from(&prepared.descriptor);
        let fetched = self
            .inner
            .fetch(&request, &prepared.policy, options.signal.as_ref())
            .await?;

        options.report_progress(&tracker.complete(Some(total)));
        Ok(Arc::unwrap_or_clone(fetched.payload))
    }

    /// GET a body as a stream of chunks.
    ///
    /// The status is checked before the stream is returned; failures are
    /// classified like any other response.
    pub async fn stream_download(&self, path: &str, options: &RequestOptions) -> Result<DownloadStream> {
        let prepared = self.prepare(Method::Get, path, None, options)?;
        let request = TransportRequest::from(&prepared.descriptor);
        let signal = options.signal.as_ref();

        let response = send_with_retry(&self.inner.transport, &request, &prepared.policy, signal).await?;
        if !is_success(response.status) {
            let status = response.status;
            let body = tokio::select! {
                biased;
                _ = cancelled(signal) => return Err(ClientError::Cancelled),
                body = response.bytes() => body?,
            };
            return Err(classify_failure(status, &body));
        }

        Ok(DownloadStream::new(response, options.signal.clone(), options.on_progress.clone()))
    }

    /// GET a whole body into memory with progress reporting.
    pub async fn download(&self, path: &str, options: &RequestOptions) -> Result<Bytes> {
        let mut stream = self.stream_download(path, options).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Drop the cached response for a GET of `path` with these options.
    ///
    /// A background refresh of that entry that is still in flight will not
    /// store its result.
    pub fn invalidate(&self, path: &str, options: &RequestOptions) -> Result<bool> {
        let prepared = self.prepare(Method::Get, path, None, options)?;
        let config = self.cache_config(options);
        let prefix = config.as_ref().and_then(|cache| cache.key_prefix.as_deref());
        Ok(self.inner.cache.invalidate(&cache_key(&prepared.descriptor, prefix)))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Drop every cached response stored under `prefix`.
    pub fn clear_cache_prefix(&self, prefix: &str) -> usize {
        self.inner.cache.clear_prefix(&format!("{prefix}:"))
    }

    /// Distinct requests currently shared through deduplication.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Wait for background revalidations started so far.
    pub async fn await_revalidations(&self) {
        self.inner.cache.await_revalidations().await;
    }

    /// Clear the cache, abort background revalidations and every
    /// deduplicated request in flight.
    pub fn reset(&self) {
        self.inner.pending.clear();
        self.inner.cache.reset();
        debug!("api client reset");
    }

    /// [`reset`](Self::reset), then stop the sweep.
    pub fn dispose(&self) {
        self.inner.pending.clear();
        self.inner.cache.dispose();
        debug!("api client disposed");
    }

    async fn get_data<D: DeserializeOwned>(&self, path: &str, options: &RequestOptions) -> Result<D> {
        let body = self.get(path, options).await?;
        let envelope: Envelope<D> = serde_json::from_value(body)
            .map_err(|e| ClientError::invalid_response(format!("unexpected resource document: {e}")))?;
        Ok(envelope.data)
    }

    async fn execute(&self, method: Method, path: &str, body: Option<Bytes>, options: &RequestOptions) -> Result<Value> {
        if options.signal.as_ref().is_some_and(AbortSignal::is_aborted) {
            return Err(ClientError::Cancelled);
        }

        let prepared = self.prepare(method, path, body, options)?;
        let cache = match self.cache_config(options) {
            Some(config) if method == Method::Get => {
                Some((cache_key(&prepared.descriptor, config.key_prefix.as_deref()), config))
            }
            _ => None,
        };

        let generation = self.inner.cache.generation();
        if let Some((ref key, ref config)) = cache {
            match self.inner.cache.lookup(key) {
                Lookup::Fresh(payload) => return Ok((*payload).clone()),
                Lookup::Stale(payload) => {
                    self.revalidate(key.clone(), &prepared, config.clone());
                    return Ok((*payload).clone());
                }
                Lookup::Absent => debug!(key = %key, "cache miss"),
            }
        }

        let fetched = self.dispatch(&prepared, options).await?;

        if let Some((key, config)) = cache {
            self.inner
                .cache
                .store_if_current(generation, key, Arc::clone(&fetched.payload), fetched.meta, &config);
        }
        Ok(Arc::unwrap_or_clone(fetched.payload))
    }

    /// Explicit cache settings win over [`RequestOptions::cached`], which
    /// takes the configured defaults.
    fn cache_config(&self, options: &RequestOptions) -> Option<CacheConfig> {
        match options.cache {
            Some(ref config) => Some(config.clone()),
            None if options.cached => Some(self.inner.config.cache_config()),
            None => None,
        }
    }

    fn prepare(&self, method: Method, path: &str, body: Option<Bytes>, options: &RequestOptions) -> Result<Prepared> {
        let url = self.resolve_url(path)?;
        let tenant = options.tenant.clone().or_else(|| self.tenant());
        let headers = build_headers(tenant.as_ref(), &options.headers, options.skip_tenant_headers);

        let mut descriptor = RequestDescriptor::new(method, url).headers(headers);
        if let Some(body) = body {
            descriptor = descriptor.body(body);
        }
        if !options.skip_tenant_headers
            && let Some(tenant) = tenant
        {
            descriptor = descriptor.tenant_id(tenant.id);
        }

        Ok(Prepared {
            descriptor,
            policy: options.retry_policy(&self.inner.defaults),
        })
    }

    fn resolve_url(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)?;
            return Ok(path.to_string());
        }

        let Some(ref base) = self.inner.base_url else {
            return Err(ClientError::InvalidUrl(format!("relative path `{path}` without a base URL")));
        };
        let base = base.as_str().trim_end_matches('/');
        if path.is_empty() || path.starts_with('/') {
            Ok(format!("{base}{path}"))
        } else {
            Ok(format!("{base}/{path}"))
        }
    }

    fn should_deduplicate(&self, method: Method, options: &RequestOptions) -> bool {
        if options.skip_deduplication {
            return false;
        }
        options.deduplicate
            || match self.inner.config.dedup_policy {
                DedupPolicy::All => true,
                DedupPolicy::SafeMethods => method.is_safe(),
            }
    }

    async fn dispatch(&self, prepared: &Prepared, options: &RequestOptions) -> Result<Fetched> {
        let request = TransportRequest::from(&prepared.descriptor);
        let signal = options.signal.as_ref();

        if !self.should_deduplicate(prepared.descriptor.method, options) {
            return self.inner.fetch(&request, &prepared.policy, signal).await;
        }

        let key = dedup_key(&prepared.descriptor);
        let inner = Arc::clone(&self.inner);
        let policy = prepared.policy;
        self.inner
            .pending
            .get_or_join(
                &key,
                move || async move { inner.fetch(&request, &policy, None).await },
                signal,
            )
            .await
    }

    /// Refresh a stale entry in the background, conditionally when the
    /// entry has validators.
    fn revalidate(&self, key: String, prepared: &Prepared, config: CacheConfig) {
        let generation = self.inner.cache.generation();
        let mut request = TransportRequest::from(&prepared.descriptor);
        if let Some(meta) = self.inner.cache.meta(&key) {
            request.headers.merge(&meta.conditional_headers());
        }

        let inner = Arc::clone(&self.inner);
        let policy = prepared.policy;
        let task_key = key.clone();
        self.inner.cache.spawn_revalidation(key, async move {
            if let Err(e) = inner.refresh(generation, &task_key, &request, &policy, &config).await {
                warn!(key = %task_key, error = %e, "background revalidation failed");
            }
        });
    }
}

impl<T: Transport> Inner<T> {
    async fn fetch(&self, request: &TransportRequest, policy: &RetryPolicy, signal: Option<&AbortSignal>) -> Result<Fetched> {
        let response = send_with_retry(&self.transport, request, policy, signal).await?;
        let meta = ResponseMeta::from_headers(&response.headers);

        let payload = tokio::select! {
            biased;
            _ = cancelled(signal) => return Err(ClientError::Cancelled),
            payload = process_response(response) => payload?,
        };
        Ok(Fetched {
            payload: Arc::new(payload),
            meta,
        })
    }

    /// Writes back only if nothing invalidated the cache since
    /// `generation` was read.
    async fn refresh(
        &self,
        generation: u64,
        key: &str,
        request: &TransportRequest,
        policy: &RetryPolicy,
        config: &CacheConfig,
    ) -> Result<()> {
        let response = send_with_retry(&self.transport, request, policy, None).await?;
        if response.status == 304 {
            debug!(key, "revalidated, not modified");
            self.cache.touch_if_current(generation, key);
            return Ok(());
        }

        let meta = ResponseMeta::from_headers(&response.headers);
        let payload = process_response(response).await?;
        if self.cache.store_if_current(generation, key, Arc::new(payload), meta, config) {
            debug!(key, "revalidated");
        }
        Ok(())
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| ClientError::InvalidRequest(e.to_string()))
}
