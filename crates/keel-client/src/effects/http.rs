use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::data::{HeaderSet, Method, RequestDescriptor};
use crate::error::TransportError;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// One request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderSet,
    pub body: Option<Bytes>,
}

impl From<&RequestDescriptor> for TransportRequest {
    fn from(descriptor: &RequestDescriptor) -> Self {
        Self {
            method: descriptor.method,
            url: descriptor.url.clone(),
            headers: descriptor.headers.clone(),
            body: descriptor.body.clone(),
        }
    }
}

/// A response whose body has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderSet,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl TransportResponse {
    pub fn new(status: u16, headers: HeaderSet, body: BoxStream<'static, Result<Bytes, TransportError>>) -> Self {
        Self { status, headers, body }
    }

    /// Response with the whole body available as a single chunk.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let headers = HeaderSet::new().with("content-length", body.len().to_string());
        Self::new(status, headers, Box::pin(futures_util::stream::once(async move { Ok::<_, TransportError>(body) })))
    }

    /// Response whose body arrives in the given chunks.
    pub fn chunked(status: u16, chunks: Vec<Bytes>) -> Self {
        let total: usize = chunks.iter().map(Bytes::len).sum();
        let headers = HeaderSet::new().with("content-length", total.to_string());
        Self::new(status, headers, Box::pin(futures_util::stream::iter(chunks.into_iter().map(Ok::<_, TransportError>))))
    }

    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderSet::new(), Box::pin(futures_util::stream::empty::<Result<Bytes, TransportError>>()))
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Drain the body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, TransportError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"{ ... }")
            .finish()
    }
}

/// Asynchronous HTTP transport abstraction.
///
/// The minimal seam between the client and the network. Implementations
/// follow redirects and pool connections as they see fit; retries, timeouts
/// and cancellation are layered above. Dropping the returned future must
/// abort the exchange.
///
/// # Implementations
///
/// - [`ReqwestTransport`]: production implementation using `reqwest`
/// - `MockTransport` (feature `test-util`): scripted responses for tests
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use super::*;

    /// Production transport using reqwest.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, TransportError> {
            let client = reqwest::Client::builder().build()?;
            Ok(Self { client })
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    impl Transport for ReqwestTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            let mut builder = self.client.request(method(request.method), &request.url);

            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
                .collect();
            let body = response.bytes_stream().map(|chunk| chunk.map_err(TransportError::from));

            Ok(TransportResponse::new(status, headers, Box::pin(body)))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
