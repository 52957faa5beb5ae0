//! Streaming download body with progress reporting.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{FutureExt, Stream, StreamExt};

use super::http::{BoxStream, TransportResponse};
use crate::core::ProgressTracker;
use crate::data::{ProgressCallback, ProgressInfo};
use crate::error::{ClientError, Result, TransportError};
use crate::signal::AbortSignal;

type CancelFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Body of a successful download, yielded chunk by chunk.
///
/// Every chunk feeds the progress tracker and the caller's callback; the
/// end of the body emits one terminal snapshot. Firing the request's abort
/// signal ends the stream with [`ClientError::Cancelled`] and drops the
/// underlying body.
pub struct DownloadStream {
    body: Option<BoxStream<'static, std::result::Result<Bytes, TransportError>>>,
    tracker: ProgressTracker,
    loaded: u64,
    total: Option<u64>,
    on_progress: Option<ProgressCallback>,
    cancel: Option<CancelFuture>,
}

impl DownloadStream {
    pub(crate) fn new(response: TransportResponse, signal: Option<AbortSignal>, on_progress: Option<ProgressCallback>) -> Self {
        let total = response.content_length();
        let cancel = signal.map(|signal| async move { signal.cancelled().await }.boxed());
        Self {
            body: Some(response.body),
            tracker: ProgressTracker::new(total),
            loaded: 0,
            total,
            on_progress,
            cancel,
        }
    }

    /// Expected length from `Content-Length`, if the server sent one.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    fn report(&self, info: &ProgressInfo) {
        if let Some(ref callback) = self.on_progress {
            callback(info);
        }
    }

    fn finish(&mut self) {
        self.body = None;
        self.cancel = None;
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(body) = this.body.as_mut() else {
            return Poll::Ready(None);
        };

        if let Some(cancel) = this.cancel.as_mut()
            && cancel.poll_unpin(cx).is_ready()
        {
            this.finish();
            return Poll::Ready(Some(Err(ClientError::Cancelled)));
        }

        match body.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.loaded += chunk.len() as u64;
                let info = this.tracker.update(this.loaded, this.total);
                this.report(&info);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                let info = this.tracker.complete(this.total.or(Some(this.loaded)));
                this.report(&info);
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("loaded", &self.loaded)
            .field("total", &self.total)
            .field("finished", &self.body.is_none())
            .finish()
    }
}
