use crate::{metrics, pool::PooledChannel};
use bytes::Bytes;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::Stream;
use gridlink_core::{Error, Result, proto::DownloadResultDataResponse};
use pin_project_lite::pin_project;
use tokio_util::sync::WaitForCancellationFutureOwned;
use tonic::{Status, Streaming};

pin_project! {
    /// Chunks of one blob, yielded as they arrive from the server.
    ///
    /// The stream keeps its pooled connection until it is dropped. It ends
    /// after the server closes the download or after the first error. If the
    /// cancellation token fires first, it yields one [`Error::Transfer`]
    /// carrying a `Cancelled` status and ends. It cannot be restarted.
    #[must_use = "streams do nothing unless polled"]
    pub struct BlobChunkStream {
        #[pin]
        inner: Streaming<DownloadResultDataResponse>,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
        blob_id: String,
        finished: bool,
        _lease: PooledChannel,
    }
}

impl BlobChunkStream {
    pub(crate) fn new(
        inner: Streaming<DownloadResultDataResponse>,
        cancelled: WaitForCancellationFutureOwned,
        blob_id: String,
        lease: PooledChannel,
    ) -> Self {
        Self {
            inner,
            cancelled,
            blob_id,
            finished: false,
            _lease: lease,
        }
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }
}

impl Stream for BlobChunkStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }

        if this.cancelled.poll(cx).is_ready() {
            *this.finished = true;
            metrics::increment_transfer_errors();
            tracing::error!(blob_id = %this.blob_id, "Download stream cancelled");
            let status = Status::cancelled("download cancelled by the caller");
            return Poll::Ready(Some(Err(Error::transfer("download")(status))));
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                metrics::record_bytes_downloaded(frame.data_chunk.len() as u64);
                Poll::Ready(Some(Ok(frame.data_chunk)))
            }
            Poll::Ready(Some(Err(status))) => {
                *this.finished = true;
                metrics::increment_transfer_errors();
                tracing::error!(blob_id = %this.blob_id, %status, "Download stream failed");
                Poll::Ready(Some(Err(Error::transfer("download")(status))))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
