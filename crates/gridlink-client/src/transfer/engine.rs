//! Upload and download of blob payloads over pooled gRPC streams.
//!
//! Every operation borrows one pooled channel for its whole duration and
//! releases it on every exit path. Uploads are written to a single
//! client-streamed call; frames of a stream are pulled by the transport one
//! at a time, so a stream never has more than one writer.
//!
//! ## Failure policy
//!
//! Any stream-level error aborts the whole operation, is logged at `error`
//! and returned unchanged as [`Error::Transfer`]. Nothing is retried and no
//! partial result is returned.
//!
//! Cancellation before a stream is opened (waiting for a lease or for the
//! chunk limit) returns [`Error::Cancelled`]. Once a stream is open, the
//! in-flight call is dropped, which resets the HTTP/2 stream so the server
//! never sees a cleanly finished upload, and the operation fails as a
//! transfer error with a `Cancelled` status.
//!
//! ## Framing
//!
//! Frames follow input order. A blob with empty content is written as one
//! empty frame so the server still marks it as written.
//!
//! ## Streamed uploads
//!
//! Content produced incrementally is pulled by a spawned feeder task and
//! queued into a bounded channel of `stream_buffer_size` frames, which backs
//! the request body. The feeder stops as soon as the call is dropped.

use super::{
    chunker::{chunk_stream, chunks},
    download::BlobChunkStream,
};
use crate::{metrics, pool::ChannelPool, service::configuration::ServiceConfigLoader};
use bytes::{Bytes, BytesMut};
use core::num::NonZeroUsize;
use core::pin::pin;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use gridlink_core::{
    BlobInfo, Error, Result,
    proto::{
        DownloadResultDataRequest, ResultIdentifier, UploadResultDataRequest,
        results_client::ResultsClient,
    },
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Status, transport::Channel};
use tracing::Instrument;

/// Drives blob uploads and downloads.
#[derive(Clone)]
pub struct TransferEngine {
    pool: Arc<ChannelPool>,
    limits: Arc<ServiceConfigLoader>,
    stream_buffer_size: usize,
}

impl TransferEngine {
    pub fn new(
        pool: Arc<ChannelPool>,
        limits: Arc<ServiceConfigLoader>,
        stream_buffer_size: usize,
    ) -> Self {
        Self {
            pool,
            limits,
            stream_buffer_size: stream_buffer_size.max(1),
        }
    }

    /// The server's maximum frame payload, fetched on first use.
    pub async fn chunk_size(&self, cancel: &CancellationToken) -> Result<NonZeroUsize> {
        self.limits.chunk_size(cancel).await
    }

    /// Writes `content` as exactly one frame on a fresh upload stream.
    ///
    /// The content is not split: callers must keep it within the server's
    /// chunk limit or use [`upload_blobs`](Self::upload_blobs).
    #[tracing::instrument(skip_all, fields(blob_id = blob.blob_id(), bytes = content.len()))]
    pub async fn upload_single(
        &self,
        blob: &BlobInfo,
        content: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        upload_single_with(&mut client, blob, content, cancel).await
    }

    /// Chunks every `(blob, content)` pair and writes all chunks, tagged with
    /// their blob and in input order, onto one shared upload stream. A blob
    /// with empty content is written as a single empty frame.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigurationUnavailable`] if the chunk size cannot be
    /// fetched; [`Error::Transfer`] if the stream fails.
    #[tracing::instrument(skip_all)]
    pub async fn upload_blobs<I>(&self, blobs: I, cancel: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = (BlobInfo, Bytes)>,
    {
        let max = self.chunk_size(cancel).await?;
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        upload_chunked_with(&mut client, blobs, max, cancel).await
    }

    /// Uploads content produced incrementally, chunking each piece as it
    /// arrives. A producer that yields no bytes writes one empty frame.
    #[tracing::instrument(skip_all, fields(blob_id = blob.blob_id()))]
    pub async fn upload_stream<S>(
        &self,
        blob: &BlobInfo,
        content: S,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let max = self.chunk_size(cancel).await?;
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        upload_stream_with(
            &mut client,
            blob,
            content,
            max,
            self.stream_buffer_size,
            cancel,
        )
        .await
    }

    /// Uploads an incrementally produced sequence of `(blob, content)` pairs
    /// on one shared stream.
    #[tracing::instrument(skip_all)]
    pub async fn upload_blobs_stream<S>(&self, blobs: S, cancel: &CancellationToken) -> Result<()>
    where
        S: Stream<Item = (BlobInfo, Bytes)> + Send + 'static,
    {
        let max = self.chunk_size(cancel).await?;
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());

        let frames = blobs.flat_map(move |(blob, content)| {
            stream::iter(blob_frames(ResultIdentifier::from(&blob), content, max))
        });
        let frames = spawn_feeder(frames, None, self.stream_buffer_size);
        upload_frames(&mut client, frames, cancel).await
    }

    /// Downloads the whole blob into one contiguous buffer.
    ///
    /// Returns only after the server has closed the stream.
    #[tracing::instrument(skip_all, fields(blob_id = blob.blob_id()))]
    pub async fn download_all(&self, blob: &BlobInfo, cancel: &CancellationToken) -> Result<Bytes> {
        let mut chunks = pin!(self.download_stream(blob, cancel).await?);

        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Starts a download and returns the chunks as they arrive.
    #[tracing::instrument(skip_all, fields(blob_id = blob.blob_id()))]
    pub async fn download_stream(
        &self,
        blob: &BlobInfo,
        cancel: &CancellationToken,
    ) -> Result<BlobChunkStream> {
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());

        let request = DownloadResultDataRequest {
            session_id: blob.session_id().to_string(),
            result_id: blob.blob_id().to_string(),
        };

        let inner = match cancel
            .run_until_cancelled(client.download_result_data(request))
            .await
        {
            Some(Ok(response)) => response.into_inner(),
            Some(Err(status)) => {
                metrics::increment_transfer_errors();
                tracing::error!(%status, "Failed to open download stream");
                return Err(Error::transfer("download")(status));
            }
            None => return Err(Error::Cancelled),
        };

        Ok(BlobChunkStream::new(
            inner,
            cancel.clone().cancelled_owned(),
            blob.blob_id().to_string(),
            lease,
        ))
    }
}

fn frame(id: ResultIdentifier, data_chunk: Bytes) -> UploadResultDataRequest {
    UploadResultDataRequest {
        id: Some(id),
        data_chunk,
    }
}

/// All frames of one blob: its chunks, or one empty frame for empty content.
fn blob_frames(
    id: ResultIdentifier,
    content: Bytes,
    max: NonZeroUsize,
) -> impl Iterator<Item = UploadResultDataRequest> {
    let empty = content.is_empty().then(|| frame(id.clone(), Bytes::new()));
    chunks(content, max)
        .map(move |chunk| frame(id.clone(), chunk))
        .chain(empty)
}

/// One-frame upload on a borrowed client.
pub(crate) async fn upload_single_with(
    client: &mut ResultsClient<Channel>,
    blob: &BlobInfo,
    content: Bytes,
    cancel: &CancellationToken,
) -> Result<()> {
    let frames = stream::iter([frame(ResultIdentifier::from(blob), content)]);
    upload_frames(client, frames, cancel).await
}

/// Chunked multi-blob upload on a borrowed client.
pub(crate) async fn upload_chunked_with<I>(
    client: &mut ResultsClient<Channel>,
    blobs: I,
    max: NonZeroUsize,
    cancel: &CancellationToken,
) -> Result<()>
where
    I: IntoIterator<Item = (BlobInfo, Bytes)>,
{
    // Frames are slices of the callers' buffers, so collecting them is cheap.
    let frames: Vec<_> = blobs
        .into_iter()
        .flat_map(|(blob, content)| blob_frames(ResultIdentifier::from(&blob), content, max))
        .collect();
    upload_frames(client, stream::iter(frames), cancel).await
}

/// Incremental single-blob upload on a borrowed client.
pub(crate) async fn upload_stream_with<S>(
    client: &mut ResultsClient<Channel>,
    blob: &BlobInfo,
    content: S,
    max: NonZeroUsize,
    buffer: usize,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let id = ResultIdentifier::from(blob);
    let empty = frame(id.clone(), Bytes::new());
    let frames = chunk_stream(content, max).map(move |chunk| frame(id.clone(), chunk));
    upload_frames(client, spawn_feeder(frames, Some(empty), buffer), cancel).await
}

/// Moves frame production onto its own task, behind a bounded queue.
///
/// The queue closes cleanly only once the producer is exhausted. If the
/// producer yielded nothing, `if_empty` is sent as the only frame. A dropped
/// call stops the feeder at its next poll.
fn spawn_feeder<S>(
    frames: S,
    if_empty: Option<UploadResultDataRequest>,
    buffer: usize,
) -> ReceiverStream<UploadResultDataRequest>
where
    S: Stream<Item = UploadResultDataRequest> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer);

    let fut = async move {
        let mut frames = pin!(frames);
        let mut sent = 0_usize;
        loop {
            let next = tokio::select! {
                () = tx.closed() => break,
                next = frames.next() => next,
            };
            let Some(frame) = next else { break };
            if tx.send(frame).await.is_err() {
                break;
            }
            sent += 1;
        }
        if tx.is_closed() {
            tracing::debug!("Upload call ended before the producer was exhausted");
            return;
        }
        if let Some(frame) = if_empty.filter(|_| sent == 0) {
            // Ignored: a send error only means the call is already gone.
            let _ = tx.send(frame).await;
        }
    };
    tokio::spawn(fut.instrument(tracing::debug_span!("upload_feeder")));

    ReceiverStream::new(rx)
}

async fn upload_frames<S>(
    client: &mut ResultsClient<Channel>,
    frames: S,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = UploadResultDataRequest> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let frames = frames.inspect(|f| metrics::record_chunk_uploaded(f.data_chunk.len() as u64));

    match cancel.run_until_cancelled(client.upload_result_data(frames)).await {
        Some(Ok(ack)) => {
            tracing::debug!(blobs = ack.get_ref().results.len(), "Upload acknowledged");
            Ok(())
        }
        Some(Err(status)) => {
            metrics::increment_transfer_errors();
            tracing::error!(%status, "Upload stream failed");
            Err(Error::transfer("upload")(status))
        }
        None => {
            metrics::increment_transfer_errors();
            tracing::error!("Upload stream cancelled");
            Err(Error::transfer("upload")(Status::cancelled(
                "upload cancelled by the caller",
            )))
        }
    }
}
