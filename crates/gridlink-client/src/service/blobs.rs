//! Blob registry: metadata placeholders, blobs with content, and state
//! queries.
//!
//! Metadata creation never carries content. Content is always written
//! afterwards through the upload stream, split to the server's chunk limit
//! when it exceeds it.

use super::{configuration::ServiceConfigLoader, unary};
use crate::{
    metrics,
    pool::ChannelPool,
    transfer::{
        TransferEngine,
        engine::{upload_chunked_with, upload_single_with, upload_stream_with},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use gridlink_core::{
    BlobInfo, BlobPagination, BlobState, Error, Result, SessionInfo,
    proto::{
        CreateResultsMetaDataRequest, CreateResultsRequest, GetResultRequest,
        ListResultsRequest, ResultRaw, create_results_meta_data_request,
        create_results_request, results_client::ResultsClient,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

#[derive(Clone)]
pub struct BlobService {
    pool: Arc<ChannelPool>,
    limits: Arc<ServiceConfigLoader>,
    transfer: TransferEngine,
    max_concurrent_creations: usize,
    stream_buffer_size: usize,
}

impl BlobService {
    pub fn new(
        pool: Arc<ChannelPool>,
        limits: Arc<ServiceConfigLoader>,
        max_concurrent_creations: usize,
        stream_buffer_size: usize,
    ) -> Self {
        let stream_buffer_size = stream_buffer_size.max(1);
        Self {
            transfer: TransferEngine::new(
                Arc::clone(&pool),
                Arc::clone(&limits),
                stream_buffer_size,
            ),
            pool,
            limits,
            max_concurrent_creations: max_concurrent_creations.max(1),
            stream_buffer_size,
        }
    }

    /// The engine used for every content upload of this service.
    pub fn transfer(&self) -> &TransferEngine {
        &self.transfer
    }

    /// Registers one empty blob named `name`.
    pub async fn create_blob_metadata(
        &self,
        session: &SessionInfo,
        name: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<BlobInfo> {
        let mut blobs = self.create_blobs_metadata(session, [name], cancel).await?;
        blobs.pop().ok_or(Error::UnexpectedResponse {
            method: "CreateResultsMetaData",
            reason: "no result returned".to_string(),
        })
    }

    /// Registers one empty blob per name in a single call. The returned
    /// blobs are in the order of `names`.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id()))]
    pub async fn create_blobs_metadata<I, N>(
        &self,
        session: &SessionInfo,
        names: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobInfo>>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let results: Vec<_> = names
            .into_iter()
            .map(|name| create_results_meta_data_request::ResultCreate { name: name.into() })
            .collect();
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let expected = results.len();

        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let request = CreateResultsMetaDataRequest {
            results,
            session_id: session.session_id().to_string(),
        };
        let response = unary(
            "CreateResultsMetaData",
            cancel,
            client.create_results_meta_data(request),
        )
        .await?;

        let blobs = expect_count("CreateResultsMetaData", response.results, expected)?;
        metrics::increment_blobs_created(blobs.len() as u64);
        Ok(blobs)
    }

    /// Registers `quantity` empty blobs under random names.
    pub async fn create_unnamed_blobs_metadata(
        &self,
        session: &SessionInfo,
        quantity: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobInfo>> {
        let names = (0..quantity).map(|_| uuid::Uuid::new_v4().to_string());
        self.create_blobs_metadata(session, names, cancel).await
    }

    /// Creates a blob and writes `content` into it.
    ///
    /// The metadata is created empty first. Content within the chunk limit
    /// is then written as one frame; larger content is chunked. Both calls
    /// share one pooled connection.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigurationUnavailable`] if the chunk limit is unknown,
    /// [`Error::Rpc`] if creation fails, [`Error::Transfer`] if the upload
    /// fails. A blob whose upload failed stays registered without content.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id(), bytes = content.len()))]
    pub async fn create_blob(
        &self,
        session: &SessionInfo,
        name: impl Into<String>,
        content: Bytes,
        cancel: &CancellationToken,
    ) -> Result<BlobInfo> {
        // Loaded before leasing: the first fetch needs a connection of its own.
        let max = self.limits.chunk_size(cancel).await?;

        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let blob = create_empty(&mut client, session, name.into(), cancel).await?;

        if content.len() > max.get() {
            tracing::debug!(blob_id = blob.blob_id(), "Content exceeds one chunk");
            upload_chunked_with(&mut client, [(blob.clone(), content)], max, cancel).await?;
        } else {
            upload_single_with(&mut client, &blob, content, cancel).await?;
        }
        Ok(blob)
    }

    /// Creates a blob and fills it from an incremental producer.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id()))]
    pub async fn create_blob_from_stream<S>(
        &self,
        session: &SessionInfo,
        name: impl Into<String>,
        content: S,
        cancel: &CancellationToken,
    ) -> Result<BlobInfo>
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let max = self.limits.chunk_size(cancel).await?;

        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let blob = create_empty(&mut client, session, name.into(), cancel).await?;

        upload_stream_with(
            &mut client,
            &blob,
            content,
            max,
            self.stream_buffer_size,
            cancel,
        )
        .await?;
        Ok(blob)
    }

    /// Creates many blobs with content, each as an independent
    /// [`create_blob`](Self::create_blob).
    ///
    /// At most `max_concurrent_creations` creations run at once. Results are
    /// in input order. The first failure fails the whole batch and the
    /// creations still in flight are dropped.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id()))]
    pub async fn create_blobs<I, N>(
        &self,
        session: &SessionInfo,
        items: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobInfo>>
    where
        I: IntoIterator<Item = (N, Bytes)>,
        N: Into<String>,
    {
        stream::iter(items)
            .map(|(name, content)| self.create_blob(session, name, content, cancel))
            .buffered(self.max_concurrent_creations)
            .try_collect()
            .await
    }

    /// Creates all blobs in one metadata call, then writes all contents on
    /// one shared upload stream.
    ///
    /// Returns the blobs in input order.
    pub async fn create_blobs_batched<I, N>(
        &self,
        session: &SessionInfo,
        items: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobInfo>>
    where
        I: IntoIterator<Item = (N, Bytes)>,
        N: Into<String>,
    {
        let mut created = Vec::new();
        self.create_blobs_batched_recording(session, items, &mut created, cancel)
            .await?;
        Ok(created)
    }

    /// Same as [`create_blobs_batched`](Self::create_blobs_batched), but
    /// appends the blobs to `created` as soon as their metadata exists.
    ///
    /// When the upload fails, `created` still lists the blobs that were
    /// registered and left without content.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id()))]
    pub async fn create_blobs_batched_recording<I, N>(
        &self,
        session: &SessionInfo,
        items: I,
        created: &mut Vec<BlobInfo>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (N, Bytes)>,
        N: Into<String>,
    {
        let (names, contents): (Vec<String>, Vec<Bytes>) =
            items.into_iter().map(|(name, c)| (name.into(), c)).unzip();
        if names.is_empty() {
            return Ok(());
        }

        let max = self.limits.chunk_size(cancel).await?;

        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let blobs = create_empty_many(&mut client, session, names, cancel).await?;
        created.extend(blobs.iter().cloned());

        let pairs = blobs.into_iter().zip(contents);
        upload_chunked_with(&mut client, pairs, max, cancel).await
    }

    /// Fetches a fresh snapshot of one blob.
    #[tracing::instrument(skip_all, fields(blob_id = blob_id))]
    pub async fn get_blob_state(&self, blob_id: &str, cancel: &CancellationToken) -> Result<BlobState> {
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let request = GetResultRequest {
            result_id: blob_id.to_string(),
        };
        let response = unary("GetResult", cancel, client.get_result(request)).await?;

        response
            .result
            .map(BlobState::from)
            .ok_or_else(|| Error::UnexpectedResponse {
                method: "GetResult",
                reason: format!("no result for {blob_id}"),
            })
    }

    /// Lists blob snapshots matching `pagination`, ordered by the server.
    #[tracing::instrument(skip_all, fields(page = pagination.page, page_size = pagination.page_size))]
    pub async fn list_blobs(
        &self,
        pagination: &BlobPagination,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobState>> {
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());
        let request = ListResultsRequest::from(pagination);
        let response = unary("ListResults", cancel, client.list_results(request)).await?;

        tracing::debug!(
            total = response.total,
            returned = response.results.len(),
            "Listed blobs"
        );
        Ok(response.results.into_iter().map(BlobState::from).collect())
    }
}

async fn create_empty(
    client: &mut ResultsClient<Channel>,
    session: &SessionInfo,
    name: String,
    cancel: &CancellationToken,
) -> Result<BlobInfo> {
    let mut blobs = create_empty_many(client, session, vec![name], cancel).await?;
    blobs.pop().ok_or(Error::UnexpectedResponse {
        method: "CreateResults",
        reason: "no result returned".to_string(),
    })
}

async fn create_empty_many(
    client: &mut ResultsClient<Channel>,
    session: &SessionInfo,
    names: Vec<String>,
    cancel: &CancellationToken,
) -> Result<Vec<BlobInfo>> {
    let expected = names.len();
    let request = CreateResultsRequest {
        results: names
            .into_iter()
            .map(|name| create_results_request::ResultCreate { name })
            .collect(),
        session_id: session.session_id().to_string(),
    };
    let response = unary("CreateResults", cancel, client.create_results(request)).await?;

    let blobs = expect_count("CreateResults", response.results, expected)?;
    metrics::increment_blobs_created(blobs.len() as u64);
    Ok(blobs)
}

fn expect_count(method: &'static str, results: Vec<ResultRaw>, expected: usize) -> Result<Vec<BlobInfo>> {
    if results.len() != expected {
        return Err(Error::UnexpectedResponse {
            method,
            reason: format!("requested {expected} results, got {}", results.len()),
        });
    }
    Ok(results.into_iter().map(BlobInfo::from).collect())
}
