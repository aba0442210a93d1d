//! Waiting for blobs to reach a terminal state.
//!
//! The waiter subscribes to the `Events` stream for the session and the
//! blobs of interest. The server sends the current status of every
//! requested blob first and then every later transition, so a blob already
//! completed before the subscription is still observed.

use crate::pool::ChannelPool;
use gridlink_core::{
    BlobInfo, BlobStatus, Error, Result, SessionInfo,
    proto::{EventSubscriptionRequest, events_client::EventsClient},
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct EventsService {
    pool: Arc<ChannelPool>,
}

impl EventsService {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }

    /// Returns once every blob in `blobs` is completed.
    pub async fn wait_for_blobs(
        &self,
        session: &SessionInfo,
        blobs: &[BlobInfo],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ids = blobs.iter().map(|b| b.blob_id().to_string());
        self.wait_for_blob_ids(session, ids, cancel).await
    }

    /// Returns once every blob in `blob_ids` is completed.
    ///
    /// # Errors
    ///
    /// - [`Error::BlobAborted`] as soon as one of the blobs is aborted.
    /// - [`Error::Cancelled`] if `cancel` fires first.
    /// - [`Error::UnexpectedResponse`] if the server closes the stream while
    ///   blobs are still pending.
    /// - [`Error::Rpc`] if the subscription fails.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id()))]
    pub async fn wait_for_blob_ids<I, S>(
        &self,
        session: &SessionInfo,
        blob_ids: I,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pending: HashSet<String> = blob_ids.into_iter().map(Into::into).collect();
        if pending.is_empty() {
            return Ok(());
        }

        let lease = self.pool.acquire(cancel).await?;
        let mut client = EventsClient::new(lease.channel());
        let request = EventSubscriptionRequest {
            session_id: session.session_id().to_string(),
            result_ids: pending.iter().cloned().collect(),
        };
        let mut events = super::unary("GetEvents", cancel, client.get_events(request)).await?;

        tracing::debug!(pending = pending.len(), "Waiting for blobs");
        while !pending.is_empty() {
            let event = cancel
                .run_until_cancelled(events.message())
                .await
                .ok_or(Error::Cancelled)?
                .map_err(Error::rpc("GetEvents"))?
                .ok_or_else(|| Error::UnexpectedResponse {
                    method: "GetEvents",
                    reason: format!("event stream ended with {} blobs pending", pending.len()),
                })?;

            match BlobStatus::from(event.status()) {
                BlobStatus::Completed => {
                    if pending.remove(&event.result_id) {
                        tracing::trace!(blob_id = %event.result_id, "Blob completed");
                    }
                }
                BlobStatus::Aborted if pending.contains(&event.result_id) => {
                    tracing::warn!(blob_id = %event.result_id, "Blob aborted");
                    return Err(Error::BlobAborted {
                        blob_id: event.result_id,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Waiting by blob name is not supported: names are not unique.
    pub async fn wait_for_blob_names<I, S>(
        &self,
        _session: &SessionInfo,
        _names: I,
        _cancel: &CancellationToken,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Err(Error::NotImplemented {
            operation: "wait_for_blob_names",
        })
    }
}
