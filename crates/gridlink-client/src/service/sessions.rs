use super::unary;
use crate::pool::ChannelPool;
use gridlink_core::{
    Result, SessionInfo, TaskConfiguration,
    proto::{CreateSessionRequest, TaskOptions, sessions_client::SessionsClient},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SessionService {
    pool: Arc<ChannelPool>,
}

impl SessionService {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }

    /// Opens a session whose tasks default to `defaults` and may run on any
    /// of `partitions`.
    #[tracing::instrument(skip_all, fields(partition = %defaults.partition_id))]
    pub async fn create_session<I, P>(
        &self,
        defaults: &TaskConfiguration,
        partitions: I,
        cancel: &CancellationToken,
    ) -> Result<SessionInfo>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let request = CreateSessionRequest {
            default_task_option: Some(TaskOptions::from(defaults)),
            partition_ids: partitions.into_iter().map(Into::into).collect(),
        };

        let lease = self.pool.acquire(cancel).await?;
        let mut client = SessionsClient::new(lease.channel());
        let response = unary("CreateSession", cancel, client.create_session(request)).await?;

        tracing::info!(session_id = %response.session_id, "Session created");
        Ok(SessionInfo::new(response.session_id))
    }
}
