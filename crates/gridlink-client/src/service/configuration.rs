//! Lazily fetched, per-client service configuration.
//!
//! The maximum chunk size is fetched from the cluster on first use and cached
//! for the lifetime of the loader. The first fetch is serialized behind a
//! [`OnceCell`], so concurrent first callers share one request. A failed
//! fetch is not cached and the next caller tries again. There is no refresh
//! path: a changed server limit requires a new client.

use crate::pool::ChannelPool;
use core::num::NonZeroUsize;
use gridlink_core::{
    Error, Result, ServiceConfiguration,
    proto::{ResultsServiceConfigurationRequest, results_client::ResultsClient},
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

pub struct ServiceConfigLoader {
    pool: Arc<ChannelPool>,
    cached: OnceCell<ServiceConfiguration>,
}

impl ServiceConfigLoader {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self {
            pool,
            cached: OnceCell::new(),
        }
    }

    /// Builds a loader that never contacts the server.
    pub fn with_configuration(pool: Arc<ChannelPool>, config: ServiceConfiguration) -> Self {
        Self {
            pool,
            cached: OnceCell::new_with(Some(config)),
        }
    }

    /// Returns the cached configuration, fetching it first if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigurationUnavailable`] if the fetch fails or the server
    ///   reports a non-positive chunk size.
    /// - [`Error::Cancelled`] / [`Error::PoolClosed`] while waiting for a
    ///   connection.
    pub async fn ensure_loaded(&self, cancel: &CancellationToken) -> Result<ServiceConfiguration> {
        self.cached
            .get_or_try_init(|| self.fetch(cancel))
            .await
            .copied()
    }

    /// Shortcut for `ensure_loaded(..).data_chunk_max_size`.
    pub async fn chunk_size(&self, cancel: &CancellationToken) -> Result<NonZeroUsize> {
        Ok(self.ensure_loaded(cancel).await?.data_chunk_max_size)
    }

    /// The configuration if it has already been fetched.
    pub fn cached(&self) -> Option<ServiceConfiguration> {
        self.cached.get().copied()
    }

    #[tracing::instrument(skip_all)]
    async fn fetch(&self, cancel: &CancellationToken) -> Result<ServiceConfiguration> {
        let lease = self.pool.acquire(cancel).await?;
        let mut client = ResultsClient::new(lease.channel());

        let response = cancel
            .run_until_cancelled(client.get_service_configuration(ResultsServiceConfigurationRequest {}))
            .await
            .ok_or(Error::Cancelled)?
            .map_err(|status| {
                tracing::error!(%status, "Failed to fetch service configuration");
                Error::ConfigurationUnavailable {
                    reason: status.message().to_string(),
                }
            })?;

        let config = ServiceConfiguration::try_from(response.into_inner())?;
        tracing::debug!(
            data_chunk_max_size = config.data_chunk_max_size.get(),
            "Loaded service configuration"
        );
        Ok(config)
    }
}
