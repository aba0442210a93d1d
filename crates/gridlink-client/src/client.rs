use crate::{
    config::ClientConfig,
    pool::ChannelPool,
    service::{BlobService, EventsService, ServiceConfigLoader, SessionService, TaskService},
    transfer::TransferEngine,
};
use gridlink_core::{Result, ServiceConfiguration};
use std::sync::Arc;

/// Entry point bundling every service over one channel pool and one cached
/// service configuration.
///
/// Cloning is cheap and clones share the pool and the cache.
#[derive(Clone)]
pub struct GridClient {
    pool: Arc<ChannelPool>,
    limits: Arc<ServiceConfigLoader>,
    blobs: BlobService,
    tasks: TaskService,
    events: EventsService,
    sessions: SessionService,
}

impl GridClient {
    /// Builds a client whose connections open on first use.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`gridlink_core::Error::InvalidConfig`] if `config` does not
    /// validate.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self> {
        let pool = Arc::new(ChannelPool::connect_lazy(config)?);
        tracing::info!(
            endpoint = %config.endpoint,
            pool_size = config.pool_size,
            max_concurrent_calls = config.max_concurrent_calls,
            "Grid client ready"
        );
        Ok(Self::from_pool(pool, config))
    }

    /// Builds a client over an existing pool, taking limits from `config`.
    pub fn from_pool(pool: Arc<ChannelPool>, config: &ClientConfig) -> Self {
        let limits = Arc::new(ServiceConfigLoader::new(Arc::clone(&pool)));
        Self::assemble(pool, limits, config)
    }

    /// Builds a client that uses `service` instead of asking the cluster for
    /// its limits.
    pub fn with_service_configuration(
        pool: Arc<ChannelPool>,
        config: &ClientConfig,
        service: ServiceConfiguration,
    ) -> Self {
        let limits = Arc::new(ServiceConfigLoader::with_configuration(
            Arc::clone(&pool),
            service,
        ));
        Self::assemble(pool, limits, config)
    }

    fn assemble(
        pool: Arc<ChannelPool>,
        limits: Arc<ServiceConfigLoader>,
        config: &ClientConfig,
    ) -> Self {
        let blobs = BlobService::new(
            Arc::clone(&pool),
            Arc::clone(&limits),
            config.max_concurrent_creations,
            config.stream_buffer_size,
        );
        Self {
            tasks: TaskService::new(Arc::clone(&pool), blobs.clone()),
            events: EventsService::new(Arc::clone(&pool)),
            sessions: SessionService::new(Arc::clone(&pool)),
            blobs,
            limits,
            pool,
        }
    }

    pub fn blobs(&self) -> &BlobService {
        &self.blobs
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn events(&self) -> &EventsService {
        &self.events
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn transfer(&self) -> &TransferEngine {
        self.blobs.transfer()
    }

    pub fn service_configuration(&self) -> &ServiceConfigLoader {
        &self.limits
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Closes the pool. Calls already holding a connection run to
    /// completion; every later call fails with
    /// [`gridlink_core::Error::PoolClosed`].
    pub fn close(&self) {
        self.pool.close();
    }
}
