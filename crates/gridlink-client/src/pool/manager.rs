//! Pool of gRPC channels lent out for the scope of one logical operation.
//!
//! [`ChannelPool`] owns a fixed set of lazily connected [`Channel`]s and a
//! semaphore bounding how many calls may hold a channel at once. Leases are
//! handed out round-robin and support coordinated shutdown via a shared
//! [`CancellationToken`].

use super::lease::PooledChannel;
use crate::config::ClientConfig;
use core::sync::atomic::{AtomicUsize, Ordering};
use gridlink_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// Lends channels to callers, one lease per call or stream.
pub struct ChannelPool {
    channels: Vec<Channel>,
    next_channel: AtomicUsize,
    permits: Arc<Semaphore>,
    shutdown_token: CancellationToken,
}

impl ChannelPool {
    /// Builds `pool_size` lazily connected channels to the configured
    /// endpoint.
    ///
    /// No connection is attempted until the first call. Must be invoked from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.build_endpoint()?;
        let channels = (0..config.pool_size)
            .map(|_| endpoint.connect_lazy())
            .collect();
        Self::from_channels(channels, config.max_concurrent_calls)
    }

    /// Wraps already built channels. At most `max_leases` leases are
    /// outstanding at any time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `channels` is empty or
    /// `max_leases` is zero.
    pub fn from_channels(channels: Vec<Channel>, max_leases: usize) -> Result<Self> {
        if channels.is_empty() || max_leases == 0 {
            return Err(Error::InvalidConfig {
                reason: "a channel pool needs at least one channel and one lease".to_string(),
            });
        }
        Ok(Self {
            channels,
            next_channel: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(max_leases)),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Returns the index of the next channel to lend (round-robin).
    fn next_channel_index(&self) -> usize {
        self.next_channel.fetch_add(1, Ordering::Relaxed) % self.channels.len()
    }

    /// Waits for a free permit and lends the next channel.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires while waiting.
    /// - [`Error::PoolClosed`] if the pool is, or gets, closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PooledChannel> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::PoolClosed);
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = self.shutdown_token.cancelled() => return Err(Error::PoolClosed),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::PoolClosed)?
            }
        };

        let idx = self.next_channel_index();
        tracing::trace!(channel = idx, "Lent pooled channel");
        Ok(PooledChannel::new(self.channels[idx].clone(), permit))
    }

    /// Number of leases that can be handed out right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuses new leases and wakes every waiter with
    /// [`Error::PoolClosed`]. Outstanding leases stay valid until dropped.
    pub fn close(&self) {
        tracing::debug!("Closing channel pool");
        self.shutdown_token.cancel();
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}
