use core::ops::Deref;
use tokio::sync::OwnedSemaphorePermit;
use tonic::transport::Channel;

/// A channel borrowed from a [`ChannelPool`](super::ChannelPool).
///
/// The lease holds one pool permit for as long as it lives. Dropping it, on
/// success, error or cancellation alike, hands the permit back.
#[derive(Debug)]
pub struct PooledChannel {
    channel: Channel,
    _permit: OwnedSemaphorePermit,
}

impl PooledChannel {
    pub(crate) fn new(channel: Channel, permit: OwnedSemaphorePermit) -> Self {
        Self {
            channel,
            _permit: permit,
        }
    }

    /// Returns a handle suitable for building a generated gRPC client.
    ///
    /// The handle shares the underlying connection; keep the lease alive for
    /// as long as the handle is in use.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}
