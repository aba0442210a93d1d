//! Pooled gRPC channels.
//!
//! - [`manager`] - [`ChannelPool`]: round-robin channels behind a permit
//!   semaphore.
//! - [`lease`] - [`PooledChannel`]: a scoped lease released on drop.

pub mod lease;
pub mod manager;

pub use lease::PooledChannel;
pub use manager::ChannelPool;
