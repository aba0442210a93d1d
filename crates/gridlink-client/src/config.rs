//! Client configuration.
//!
//! [`ClientConfig`] controls how many connections the client opens, how many
//! calls may be in flight at once, and how wide blob-creation fan-outs may
//! grow. No timeout is applied unless one is set here explicitly.

use core::time::Duration;
use gridlink_core::{Error, Result};
use tonic::transport::Endpoint;

/// Number of HTTP/2 channels opened to the cluster.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Number of calls (unary or streamed) allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 32;

/// Number of blobs created concurrently by a single `create_blobs` call.
pub const DEFAULT_MAX_CONCURRENT_CREATIONS: usize = 8;

/// Capacity of the frame queue feeding an upload stream.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Cluster endpoint, e.g. `http://127.0.0.1:5001`.
    pub endpoint: String,
    pub pool_size: usize,
    pub max_concurrent_calls: usize,
    /// Upper bound on concurrent blob creations inside one fan-out. Each
    /// creation holds a pooled connection, so this must not exceed
    /// `max_concurrent_calls`.
    pub max_concurrent_creations: usize,
    pub stream_buffer_size: usize,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            pool_size: DEFAULT_POOL_SIZE,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            max_concurrent_creations: DEFAULT_MAX_CONCURRENT_CREATIONS,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            connect_timeout: None,
            request_timeout: None,
            tcp_keepalive: None,
        }
    }

    /// Checks sizes and the endpoint URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any size is zero, if the creation
    /// fan-out could starve the pool, or if the endpoint cannot be parsed.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pool_size", self.pool_size),
            ("max_concurrent_calls", self.max_concurrent_calls),
            ("max_concurrent_creations", self.max_concurrent_creations),
            ("stream_buffer_size", self.stream_buffer_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig {
                    reason: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.max_concurrent_creations > self.max_concurrent_calls {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "max_concurrent_creations ({}) exceeds max_concurrent_calls ({})",
                    self.max_concurrent_creations, self.max_concurrent_calls
                ),
            });
        }

        self.build_endpoint().map(|_| ())
    }

    pub(crate) fn build_endpoint(&self) -> Result<Endpoint> {
        let mut endpoint =
            Endpoint::from_shared(self.endpoint.clone()).map_err(|e| Error::InvalidConfig {
                reason: format!("invalid endpoint {:?}: {e}", self.endpoint),
            })?;
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Ok(endpoint
            .tcp_keepalive(self.tcp_keepalive)
            .http2_adaptive_window(true))
    }
}
