//! Client-side services, one per remote service area.
//!
//! - [`blobs`] - [`BlobService`]: metadata creation, content creation, state
//!   and listing queries.
//! - [`tasks`] - [`TaskService`]: dependency resolution and atomic batch
//!   submission.
//! - [`events`] - [`EventsService`]: waiting for blobs to reach a terminal
//!   state.
//! - [`sessions`] - [`SessionService`]: session creation.
//! - [`configuration`] - [`ServiceConfigLoader`]: the lazily fetched chunk
//!   limit shared by every service of one client.

pub mod blobs;
pub mod configuration;
pub mod events;
pub mod sessions;
pub mod tasks;

pub use blobs::BlobService;
pub use configuration::ServiceConfigLoader;
pub use events::EventsService;
pub use sessions::SessionService;
pub use tasks::TaskService;

use core::future::Future;
use gridlink_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tonic::{Response, Status};

/// Awaits one unary call, observing `cancel`.
pub(crate) async fn unary<T, F>(method: &'static str, cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = core::result::Result<Response<T>, Status>>,
{
    match cancel.run_until_cancelled(call).await {
        Some(Ok(response)) => Ok(response.into_inner()),
        Some(Err(status)) => {
            tracing::warn!(method, %status, "RPC failed");
            Err(Error::rpc(method)(status))
        }
        None => Err(Error::Cancelled),
    }
}
