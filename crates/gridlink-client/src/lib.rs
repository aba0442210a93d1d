//! # `gridlink-client`: Task-Cluster Client
//!
//! Async client for a distributed task-execution cluster. Tasks and their
//! input and output data ("blobs") are registered, transferred and submitted
//! over gRPC.
//!
//! ## Highlights
//!
//! - **Chunked transfer**: blob content is split client-side to the chunk
//!   limit reported by the cluster. One upload stream may carry many blobs,
//!   and no frame ever mixes two blobs.
//! - **Pooled connections**: every call borrows a channel for exactly one
//!   logical operation, with a global cap on calls in flight.
//! - **Atomic submission**: inline dependency content is turned into blobs,
//!   then every task goes out in a single request.
//! - **Cooperative cancellation**: every operation takes a
//!   [`CancellationToken`] and observes it at each await point.
//! - **Fail-fast errors**: nothing is retried and nothing returns a partial
//!   result.
//!
//! ## Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use gridlink_client::{CancellationToken, ClientConfig, GridClient, TaskConfiguration, TaskNode};
//!
//! # async fn run() -> gridlink_client::Result<()> {
//! let client = GridClient::connect_lazy(&ClientConfig::new("http://127.0.0.1:5001"))?;
//! let cancel = CancellationToken::new();
//!
//! let options = TaskConfiguration::default();
//! let session = client.sessions().create_session(&options, ["default"], &cancel).await?;
//!
//! let payload = client
//!     .blobs()
//!     .create_blob(&session, "payload", Bytes::from_static(b"hello"), &cancel)
//!     .await?;
//! let output = client.blobs().create_blob_metadata(&session, "output", &cancel).await?;
//!
//! client
//!     .tasks()
//!     .submit_tasks(&session, vec![TaskNode::new(payload, vec![output.clone()])], None, &cancel)
//!     .await?;
//! client.events().wait_for_blobs(&session, &[output.clone()], &cancel).await?;
//!
//! let result = client.transfer().download_all(&output, &cancel).await?;
//! println!("{}", String::from_utf8_lossy(&result));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - [`ClientConfig`] and its validation.
//! - [`pool`] - the channel pool and its leases.
//! - [`transfer`] - chunking, uploads and downloads.
//! - [`service`] - blobs, tasks, events and sessions.
//! - [`metrics`] - OpenTelemetry counters behind the `metrics` feature.

pub mod client;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod transfer;

pub use client::GridClient;
pub use config::ClientConfig;
pub use gridlink_core::*;
pub use tokio_util::sync::CancellationToken;
