//! Chunked blob transfer.
//!
//! - [`chunker`] - slicing content into frames no larger than the server's
//!   chunk limit.
//! - [`engine`] - [`TransferEngine`]: uploads and downloads over pooled
//!   streams.
//! - [`download`] - [`BlobChunkStream`]: chunks of a download as they arrive.

pub mod chunker;
pub mod download;
pub mod engine;

pub use download::BlobChunkStream;
pub use engine::TransferEngine;
