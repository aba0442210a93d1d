#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions generated from `proto/gridlink.proto`.
///
/// ## Services
///
/// - `Results` - blob metadata creation, chunked upload/download, state and
///   listing queries, and the service configuration (maximum chunk size).
/// - `Tasks` - atomic batch task submission.
/// - `Sessions` - session creation.
/// - `Events` - per-result status updates used to wait for completion.
///
/// ## Upload framing
///
/// `UploadResultData` is client-streamed. Each `UploadResultDataRequest`
/// carries the `(session_id, result_id)` pair it belongs to and at most
/// `data_chunk_max_size` bytes, so one stream may interleave several results
/// as long as each frame stays within the limit.
pub mod proto {
    tonic::include_proto!("gridlink");
}
