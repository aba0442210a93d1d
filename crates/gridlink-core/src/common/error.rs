//! Error types for the task-cluster client.
//!
//! This module defines the central `Error` enum returned by every public
//! operation. It implements `From<Error>` for `tonic::Status` so errors can be
//! forwarded across a gRPC boundary with an appropriate status code.
//!
//! ## Error Cases
//! - `InvalidSubmission`: A task description violates a precondition. Raised
//!   before any network call.
//! - `Transfer`: An upload or download stream failed, was aborted by the
//!   remote end, or was cancelled by the caller after it opened.
//! - `ConfigurationUnavailable`: The service configuration could not be
//!   fetched, so no chunk size is known.
//! - `NotImplemented`: The operation is not supported by this transport.
//! - `Rpc`: A unary call failed.
//! - `UnexpectedResponse`: The server answered with a reply that breaks the
//!   request/response contract.
//! - `Cancelled`: The caller's cancellation token fired before any stream
//!   was opened.
//! - `BlobAborted`: A blob being waited on reached the aborted state.
//! - `PoolClosed`: The channel pool no longer lends connections.
//! - `InvalidConfig`: The client configuration was rejected, including an
//!   endpoint that cannot be parsed.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the task-cluster client.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A task description violates a submission precondition.
    #[error("Invalid submission: {reason}")]
    InvalidSubmission { reason: String },

    /// A streamed upload or download failed mid-transfer.
    #[error("Transfer failed during {operation}: {source}")]
    Transfer {
        operation: &'static str,
        #[source]
        source: Status,
    },

    /// The service configuration fetch failed or returned an unusable value.
    #[error("Service configuration unavailable: {reason}")]
    ConfigurationUnavailable { reason: String },

    /// The operation is intentionally unsupported.
    #[error("Operation not implemented: {operation}")]
    NotImplemented { operation: &'static str },

    /// A unary call to the remote service failed.
    #[error("RPC {method} failed: {source}")]
    Rpc {
        method: &'static str,
        #[source]
        source: Status,
    },

    /// The remote service answered with a malformed or mismatched reply.
    #[error("Unexpected response from {method}: {reason}")]
    UnexpectedResponse {
        method: &'static str,
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A blob reached the aborted terminal state while being waited on.
    #[error("Blob {blob_id} was aborted")]
    BlobAborted { blob_id: String },

    /// The channel pool has been closed.
    #[error("Channel pool is closed")]
    PoolClosed,

    /// The client configuration was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Builds an [`Error::Rpc`] for `method` from a failed call.
    pub fn rpc(method: &'static str) -> impl FnOnce(Status) -> Self {
        move |source| Self::Rpc { method, source }
    }

    /// Builds an [`Error::Transfer`] for `operation` from a failed stream.
    pub fn transfer(operation: &'static str) -> impl FnOnce(Status) -> Self {
        move |source| Self::Transfer { operation, source }
    }

    /// Returns `true` when the operation is unsupported rather than failed.
    pub const fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidSubmission { reason } => Status::invalid_argument(reason),
            Error::Transfer { source, .. } | Error::Rpc { source, .. } => source,
            Error::ConfigurationUnavailable { reason } => Status::unavailable(reason),
            Error::NotImplemented { operation } => {
                Status::unimplemented(format!("{operation} is not implemented"))
            }
            Error::UnexpectedResponse { method, reason } => {
                Status::internal(format!("{method}: {reason}"))
            }
            Error::Cancelled => Status::cancelled("Request was cancelled"),
            Error::BlobAborted { blob_id } => Status::aborted(format!("blob {blob_id} aborted")),
            Error::PoolClosed => Status::unavailable("Channel pool is closed"),
            Error::InvalidConfig { reason } => Status::invalid_argument(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn invalid_submission_maps_to_invalid_argument() {
        let status: Status = Error::InvalidSubmission {
            reason: "no expected outputs".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "no expected outputs");
    }

    #[test]
    fn transfer_keeps_the_remote_status() {
        let err = Error::transfer("upload")(Status::data_loss("stream reset"));
        assert!(err.to_string().contains("upload"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::DataLoss);
    }

    #[test]
    fn not_implemented_is_distinguishable() {
        let err = Error::NotImplemented {
            operation: "wait_for_blob_names",
        };
        assert!(err.is_not_implemented());
        assert!(!Error::Cancelled.is_not_implemented());
        assert_eq!(Status::from(err).code(), Code::Unimplemented);
    }

    #[test]
    fn rejected_configuration_maps_to_invalid_argument() {
        let status = Status::from(Error::InvalidConfig {
            reason: "pool_size must be greater than 0".to_string(),
        });
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
