//! Shared types and error definitions used across the gridlink crates.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type returned by every client operation.
//! - [`types`] - Domain types (blobs, tasks, sessions) and their wire
//!   conversions.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
