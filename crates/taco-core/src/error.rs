//! Core error types for taco-core.
//!
//! Uses `thiserror` for structured, matchable error variants. The only
//! failure mode at this layer is a malformed unit identifier.

use thiserror::Error;

/// Core errors produced by the taco-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A unit ID was empty, all slashes, or attempted path traversal.
    #[error("invalid unit id '{id}': {reason}")]
    InvalidUnitId { id: String, reason: String },
}
