//! Domain types shared by the taco storage and dependency layers.
//!
//! - [`id`]: `UnitId`, the normalized path-like unit identifier
//! - [`unit`]: unit metadata, lock and version records
//! - [`error`]: `CoreError`

pub mod error;
pub mod id;
pub mod unit;

// Re-export commonly used types
pub use error::CoreError;
pub use id::UnitId;
pub use unit::{version_timestamp_now, LockInfo, UnitMetadata, VersionRecord};
