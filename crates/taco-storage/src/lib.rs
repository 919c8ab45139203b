//! Unit storage for the taco state backend.
//!
//! Provides the [`UnitStore`] trait defining the storage contract that all
//! backends implement, plus [`MemoryStore`], [`FileStore`] and [`BlobStore`]
//! as interchangeable backends.
//!
//! # Architecture
//!
//! A unit is opaque byte content addressed by a [`UnitId`](taco_core::UnitId),
//! with at most one lock holder and a bounded history of versions. Every
//! operation takes an [`OpContext`] carrying cancellation and a deadline.
//! `upload_blob`/`download_blob` form a separate lock-bypassing path used for
//! bookkeeping writes made by callers that already hold the relevant lock.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`context`]: OpContext cancellation/deadline signal
//! - [`traits`]: UnitStore trait and StoreCapabilities
//! - [`versions`]: version record and retention helpers
//! - [`memory`]: MemoryStore implementation
//! - [`file`]: FileStore implementation
//! - [`blob`]: BlobStore over an ObjectClient, plus SqliteObjectClient
//! - [`config`]: StoreConfig backend selection from the environment

pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;
pub mod versions;

// Re-export key types for ergonomic use.
pub use blob::{BlobStore, ObjectClient, ObjectHead, SqliteObjectClient};
pub use config::{BackendConfig, StoreConfig};
pub use context::OpContext;
pub use error::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{StoreCapabilities, UnitStore};
pub use versions::DEFAULT_MAX_VERSIONS;
