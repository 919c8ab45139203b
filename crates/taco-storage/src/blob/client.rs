//! Minimal object-store client interface used by [`BlobStore`](super::BlobStore).
//!
//! Mirrors the subset of S3-style semantics the store needs: whole-object
//! get/put/delete, a metadata-only head, and prefix listing. Nothing here is
//! conditional, so check-then-put sequences built on it are not atomic.

use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Metadata returned by [`ObjectClient::head`] and [`ObjectClient::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

pub trait ObjectClient: Send + Sync {
    /// Object metadata, or `None` if the key is absent.
    fn head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Creates or replaces the object at `key`.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Removes `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every object whose key starts with `prefix`, sorted by key.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectHead>, StorageError>;
}
