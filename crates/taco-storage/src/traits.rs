//! The [`UnitStore`] trait defining the storage contract for units.
//!
//! All backends ([`MemoryStore`](crate::MemoryStore), [`FileStore`](crate::FileStore),
//! [`BlobStore`](crate::BlobStore)) implement this trait with identical
//! observable semantics, so they are fully swappable without changing the
//! dependency graph engine or any caller.
//!
//! The trait is synchronous: every backend is blocking I/O underneath. Async
//! callers run store calls on their executor's blocking pool.

use chrono::{DateTime, Utc};

use taco_core::{LockInfo, UnitId, UnitMetadata, VersionRecord};

use crate::context::OpContext;
use crate::error::StorageError;

/// Backend guarantees that differ between implementations.
///
/// Exposed so the gaps are explicit rather than silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// `lock` is a single atomic check-and-set. When false the lock is
    /// advisory: two racing callers can both believe they hold it.
    pub atomic_locks: bool,
    /// `list` reports current lock state. When false, listed entries always
    /// carry `locked == false` and only `get` is authoritative.
    pub list_reports_locks: bool,
}

/// The storage contract for units: CRUD, locking and version history over
/// opaque byte content keyed by [`UnitId`].
pub trait UnitStore: Send + Sync {
    // -------------------------------------------------------------------
    // Unit lifecycle
    // -------------------------------------------------------------------

    /// Creates an empty, unlocked unit.
    ///
    /// Fails with `AlreadyExists` if the unit is present.
    fn create(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError>;

    /// Returns the unit's metadata with its lock state as of now.
    fn get(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError>;

    /// Lists every unit whose ID starts with `prefix` (empty matches all),
    /// sorted by ID.
    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<UnitMetadata>, StorageError>;

    /// Removes content, metadata, lock and version history.
    fn delete(&self, ctx: &OpContext, id: &UnitId) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------

    fn download(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError>;

    /// Replaces the unit's content and appends a version record.
    ///
    /// If the unit is locked, `lock_token` must equal the holder's ID;
    /// `None` or an empty token is rejected with `LockConflict`. Upload never
    /// acquires or releases a lock.
    fn upload(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        data: &[u8],
        lock_token: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Lock-bypassing write for internal bookkeeping content.
    ///
    /// Replaces an existing unit's content without a lock check or version
    /// record; for IDs with no unit, stores a standalone blob invisible to
    /// unit listing.
    fn upload_blob(&self, ctx: &OpContext, id: &UnitId, data: &[u8]) -> Result<(), StorageError>;

    /// Reads a unit's content, or a standalone blob when no unit exists.
    fn download_blob(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError>;

    // -------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------

    /// Records `info` as the unit's lock holder.
    ///
    /// Fails with `LockConflict` carrying the current holder if already locked.
    fn lock(&self, ctx: &OpContext, id: &UnitId, info: &LockInfo) -> Result<(), StorageError>;

    /// Releases the lock if `lock_id` matches the holder.
    fn unlock(&self, ctx: &OpContext, id: &UnitId, lock_id: &str) -> Result<(), StorageError>;

    /// Returns the current holder, or `None` when unlocked.
    fn get_lock(&self, ctx: &OpContext, id: &UnitId) -> Result<Option<LockInfo>, StorageError>;

    // -------------------------------------------------------------------
    // Versions
    // -------------------------------------------------------------------

    /// Version records, newest first.
    fn list_versions(
        &self,
        ctx: &OpContext,
        id: &UnitId,
    ) -> Result<Vec<VersionRecord>, StorageError>;

    /// Content recorded at exactly `timestamp`.
    fn download_version(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, StorageError>;

    /// Re-uploads historical content through [`UnitStore::upload`].
    ///
    /// Lock-checked like any upload, and itself creates a new version:
    /// history only moves forward.
    fn restore(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
        lock_token: Option<&str>,
    ) -> Result<(), StorageError> {
        let content = self.download_version(ctx, id, timestamp)?;
        self.upload(ctx, id, &content, lock_token)
    }

    fn capabilities(&self) -> StoreCapabilities;
}

/// Shared lock-token check used by every backend's upload path.
pub(crate) fn check_lock_token(
    id: &UnitId,
    holder: Option<&LockInfo>,
    lock_token: Option<&str>,
) -> Result<(), StorageError> {
    let Some(holder) = holder else {
        return Ok(());
    };
    match lock_token {
        Some(token) if !token.is_empty() && token == holder.id => Ok(()),
        _ => Err(StorageError::LockConflict {
            unit: id.clone(),
            holder: Some(holder.clone()),
        }),
    }
}
