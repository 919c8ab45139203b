//! In-memory implementation of [`UnitStore`].
//!
//! [`MemoryStore`] is a first-class backend for tests, ephemeral servers, and
//! anywhere persistence isn't needed. Units live in a sharded `DashMap`, so
//! operations on units in different shards never contend, while every
//! operation on a single unit (including `lock`'s check-and-set) runs under
//! that unit's shard write guard.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use taco_core::{LockInfo, UnitId, UnitMetadata, VersionRecord};

use crate::context::OpContext;
use crate::error::StorageError;
use crate::traits::{check_lock_token, StoreCapabilities, UnitStore};
use crate::versions::{next_record, DEFAULT_MAX_VERSIONS};

/// A retained version: its record plus the content it describes.
#[derive(Debug, Clone)]
struct StoredVersion {
    record: VersionRecord,
    content: Vec<u8>,
}

/// Data stored for a single unit.
#[derive(Debug, Clone)]
struct StoredUnit {
    size: u64,
    updated: DateTime<Utc>,
    content: Vec<u8>,
    lock: Option<LockInfo>,
    /// Oldest first; the last entry is the most recent `upload`, which
    /// `upload_blob` may since have overwritten.
    versions: Vec<StoredVersion>,
}

impl StoredUnit {
    fn new() -> Self {
        StoredUnit {
            size: 0,
            updated: Utc::now(),
            content: Vec::new(),
            lock: None,
            versions: Vec::new(),
        }
    }

    fn metadata(&self, id: &UnitId) -> UnitMetadata {
        UnitMetadata {
            id: id.clone(),
            size: self.size,
            updated: self.updated,
            locked: false,
            lock: None,
        }
        .with_lock(self.lock.clone())
    }

    fn replace_content(&mut self, data: &[u8]) {
        self.content = data.to_vec();
        self.size = data.len() as u64;
        self.updated = Utc::now();
    }
}

/// In-memory implementation of [`UnitStore`].
#[derive(Debug)]
pub struct MemoryStore {
    units: DashMap<UnitId, StoredUnit>,
    blobs: DashMap<UnitId, Vec<u8>>,
    max_versions: usize,
}

impl MemoryStore {
    /// Creates an empty store keeping [`DEFAULT_MAX_VERSIONS`] per unit.
    pub fn new() -> Self {
        Self::with_max_versions(DEFAULT_MAX_VERSIONS)
    }

    pub fn with_max_versions(max_versions: usize) -> Self {
        MemoryStore {
            units: DashMap::new(),
            blobs: DashMap::new(),
            max_versions: max_versions.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitStore for MemoryStore {
    fn create(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        ctx.check()?;
        match self.units.entry(id.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(id.clone())),
            Entry::Vacant(slot) => {
                let unit = StoredUnit::new();
                let metadata = unit.metadata(id);
                slot.insert(unit);
                Ok(metadata)
            }
        }
    }

    fn get(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        ctx.check()?;
        self.units
            .get(id)
            .map(|unit| unit.metadata(id))
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<UnitMetadata>, StorageError> {
        ctx.check()?;
        let mut result: Vec<UnitMetadata> = self
            .units
            .iter()
            .filter(|entry| entry.key().has_prefix(prefix))
            .map(|entry| entry.value().metadata(entry.key()))
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn delete(&self, ctx: &OpContext, id: &UnitId) -> Result<(), StorageError> {
        ctx.check()?;
        self.units
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn download(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        self.units
            .get(id)
            .map(|unit| unit.content.clone())
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn upload(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        data: &[u8],
        lock_token: Option<&str>,
    ) -> Result<(), StorageError> {
        ctx.check()?;
        let mut unit = self
            .units
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        check_lock_token(id, unit.lock.as_ref(), lock_token)?;

        let newest = unit.versions.last().map(|v| v.record.timestamp);
        let record = next_record(data, newest);
        unit.replace_content(data);
        unit.versions.push(StoredVersion {
            record,
            content: data.to_vec(),
        });

        let excess = unit.versions.len().saturating_sub(self.max_versions);
        if excess > 0 {
            unit.versions.drain(..excess);
            debug!(unit = %id, pruned = excess, "pruned old versions");
        }
        Ok(())
    }

    fn upload_blob(&self, ctx: &OpContext, id: &UnitId, data: &[u8]) -> Result<(), StorageError> {
        ctx.check()?;
        if let Some(mut unit) = self.units.get_mut(id) {
            unit.replace_content(data);
            return Ok(());
        }
        self.blobs.insert(id.clone(), data.to_vec());
        Ok(())
    }

    fn download_blob(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        if let Some(unit) = self.units.get(id) {
            return Ok(unit.content.clone());
        }
        self.blobs
            .get(id)
            .map(|blob| blob.clone())
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn lock(&self, ctx: &OpContext, id: &UnitId, info: &LockInfo) -> Result<(), StorageError> {
        ctx.check()?;
        let mut unit = self
            .units
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        if let Some(holder) = &unit.lock {
            return Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder.clone()),
            });
        }
        unit.lock = Some(info.clone());
        debug!(unit = %id, lock_id = %info.id, who = %info.who, "lock acquired");
        Ok(())
    }

    fn unlock(&self, ctx: &OpContext, id: &UnitId, lock_id: &str) -> Result<(), StorageError> {
        ctx.check()?;
        let mut unit = self
            .units
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        match unit.lock.clone() {
            None => Err(StorageError::NotLocked(id.clone())),
            Some(holder) if holder.id != lock_id => Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder),
            }),
            Some(_) => {
                unit.lock = None;
                debug!(unit = %id, lock_id, "lock released");
                Ok(())
            }
        }
    }

    fn get_lock(&self, ctx: &OpContext, id: &UnitId) -> Result<Option<LockInfo>, StorageError> {
        ctx.check()?;
        self.units
            .get(id)
            .map(|unit| unit.lock.clone())
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn list_versions(
        &self,
        ctx: &OpContext,
        id: &UnitId,
    ) -> Result<Vec<VersionRecord>, StorageError> {
        ctx.check()?;
        let unit = self
            .units
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Ok(unit.versions.iter().rev().map(|v| v.record.clone()).collect())
    }

    fn download_version(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        let unit = self
            .units
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        unit.versions
            .iter()
            .find(|v| v.record.timestamp == timestamp)
            .map(|v| v.content.clone())
            .ok_or_else(|| StorageError::VersionNotFound {
                unit: id.clone(),
                timestamp,
            })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            atomic_locks: true,
            list_reports_locks: true,
        }
    }
}
