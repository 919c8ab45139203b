//! Object-store implementation of [`UnitStore`].
//!
//! [`BlobStore`] lays units out S3-style under an optional key prefix:
//!
//! ```text
//! <prefix>/<id>/terraform.tfstate
//! <prefix>/<id>/terraform.tfstate.lock
//! <prefix>/<id>/versions/v-<stamp>-<sha256>.tfstate
//! <prefix>/<id>/blob.bin
//! ```
//!
//! There is no local guard. Each object write is atomic on its own, but
//! `create` and `lock` are an existence check followed by a put, so two
//! racing callers can both succeed. [`StoreCapabilities::atomic_locks`] is
//! therefore `false` for this backend.
//!
//! Standalone blobs end in their own object name, so no blob key can be
//! mistaken for a unit's state, lock or version object.
//!
//! Listing skips the per-unit lock lookup unless `list_lock_status` is set;
//! `get` is always authoritative.

pub mod client;
pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use taco_core::{LockInfo, UnitId, UnitMetadata, VersionRecord};

use crate::context::OpContext;
use crate::error::StorageError;
use crate::traits::{check_lock_token, StoreCapabilities, UnitStore};
use crate::versions::{format_stamp, next_record, parse_stamp, split_expired, DEFAULT_MAX_VERSIONS};

pub use client::{ObjectClient, ObjectHead};
pub use sqlite::SqliteObjectClient;

const STATE_OBJECT: &str = "terraform.tfstate";
const LOCK_OBJECT: &str = "terraform.tfstate.lock";
const VERSIONS_DIR: &str = "versions/";
const BLOB_OBJECT: &str = "blob.bin";

/// [`UnitStore`] over any [`ObjectClient`].
#[derive(Debug)]
pub struct BlobStore<C: ObjectClient> {
    client: C,
    /// Empty, or the configured prefix with exactly one trailing slash.
    prefix: String,
    max_versions: usize,
    list_lock_status: bool,
}

impl<C: ObjectClient> BlobStore<C> {
    pub fn new(client: C) -> Self {
        BlobStore {
            client,
            prefix: String::new(),
            max_versions: DEFAULT_MAX_VERSIONS,
            list_lock_status: false,
        }
    }

    /// Places every key under `prefix`. Surrounding slashes are ignored.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        self.prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        self
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions.max(1);
        self
    }

    /// Makes `list` fetch each unit's lock object so listed entries carry
    /// real lock state, at the cost of one extra read per unit.
    pub fn with_list_lock_status(mut self, enabled: bool) -> Self {
        self.list_lock_status = enabled;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    // -----------------------------------------------------------------------
    // Key layout
    // -----------------------------------------------------------------------

    fn unit_dir(&self, id: &UnitId) -> String {
        format!("{}{}/", self.prefix, id)
    }

    fn state_key(&self, id: &UnitId) -> String {
        format!("{}{STATE_OBJECT}", self.unit_dir(id))
    }

    fn lock_key(&self, id: &UnitId) -> String {
        format!("{}{LOCK_OBJECT}", self.unit_dir(id))
    }

    fn versions_prefix(&self, id: &UnitId) -> String {
        format!("{}{VERSIONS_DIR}", self.unit_dir(id))
    }

    fn version_key(&self, id: &UnitId, record: &VersionRecord) -> String {
        format!(
            "{}v-{}-{}.tfstate",
            self.versions_prefix(id),
            format_stamp(record.timestamp),
            record.hash
        )
    }

    fn blob_key(&self, id: &UnitId) -> String {
        format!("{}{BLOB_OBJECT}", self.unit_dir(id))
    }

    /// Recovers the unit ID from a state object key, if `key` is one.
    fn unit_from_state_key(&self, key: &str) -> Option<UnitId> {
        let rest = key.strip_prefix(&self.prefix)?;
        let raw = rest.strip_suffix(STATE_OBJECT)?.strip_suffix('/')?;
        UnitId::parse(raw).ok()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn require_state(&self, id: &UnitId) -> Result<(DateTime<Utc>, u64), StorageError> {
        self.client
            .head(&self.state_key(id))?
            .map(|head| (head.last_modified, head.size))
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn read_lock(&self, id: &UnitId) -> Result<Option<LockInfo>, StorageError> {
        match self.client.get(&self.lock_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Version records with their object keys, newest first.
    fn read_versions(&self, id: &UnitId) -> Result<Vec<(VersionRecord, String)>, StorageError> {
        let prefix = self.versions_prefix(id);
        let mut versions: Vec<(VersionRecord, String)> = self
            .client
            .list(&prefix)?
            .into_iter()
            .filter_map(|head| {
                let name = head.key.strip_prefix(&prefix)?;
                let (timestamp, hash) = parse_version_object_name(name)?;
                Some((
                    VersionRecord {
                        timestamp,
                        hash,
                        size: head.size,
                    },
                    head.key,
                ))
            })
            .collect();
        versions.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));
        Ok(versions)
    }

    /// Deletes records beyond the retention limit. Failures are logged only.
    fn prune_versions(&self, id: &UnitId) {
        let versions = match self.read_versions(id) {
            Ok(versions) => versions,
            Err(err) => {
                warn!(unit = %id, error = %err, "listing versions for pruning failed");
                return;
            }
        };
        let mut records: Vec<VersionRecord> = versions.into_iter().map(|(r, _)| r).collect();
        let expired = split_expired(&mut records, self.max_versions);
        for record in &expired {
            if let Err(err) = self.client.delete(&self.version_key(id, record)) {
                warn!(unit = %id, error = %err, "pruning old version failed");
            }
        }
        if !expired.is_empty() {
            debug!(unit = %id, pruned = expired.len(), "pruned old versions");
        }
    }
}

impl<C: ObjectClient> UnitStore for BlobStore<C> {
    fn create(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        ctx.check()?;
        let key = self.state_key(id);
        if self.client.head(&key)?.is_some() {
            return Err(StorageError::AlreadyExists(id.clone()));
        }
        ctx.check()?;
        // A lock left behind by an interrupted delete must not carry over.
        self.client.delete(&self.lock_key(id))?;
        self.client.put(&key, &[])?;
        let (updated, size) = self.require_state(id)?;
        Ok(UnitMetadata {
            size,
            updated,
            ..UnitMetadata::empty(id.clone())
        })
    }

    fn get(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        ctx.check()?;
        let (updated, size) = self.require_state(id)?;
        let lock = self.read_lock(id)?;
        Ok(UnitMetadata {
            id: id.clone(),
            size,
            updated,
            locked: false,
            lock: None,
        }
        .with_lock(lock))
    }

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<UnitMetadata>, StorageError> {
        ctx.check()?;
        let mut result = Vec::new();
        for head in self.client.list(&format!("{}{prefix}", self.prefix))? {
            let Some(id) = self.unit_from_state_key(&head.key) else {
                continue;
            };
            if !id.has_prefix(prefix) {
                continue;
            }
            let lock = if self.list_lock_status {
                self.read_lock(&id)?
            } else {
                None
            };
            result.push(
                UnitMetadata {
                    id,
                    size: head.size,
                    updated: head.last_modified,
                    locked: false,
                    lock: None,
                }
                .with_lock(lock),
            );
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn delete(&self, ctx: &OpContext, id: &UnitId) -> Result<(), StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        let versions = self.read_versions(id)?;
        ctx.check()?;
        self.client.delete(&self.lock_key(id))?;
        for (_, key) in versions {
            self.client.delete(&key)?;
        }
        // State last: while it exists the unit still exists.
        self.client.delete(&self.state_key(id))
    }

    fn download(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        self.client
            .get(&self.state_key(id))?
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
        self.require_state(id)?;
        let lock = self.read_lock(id)?;
        check_lock_token(id, lock.as_ref(), lock_token)?;

        let newest = self.read_versions(id)?.first().map(|(r, _)| r.timestamp);
        let record = next_record(data, newest);

        ctx.check()?;
        self.client.put(&self.state_key(id), data)?;
        self.client.put(&self.version_key(id, &record), data)?;
        self.prune_versions(id);
        Ok(())
    }

    fn upload_blob(&self, ctx: &OpContext, id: &UnitId, data: &[u8]) -> Result<(), StorageError> {
        ctx.check()?;
        let state_key = self.state_key(id);
        if self.client.head(&state_key)?.is_some() {
            return self.client.put(&state_key, data);
        }
        self.client.put(&self.blob_key(id), data)
    }

    fn download_blob(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        if let Some(bytes) = self.client.get(&self.state_key(id))? {
            return Ok(bytes);
        }
        self.client
            .get(&self.blob_key(id))?
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn lock(&self, ctx: &OpContext, id: &UnitId, info: &LockInfo) -> Result<(), StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        if let Some(holder) = self.read_lock(id)? {
            return Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder),
            });
        }
        let bytes = serde_json::to_vec(info)?;
        ctx.check()?;
        self.client.put(&self.lock_key(id), &bytes)?;
        debug!(unit = %id, lock_id = %info.id, who = %info.who, "lock acquired");
        Ok(())
    }

    fn unlock(&self, ctx: &OpContext, id: &UnitId, lock_id: &str) -> Result<(), StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        match self.read_lock(id)? {
            None => Err(StorageError::NotLocked(id.clone())),
            Some(holder) if holder.id != lock_id => Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder),
            }),
            Some(_) => {
                self.client.delete(&self.lock_key(id))?;
                debug!(unit = %id, lock_id, "lock released");
                Ok(())
            }
        }
    }

    fn get_lock(&self, ctx: &OpContext, id: &UnitId) -> Result<Option<LockInfo>, StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        self.read_lock(id)
    }

    fn list_versions(
        &self,
        ctx: &OpContext,
        id: &UnitId,
    ) -> Result<Vec<VersionRecord>, StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        Ok(self.read_versions(id)?.into_iter().map(|(r, _)| r).collect())
    }

    fn download_version(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, StorageError> {
        ctx.check()?;
        self.require_state(id)?;
        let not_found = || StorageError::VersionNotFound {
            unit: id.clone(),
            timestamp,
        };
        let key = self
            .read_versions(id)?
            .into_iter()
            .find(|(r, _)| r.timestamp == timestamp)
            .map(|(_, key)| key)
            .ok_or_else(not_found)?;
        self.client.get(&key)?.ok_or_else(not_found)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            atomic_locks: false,
            list_reports_locks: self.list_lock_status,
        }
    }
}

/// Parses `v-<stamp>-<sha256>.tfstate`. Anything nested deeper is rejected.
fn parse_version_object_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    if name.contains('/') {
        return None;
    }
    let stem = name.strip_prefix("v-")?.strip_suffix(".tfstate")?;
    let (stamp, hash) = stem.split_once('-')?;
    Some((parse_stamp(stamp)?, hash.to_string()))
}
