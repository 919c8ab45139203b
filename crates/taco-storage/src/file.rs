//! Filesystem implementation of [`UnitStore`].
//!
//! [`FileStore`] persists units under a root directory:
//!
//! ```text
//! <root>/units/<escaped>.tfstate             current content
//! <root>/units/<escaped>.meta.json           id, size, updated (existence marker)
//! <root>/locks/<escaped>.lock.json           lock holder, present only while locked
//! <root>/versions/<escaped>/<stamp>-<sha256>.tfstate
//! <root>/blobs/<escaped>                     standalone bookkeeping blobs
//! ```
//!
//! `<escaped>` is the unit ID with `%` written as `%25` and `/` as `%2F`, so
//! nested IDs map to flat, collision-free file names. Every write goes through
//! a temp file and an atomic rename. A single readers-writer guard wraps each
//! method body; private helpers assume the caller already holds it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use taco_core::{LockInfo, UnitId, UnitMetadata, VersionRecord};

use crate::context::OpContext;
use crate::error::StorageError;
use crate::traits::{check_lock_token, StoreCapabilities, UnitStore};
use crate::versions::{format_stamp, next_record, parse_stamp, sort_newest_first, split_expired};
use crate::versions::DEFAULT_MAX_VERSIONS;

const CONTENT_SUFFIX: &str = ".tfstate";
const META_SUFFIX: &str = ".meta.json";
const LOCK_SUFFIX: &str = ".lock.json";

/// On-disk metadata record. Lock state is never stored here; it is read from
/// the lock file at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMeta {
    id: UnitId,
    size: u64,
    updated: DateTime<Utc>,
}

/// Filesystem-backed implementation of [`UnitStore`].
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    guard: RwLock<()>,
    max_versions: usize,
}

impl FileStore {
    /// Opens (or initializes) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in ["units", "locks", "versions", "blobs"] {
            fs::create_dir_all(root.join(dir))?;
        }
        info!(root = %root.display(), "file store opened");
        Ok(FileStore {
            root,
            guard: RwLock::new(()),
            max_versions: DEFAULT_MAX_VERSIONS,
        })
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Internal helpers (caller holds the guard)
    // -----------------------------------------------------------------------

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, ()>, StorageError> {
        self.guard
            .read()
            .map_err(|_| StorageError::Internal("file store guard poisoned".to_string()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, ()>, StorageError> {
        self.guard
            .write()
            .map_err(|_| StorageError::Internal("file store guard poisoned".to_string()))
    }

    fn content_path(&self, id: &UnitId) -> PathBuf {
        self.root
            .join("units")
            .join(format!("{}{CONTENT_SUFFIX}", escape_id(id)))
    }

    fn meta_path(&self, id: &UnitId) -> PathBuf {
        self.root
            .join("units")
            .join(format!("{}{META_SUFFIX}", escape_id(id)))
    }

    fn lock_path(&self, id: &UnitId) -> PathBuf {
        self.root
            .join("locks")
            .join(format!("{}{LOCK_SUFFIX}", escape_id(id)))
    }

    fn versions_dir(&self, id: &UnitId) -> PathBuf {
        self.root.join("versions").join(escape_id(id))
    }

    fn blob_path(&self, id: &UnitId) -> PathBuf {
        self.root.join("blobs").join(escape_id(id))
    }

    fn read_meta(&self, id: &UnitId) -> Result<Option<StoredMeta>, StorageError> {
        match read_optional(&self.meta_path(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_meta(&self, id: &UnitId) -> Result<StoredMeta, StorageError> {
        self.read_meta(id)?
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn read_lock(&self, id: &UnitId) -> Result<Option<LockInfo>, StorageError> {
        match read_optional(&self.lock_path(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn metadata(&self, meta: StoredMeta) -> Result<UnitMetadata, StorageError> {
        let lock = self.read_lock(&meta.id)?;
        Ok(UnitMetadata {
            id: meta.id,
            size: meta.size,
            updated: meta.updated,
            locked: false,
            lock: None,
        }
        .with_lock(lock))
    }

    fn write_meta(&self, meta: &StoredMeta) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(meta)?;
        write_atomic(&self.meta_path(&meta.id), &bytes)
    }

    /// Version files of a unit, newest first.
    fn read_versions(&self, id: &UnitId) -> Result<Vec<(VersionRecord, PathBuf)>, StorageError> {
        let dir = self.versions_dir(id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((timestamp, hash)) = parse_version_file_name(&name) else {
                continue;
            };
            let size = entry.metadata()?.len();
            versions.push((
                VersionRecord {
                    timestamp,
                    hash,
                    size,
                },
                entry.path(),
            ));
        }
        versions.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));
        Ok(versions)
    }

    fn prune_versions(&self, id: &UnitId) -> Result<(), StorageError> {
        let versions = self.read_versions(id)?;
        let mut records: Vec<VersionRecord> = versions.iter().map(|(r, _)| r.clone()).collect();
        sort_newest_first(&mut records);
        let expired = split_expired(&mut records, self.max_versions);
        for record in &expired {
            let path = self
                .versions_dir(id)
                .join(version_file_name(record.timestamp, &record.hash));
            remove_if_exists(&path)?;
        }
        if !expired.is_empty() {
            debug!(unit = %id, pruned = expired.len(), "pruned old versions");
        }
        Ok(())
    }
}

impl UnitStore for FileStore {
    fn create(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        if self.read_meta(id)?.is_some() {
            return Err(StorageError::AlreadyExists(id.clone()));
        }

        let meta = StoredMeta {
            id: id.clone(),
            size: 0,
            updated: Utc::now(),
        };
        // A lock left behind by an interrupted delete must not carry over.
        remove_if_exists(&self.lock_path(id))?;
        write_atomic(&self.content_path(id), &[])?;
        // Metadata last: its presence marks the unit as existing.
        self.write_meta(&meta)?;
        self.metadata(meta)
    }

    fn get(&self, ctx: &OpContext, id: &UnitId) -> Result<UnitMetadata, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        let meta = self.require_meta(id)?;
        self.metadata(meta)
    }

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<UnitMetadata>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;

        let mut result = Vec::new();
        for entry in fs::read_dir(self.root.join("units"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(META_SUFFIX) {
                continue;
            }
            let Some(bytes) = read_optional(&entry.path())? else {
                continue;
            };
            let meta: StoredMeta = serde_json::from_slice(&bytes)?;
            if meta.id.has_prefix(prefix) {
                result.push(self.metadata(meta)?);
            }
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn delete(&self, ctx: &OpContext, id: &UnitId) -> Result<(), StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        self.require_meta(id)?;

        remove_if_exists(&self.lock_path(id))?;
        match fs::remove_dir_all(self.versions_dir(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        // Metadata last: until it is gone the unit still exists.
        remove_if_exists(&self.meta_path(id))?;
        remove_if_exists(&self.content_path(id))
    }

    fn download(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        read_optional(&self.content_path(id))?.ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn upload(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        data: &[u8],
        lock_token: Option<&str>,
    ) -> Result<(), StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        let mut meta = self.require_meta(id)?;
        let lock = self.read_lock(id)?;
        check_lock_token(id, lock.as_ref(), lock_token)?;

        let newest = self.read_versions(id)?.first().map(|(r, _)| r.timestamp);
        let record = next_record(data, newest);

        ctx.check()?;
        write_atomic(&self.content_path(id), data)?;
        fs::create_dir_all(self.versions_dir(id))?;
        write_atomic(
            &self
                .versions_dir(id)
                .join(version_file_name(record.timestamp, &record.hash)),
            data,
        )?;
        meta.size = data.len() as u64;
        meta.updated = Utc::now();
        self.write_meta(&meta)?;

        self.prune_versions(id)
    }

    fn upload_blob(&self, ctx: &OpContext, id: &UnitId, data: &[u8]) -> Result<(), StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        match self.read_meta(id)? {
            Some(mut meta) => {
                write_atomic(&self.content_path(id), data)?;
                meta.size = data.len() as u64;
                meta.updated = Utc::now();
                self.write_meta(&meta)
            }
            None => write_atomic(&self.blob_path(id), data),
        }
    }

    fn download_blob(&self, ctx: &OpContext, id: &UnitId) -> Result<Vec<u8>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        let path = if self.read_meta(id)?.is_some() {
            self.content_path(id)
        } else {
            self.blob_path(id)
        };
        read_optional(&path)?.ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn lock(&self, ctx: &OpContext, id: &UnitId, info: &LockInfo) -> Result<(), StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        if let Some(holder) = self.read_lock(id)? {
            return Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder),
            });
        }

        // `persist_noclobber` also refuses to replace a lock file written by
        // another process sharing this root.
        let bytes = serde_json::to_vec(info)?;
        let path = self.lock_path(id);
        let mut tmp = NamedTempFile::new_in(parent_dir(&path))?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        if let Err(err) = tmp.persist_noclobber(&path) {
            if err.error.kind() == io::ErrorKind::AlreadyExists {
                return Err(StorageError::LockConflict {
                    unit: id.clone(),
                    holder: self.read_lock(id)?,
                });
            }
            return Err(err.error.into());
        }
        debug!(unit = %id, lock_id = %info.id, who = %info.who, "lock acquired");
        Ok(())
    }

    fn unlock(&self, ctx: &OpContext, id: &UnitId, lock_id: &str) -> Result<(), StorageError> {
        let _guard = self.write_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        match self.read_lock(id)? {
            None => Err(StorageError::NotLocked(id.clone())),
            Some(holder) if holder.id != lock_id => Err(StorageError::LockConflict {
                unit: id.clone(),
                holder: Some(holder),
            }),
            Some(_) => {
                remove_if_exists(&self.lock_path(id))?;
                debug!(unit = %id, lock_id, "lock released");
                Ok(())
            }
        }
    }

    fn get_lock(&self, ctx: &OpContext, id: &UnitId) -> Result<Option<LockInfo>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        self.read_lock(id)
    }

    fn list_versions(
        &self,
        ctx: &OpContext,
        id: &UnitId,
    ) -> Result<Vec<VersionRecord>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        Ok(self.read_versions(id)?.into_iter().map(|(r, _)| r).collect())
    }

    fn download_version(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<u8>, StorageError> {
        let _guard = self.read_guard()?;
        ctx.check()?;
        self.require_meta(id)?;
        let path = self
            .read_versions(id)?
            .into_iter()
            .find(|(r, _)| r.timestamp == timestamp)
            .map(|(_, path)| path)
            .ok_or_else(|| StorageError::VersionNotFound {
                unit: id.clone(),
                timestamp,
            })?;
        Ok(fs::read(path)?)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            atomic_locks: true,
            list_reports_locks: true,
        }
    }
}

/// Escapes a unit ID into a single path component.
fn escape_id(id: &UnitId) -> String {
    id.as_str().replace('%', "%25").replace('/', "%2F")
}

fn version_file_name(timestamp: DateTime<Utc>, hash: &str) -> String {
    format!("{}-{hash}{CONTENT_SUFFIX}", format_stamp(timestamp))
}

fn parse_version_file_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    let stem = name.strip_suffix(CONTENT_SUFFIX)?;
    let (stamp, hash) = stem.split_once('-')?;
    Some((parse_stamp(stamp)?, hash.to_string()))
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Writes `data` to a temp file beside `path` and renames it into place.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}
