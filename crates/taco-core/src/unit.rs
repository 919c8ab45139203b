//! Unit metadata, lock records and version records.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UnitId;

/// Information about the current lock holder of a unit.
///
/// `id` is the opaque lock token: it must be presented to upload to, or
/// unlock, a locked unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    pub who: String,
    pub version: String,
    pub created: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock record stamped with the current time and this crate's version.
    pub fn new(id: impl Into<String>, who: impl Into<String>) -> Self {
        LockInfo {
            id: id.into(),
            who: who.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
        }
    }
}

/// Metadata of a stored unit.
///
/// `locked` mirrors `lock.is_some()`; build it through [`UnitMetadata::with_lock`]
/// so the two never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub id: UnitId,
    pub size: u64,
    pub updated: DateTime<Utc>,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockInfo>,
}

impl UnitMetadata {
    /// Metadata for a freshly created, empty, unlocked unit.
    pub fn empty(id: UnitId) -> Self {
        UnitMetadata {
            id,
            size: 0,
            updated: Utc::now(),
            locked: false,
            lock: None,
        }
    }

    /// Replaces the lock state, keeping `locked` consistent with it.
    pub fn with_lock(mut self, lock: Option<LockInfo>) -> Self {
        self.locked = lock.is_some();
        self.lock = lock;
        self
    }
}

/// One entry of a unit's content history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the content written.
    pub hash: String,
    pub size: u64,
}

/// Current time truncated to microseconds.
///
/// Version timestamps are truncated everywhere so a timestamp read back from
/// any backend (including ones that encode it in an object key) compares equal
/// to the one originally recorded.
pub fn version_timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
