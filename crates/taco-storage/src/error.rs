//! Storage error types for taco-storage.
//!
//! [`StorageError`] is the single error type of the [`UnitStore`](crate::UnitStore)
//! contract. Every failure is a typed variant so callers can map it to a
//! transport-level response; lock conflicts carry the current holder so the
//! caller can render an actionable message.

use chrono::{DateTime, Utc};
use thiserror::Error;

use taco_core::{CoreError, LockInfo, UnitId};

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No unit with the given ID exists.
    #[error("unit not found: {0}")]
    NotFound(UnitId),

    /// A unit with the given ID already exists.
    #[error("unit already exists: {0}")]
    AlreadyExists(UnitId),

    /// The unit is locked by someone else, or the presented token does not
    /// match the holder's.
    #[error("unit {unit} is locked{}", describe_holder(.holder))]
    LockConflict {
        unit: UnitId,
        holder: Option<LockInfo>,
    },

    /// Unlock was requested on a unit that holds no lock.
    #[error("unit is not locked: {0}")]
    NotLocked(UnitId),

    /// No version of the unit was recorded at the given timestamp.
    #[error("version not found: unit={unit}, timestamp={timestamp}")]
    VersionNotFound {
        unit: UnitId,
        timestamp: DateTime<Utc>,
    },

    /// The request was malformed (bad unit ID).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    /// The operation's context was cancelled before any write happened.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed before any write happened.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Filesystem I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite object service failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Any other backend failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// True for `NotFound` and `VersionNotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_) | StorageError::VersionNotFound { .. }
        )
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, StorageError::LockConflict { .. })
    }

    /// The current lock holder, when this is a lock conflict that knows it.
    pub fn lock_holder(&self) -> Option<&LockInfo> {
        match self {
            StorageError::LockConflict { holder, .. } => holder.as_ref(),
            _ => None,
        }
    }
}

fn describe_holder(holder: &Option<LockInfo>) -> String {
    match holder {
        Some(lock) => format!(" by {} (lock id {})", lock.who, lock.id),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflict_message_names_holder() {
        let err = StorageError::LockConflict {
            unit: UnitId::parse("prod/vpc").unwrap(),
            holder: Some(LockInfo::new("tok-1", "alice")),
        };
        assert_eq!(err.to_string(), "unit prod/vpc is locked by alice (lock id tok-1)");
        assert!(err.is_lock_conflict());
        assert_eq!(err.lock_holder().map(|l| l.id.as_str()), Some("tok-1"));
    }

    #[test]
    fn not_found_family() {
        let id = UnitId::parse("x").unwrap();
        assert!(StorageError::NotFound(id.clone()).is_not_found());
        assert!(StorageError::VersionNotFound {
            unit: id,
            timestamp: Utc::now()
        }
        .is_not_found());
        assert!(!StorageError::Cancelled.is_not_found());
    }
}
