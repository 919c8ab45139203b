//! Version-history helpers shared by all backends.
//!
//! Every successful upload appends a [`VersionRecord`] of the content just
//! written (timestamp, hex SHA-256, size). Backends keep at most
//! `max_versions` records per unit and prune the oldest beyond that.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

use taco_core::{version_timestamp_now, VersionRecord};

/// Records kept per unit unless configured otherwise.
pub const DEFAULT_MAX_VERSIONS: usize = 10;

/// Timestamp layout used in version file names and object keys.
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Builds the record for `data`, strictly newer than `newest` so that
/// timestamps stay unique per unit even for back-to-back writes.
pub fn next_record(data: &[u8], newest: Option<DateTime<Utc>>) -> VersionRecord {
    let mut timestamp = version_timestamp_now();
    if let Some(newest) = newest {
        if timestamp <= newest {
            timestamp = newest + Duration::microseconds(1);
        }
    }
    VersionRecord {
        timestamp,
        hash: content_hash(data),
        size: data.len() as u64,
    }
}

pub fn format_stamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(STAMP_FORMAT).to_string()
}

pub fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Sorts newest first.
pub fn sort_newest_first(records: &mut [VersionRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Splits off the records beyond `max_versions` from a newest-first list.
pub fn split_expired(records: &mut Vec<VersionRecord>, max_versions: usize) -> Vec<VersionRecord> {
    if records.len() <= max_versions {
        return Vec::new();
    }
    records.split_off(max_versions)
}
