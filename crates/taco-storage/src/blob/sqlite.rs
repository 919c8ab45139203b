//! SQLite-backed [`ObjectClient`].
//!
//! Keeps objects in a single `objects` table. Used as the default object
//! namespace for [`BlobStore`](super::BlobStore) and in tests, where an
//! in-memory database stands in for a remote bucket.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::client::{ObjectClient, ObjectHead};
use super::schema;
use crate::error::StorageError;

pub struct SqliteObjectClient {
    conn: Mutex<Connection>,
}

impl SqliteObjectClient {
    /// Opens (or creates) an object database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Ok(SqliteObjectClient {
            conn: Mutex::new(schema::open_database(path)?),
        })
    }

    /// Opens an in-memory object database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(SqliteObjectClient {
            conn: Mutex::new(schema::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Internal("object database mutex poisoned".to_string()))
    }
}

impl std::fmt::Debug for SqliteObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteObjectClient").finish_non_exhaustive()
    }
}

fn head_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn to_head((key, size, modified): (String, i64, String)) -> Result<ObjectHead, StorageError> {
    let last_modified = DateTime::parse_from_rfc3339(&modified)
        .map_err(|e| StorageError::Internal(format!("bad last_modified for {key}: {e}")))?
        .with_timezone(&Utc);
    Ok(ObjectHead {
        key,
        size: size as u64,
        last_modified,
    })
}

impl ObjectClient for SqliteObjectClient {
    fn head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT key, size, last_modified FROM objects WHERE key = ?1",
                params![key],
                head_from_row,
            )
            .optional()?;
        row.map(to_head).transpose()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT data FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        conn.execute(
            "INSERT INTO objects (key, data, size, last_modified) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 data = excluded.data,
                 size = excluded.size,
                 last_modified = excluded.last_modified",
            params![key, data, data.len() as i64, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM objects WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectHead>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, size, last_modified FROM objects
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![prefix], head_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(to_head).collect()
    }
}
