//! Backend selection from the environment.
//!
//! | Variable              | Meaning                                 | Default            |
//! |-----------------------|-----------------------------------------|--------------------|
//! | `TACO_STORAGE`        | `memory`, `file` or `blob`              | `memory`           |
//! | `TACO_FILE_ROOT`      | root directory of the file backend      | `./data`           |
//! | `TACO_BLOB_DB`        | object database of the blob backend     | `taco-objects.db`  |
//! | `TACO_BLOB_PREFIX`    | key prefix inside the object namespace  | empty              |
//! | `TACO_BLOB_LIST_LOCKS`| `true`/`1` to report locks in `list`    | `false`            |
//! | `TACO_MAX_VERSIONS`   | versions kept per unit                  | `10`               |

use std::path::PathBuf;

use tracing::{info, warn};

use crate::blob::{BlobStore, SqliteObjectClient};
use crate::error::StorageError;
use crate::file::FileStore;
use crate::memory::MemoryStore;
use crate::traits::UnitStore;
use crate::versions::DEFAULT_MAX_VERSIONS;

pub const DEFAULT_FILE_ROOT: &str = "./data";
pub const DEFAULT_BLOB_DATABASE: &str = "taco-objects.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Memory,
    File { root: PathBuf },
    Blob { database: String, prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    pub max_versions: usize,
    /// Blob backend only: fetch lock state while listing.
    pub list_lock_status: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: BackendConfig::Memory,
            max_versions: DEFAULT_MAX_VERSIONS,
            list_lock_status: false,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup, so parsing can be tested without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = match get("TACO_STORAGE").as_deref().unwrap_or("memory") {
            "memory" => BackendConfig::Memory,
            "file" => BackendConfig::File {
                root: PathBuf::from(get("TACO_FILE_ROOT").unwrap_or_else(|| DEFAULT_FILE_ROOT.to_string())),
            },
            "blob" => BackendConfig::Blob {
                database: get("TACO_BLOB_DB").unwrap_or_else(|| DEFAULT_BLOB_DATABASE.to_string()),
                prefix: get("TACO_BLOB_PREFIX").unwrap_or_default(),
            },
            other => {
                return Err(StorageError::Internal(format!(
                    "unknown TACO_STORAGE backend '{other}' (expected memory, file or blob)"
                )))
            }
        };

        let max_versions = match get("TACO_MAX_VERSIONS") {
            None => DEFAULT_MAX_VERSIONS,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "invalid TACO_MAX_VERSIONS, using default");
                    DEFAULT_MAX_VERSIONS
                }
            },
        };

        let list_lock_status = matches!(
            get("TACO_BLOB_LIST_LOCKS").map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes")
        );

        Ok(StoreConfig {
            backend,
            max_versions,
            list_lock_status,
        })
    }

    /// Constructs the configured backend.
    pub fn open(&self) -> Result<Box<dyn UnitStore>, StorageError> {
        let store: Box<dyn UnitStore> = match &self.backend {
            BackendConfig::Memory => {
                info!(max_versions = self.max_versions, "using memory store");
                Box::new(MemoryStore::with_max_versions(self.max_versions))
            }
            BackendConfig::File { root } => {
                info!(root = %root.display(), max_versions = self.max_versions, "using file store");
                Box::new(FileStore::open(root.clone())?.with_max_versions(self.max_versions))
            }
            BackendConfig::Blob { database, prefix } => {
                info!(
                    database = %database,
                    prefix = %prefix,
                    max_versions = self.max_versions,
                    list_lock_status = self.list_lock_status,
                    "using blob store"
                );
                Box::new(
                    BlobStore::new(SqliteObjectClient::open(database)?)
                        .with_prefix(prefix)
                        .with_max_versions(self.max_versions)
                        .with_list_lock_status(self.list_lock_status),
                )
            }
        };
        Ok(store)
    }
}
