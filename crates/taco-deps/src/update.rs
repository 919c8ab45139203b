//! The write hook that keeps edge digests current.
//!
//! [`DependencyGraph::update_on_write`] runs right after a successful write to
//! a unit. It takes the graph unit's lock with a fresh token, recomputes every
//! edge touching the written unit and writes the graph back only when
//! something changed. It never waits for the lock, never retries, and never
//! fails the triggering write: every problem becomes a [`GraphUpdate::Skipped`]
//! value the caller is free to ignore.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use taco_core::{LockInfo, UnitId};
use taco_storage::{OpContext, StorageError, UnitStore};

use crate::config::GraphConfig;
use crate::edge::{apply_write, normalize_unit_ref};
use crate::tfstate::{GraphState, StateOutputs};

/// Outcome of one graph update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphUpdate {
    /// The graph was rewritten with the new `serial`.
    Updated { serial: i64, edges_changed: usize },
    /// No edge touching the unit changed; nothing was written.
    Unchanged,
    Skipped(SkipReason),
}

/// Why an update did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The write was to the graph unit itself.
    GraphUnitWrite,
    /// Another writer holds the graph lock.
    LockUnavailable,
    /// The graph unit does not exist or is empty.
    GraphMissing,
    /// The graph unit does not decode as a graph document.
    GraphCorrupt,
    /// Encoding or writing back the graph failed.
    WriteFailed,
    /// The caller's context was cancelled or timed out.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::GraphUnitWrite => "write to graph unit",
            SkipReason::LockUnavailable => "graph lock unavailable",
            SkipReason::GraphMissing => "graph unit missing",
            SkipReason::GraphCorrupt => "graph unit corrupt",
            SkipReason::WriteFailed => "graph write failed",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

fn skip_for(err: &StorageError, otherwise: SkipReason) -> SkipReason {
    match err {
        StorageError::Cancelled | StorageError::DeadlineExceeded => SkipReason::Cancelled,
        StorageError::NotFound(_) => SkipReason::GraphMissing,
        _ => otherwise,
    }
}

/// Holds the graph lock and releases it on drop.
///
/// Release uses a background context so it still happens when the caller's
/// context has been cancelled.
struct GraphLockGuard<'a, S: UnitStore + ?Sized> {
    store: &'a S,
    unit: &'a UnitId,
    lock_id: String,
}

impl<S: UnitStore + ?Sized> Drop for GraphLockGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self
            .store
            .unlock(&OpContext::background(), self.unit, &self.lock_id)
        {
            warn!(unit = %self.unit, lock_id = %self.lock_id, error = %err, "releasing graph lock failed");
        }
    }
}

/// The dependency graph engine over a [`UnitStore`].
pub struct DependencyGraph<'a, S: UnitStore + ?Sized> {
    store: &'a S,
    config: &'a GraphConfig,
}

impl<'a, S: UnitStore + ?Sized> DependencyGraph<'a, S> {
    pub fn new(store: &'a S, config: &'a GraphConfig) -> Self {
        DependencyGraph { store, config }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn config(&self) -> &'a GraphConfig {
        self.config
    }

    /// Makes sure the graph unit exists and holds a graph document, seeding
    /// an empty graph when it is missing or empty. Returns whether it seeded.
    ///
    /// The seed goes through `upload_blob`, so a graph lock held by a
    /// concurrent update cannot leave the unit created but empty.
    pub fn ensure_graph_unit(&self, ctx: &OpContext) -> Result<bool, StorageError> {
        let unit = &self.config.graph_unit;
        match self.store.create(ctx, unit) {
            Ok(_) => {}
            Err(StorageError::AlreadyExists(_)) => {
                if !self.store.download(ctx, unit)?.is_empty() {
                    return Ok(false);
                }
            }
            Err(err) => return Err(err),
        }
        let seed = GraphState::empty().to_vec()?;
        self.store.upload_blob(ctx, unit, &seed)?;
        debug!(unit = %unit, "seeded empty dependency graph");
        Ok(true)
    }

    /// Uploads `data` to `id`, then runs the graph hook.
    ///
    /// Upload errors are returned unchanged. Once the upload succeeded the
    /// result is `Ok` whatever happens to the graph.
    pub fn upload_tracked(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        data: &[u8],
        lock_token: Option<&str>,
    ) -> Result<GraphUpdate, StorageError> {
        self.store.upload(ctx, id, data, lock_token)?;
        Ok(self.update_on_write(ctx, id.as_str(), data))
    }

    /// Restores `id` to the version recorded at `timestamp`, then runs the
    /// graph hook over the restored content.
    pub fn restore_tracked(
        &self,
        ctx: &OpContext,
        id: &UnitId,
        timestamp: DateTime<Utc>,
        lock_token: Option<&str>,
    ) -> Result<GraphUpdate, StorageError> {
        let content = self.store.download_version(ctx, id, timestamp)?;
        self.upload_tracked(ctx, id, &content, lock_token)
    }

    /// Recomputes the edges touching `unit_id` after its content became
    /// `content`.
    pub fn update_on_write(&self, ctx: &OpContext, unit_id: &str, content: &[u8]) -> GraphUpdate {
        let outcome = self.try_update(ctx, unit_id, content);
        match outcome {
            GraphUpdate::Skipped(SkipReason::GraphUnitWrite) => {
                debug!(unit = unit_id, "write to graph unit, not tracking");
            }
            GraphUpdate::Skipped(reason) => {
                warn!(unit = unit_id, %reason, "dependency graph update skipped");
            }
            GraphUpdate::Unchanged => {
                debug!(unit = unit_id, "dependency graph unchanged");
            }
            GraphUpdate::Updated { serial, edges_changed } => {
                debug!(unit = unit_id, serial, edges_changed, "dependency graph updated");
            }
        }
        outcome
    }

    fn try_update(&self, ctx: &OpContext, unit_id: &str, content: &[u8]) -> GraphUpdate {
        let unit = normalize_unit_ref(unit_id);
        let graph_unit = &self.config.graph_unit;
        if unit == graph_unit.as_str() {
            return GraphUpdate::Skipped(SkipReason::GraphUnitWrite);
        }
        if ctx.check().is_err() {
            return GraphUpdate::Skipped(SkipReason::Cancelled);
        }

        let lock = LockInfo::new(format!("deps-{}", Uuid::new_v4()), self.config.lock_owner.as_str());
        if let Err(err) = self.store.lock(ctx, graph_unit, &lock) {
            return GraphUpdate::Skipped(skip_for(&err, SkipReason::LockUnavailable));
        }
        let _guard = GraphLockGuard {
            store: self.store,
            unit: graph_unit,
            lock_id: lock.id,
        };

        let bytes = match self.store.download(ctx, graph_unit) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return GraphUpdate::Skipped(SkipReason::GraphMissing),
            Err(err) => return GraphUpdate::Skipped(skip_for(&err, SkipReason::GraphMissing)),
        };
        let mut graph = match GraphState::from_slice(&bytes) {
            Ok(graph) => graph,
            Err(_) => return GraphUpdate::Skipped(SkipReason::GraphCorrupt),
        };

        let outputs = StateOutputs::parse(content);
        let now = Utc::now();
        let edges_changed = graph
            .edges_mut()
            .map(|attrs| apply_write(attrs, unit, outputs.as_ref(), now))
            .filter(|changed| *changed)
            .count();
        if edges_changed == 0 {
            return GraphUpdate::Unchanged;
        }

        graph.serial += 1;
        let encoded = match graph.to_vec() {
            Ok(encoded) => encoded,
            Err(_) => return GraphUpdate::Skipped(SkipReason::WriteFailed),
        };
        if ctx.check().is_err() {
            return GraphUpdate::Skipped(SkipReason::Cancelled);
        }
        // The graph lock is ours; write through the lock-bypassing path.
        if let Err(err) = self.store.upload_blob(ctx, graph_unit, &encoded) {
            return GraphUpdate::Skipped(skip_for(&err, SkipReason::WriteFailed));
        }

        GraphUpdate::Updated {
            serial: graph.serial,
            edges_changed,
        }
    }
}
