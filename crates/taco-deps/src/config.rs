//! Configuration for the dependency graph engine.

use taco_core::UnitId;

use crate::SYSTEM_GRAPH_UNIT_ID;

/// Who the engine is and where the graph lives. Built once and handed to
/// [`DependencyGraph`](crate::DependencyGraph) by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Reserved unit holding the graph document.
    pub graph_unit: UnitId,
    /// Recorded as `who` on the graph lock.
    pub lock_owner: String,
}

impl GraphConfig {
    pub fn new(graph_unit: UnitId) -> Self {
        GraphConfig {
            graph_unit,
            ..Self::default()
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            graph_unit: UnitId::parse(SYSTEM_GRAPH_UNIT_ID)
                .unwrap_or_else(|_| unreachable!("reserved graph unit ID is valid")),
            lock_owner: "opentaco-deps".to_string(),
        }
    }
}
