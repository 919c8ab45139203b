//! Read-only status queries over the dependency graph.
//!
//! A unit is **red** when at least one of its incoming edges is pending,
//! **yellow** when it is reachable downstream from any red unit, and
//! **green** otherwise. Queries never take the graph lock and never fail: a
//! missing or corrupt graph reads as "nothing known to be stale".

use std::collections::BTreeSet;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, VisitMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use taco_storage::{OpContext, UnitStore};

use crate::edge::{normalize_unit_ref, DependencyEdge, EdgeStatus};
use crate::tfstate::GraphState;
use crate::update::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Green,
    Yellow,
    Red,
}

/// One edge into the queried unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub from_unit_id: String,
    pub from_output: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub in_digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub out_digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_in_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_out_at: String,
}

impl From<DependencyEdge> for IncomingEdge {
    fn from(edge: DependencyEdge) -> Self {
        IncomingEdge {
            edge_id: edge.edge_id,
            from_unit_id: edge.from_unit_id,
            from_output: edge.from_output,
            status: edge.status,
            in_digest: edge.in_digest,
            out_digest: edge.out_digest,
            last_in_at: edge.last_in_at,
            last_out_at: edge.last_out_at,
        }
    }
}

/// Incoming edge counts by status. Empty or unrecognized statuses count as
/// unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub incoming_ok: usize,
    pub incoming_pending: usize,
    pub incoming_unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit_id: String,
    pub status: Health,
    /// Pending first, then unknown, then ok; ties by source unit.
    pub incoming: Vec<IncomingEdge>,
    pub summary: Summary,
}

impl UnitStatus {
    /// Green with nothing known about the unit.
    pub fn green(unit_id: &str) -> Self {
        UnitStatus {
            unit_id: unit_id.to_string(),
            status: Health::Green,
            incoming: Vec::new(),
            summary: Summary::default(),
        }
    }
}

fn sort_rank(status: &str) -> u8 {
    match EdgeStatus::parse(status) {
        Some(EdgeStatus::Pending) => 0,
        Some(EdgeStatus::Unknown) | None => 1,
        Some(EdgeStatus::Ok) => 2,
    }
}

/// Computes the status of `unit_id` from a decoded graph.
pub fn compute_status(graph: &GraphState, unit_id: &str) -> UnitStatus {
    let target = normalize_unit_ref(unit_id);
    let edges: Vec<DependencyEdge> = graph.edges().map(DependencyEdge::from_attributes).collect();

    let mut adjacency: DiGraphMap<&str, ()> = DiGraphMap::new();
    let mut red: BTreeSet<&str> = BTreeSet::new();
    for edge in &edges {
        adjacency.add_edge(edge.from_unit_id.as_str(), edge.to_unit_id.as_str(), ());
        if edge.status() == Some(EdgeStatus::Pending) {
            red.insert(edge.to_unit_id.as_str());
        }
    }

    let health = if red.contains(target) {
        Health::Red
    } else if reaches(&adjacency, &red, target) {
        Health::Yellow
    } else {
        Health::Green
    };

    let mut incoming: Vec<IncomingEdge> = edges
        .iter()
        .filter(|e| e.to_unit_id == target)
        .cloned()
        .map(IncomingEdge::from)
        .collect();
    incoming.sort_by(|a, b| {
        sort_rank(&a.status)
            .cmp(&sort_rank(&b.status))
            .then_with(|| a.from_unit_id.cmp(&b.from_unit_id))
    });

    let mut summary = Summary::default();
    for edge in &incoming {
        match EdgeStatus::parse(&edge.status) {
            Some(EdgeStatus::Ok) => summary.incoming_ok += 1,
            Some(EdgeStatus::Pending) => summary.incoming_pending += 1,
            _ => summary.incoming_unknown += 1,
        }
    }

    debug!(
        unit = unit_id,
        status = ?health,
        edges = edges.len(),
        red = red.len(),
        incoming = incoming.len(),
        "computed unit status"
    );

    UnitStatus {
        unit_id: unit_id.to_string(),
        status: health,
        incoming,
        summary,
    }
}

/// Breadth-first search seeded from every red unit at once. True when
/// `target` is discovered and is not itself a seed.
fn reaches<'a>(adjacency: &DiGraphMap<&'a str, ()>, seeds: &BTreeSet<&'a str>, target: &str) -> bool {
    let mut seeds_iter = seeds.iter().copied();
    let Some(first) = seeds_iter.next() else {
        return false;
    };
    if seeds.contains(target) {
        return false;
    }

    let mut bfs = Bfs::new(adjacency, first);
    for seed in seeds_iter {
        if bfs.discovered.visit(seed) {
            bfs.stack.push_back(seed);
        }
    }
    while let Some(node) = bfs.next(adjacency) {
        if node == target {
            return true;
        }
    }
    false
}

impl<S: UnitStore + ?Sized> DependencyGraph<'_, S> {
    /// Status of `unit_id`. Read-only and lock-free; a missing or corrupt
    /// graph yields green with no incoming edges.
    pub fn unit_status(&self, ctx: &OpContext, unit_id: &str) -> UnitStatus {
        let bytes = match self.store().download(ctx, &self.config().graph_unit) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return UnitStatus::green(unit_id),
            Err(err) => {
                debug!(unit = unit_id, error = %err, "graph unavailable, reporting green");
                return UnitStatus::green(unit_id);
            }
        };
        match GraphState::from_slice(&bytes) {
            Ok(graph) => compute_status(&graph, unit_id),
            Err(err) => {
                debug!(unit = unit_id, error = %err, "graph corrupt, reporting green");
                UnitStatus::green(unit_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn graph(edges: Value) -> GraphState {
        serde_json::from_value(json!({
            "serial": 1,
            "lineage": "l",
            "resources": [{"type": "opentaco_dependency", "instances": edges}]
        }))
        .unwrap()
    }

    fn edge(from: &str, to: &str, status: &str) -> Value {
        json!({"attributes": {
            "from_unit_id": from,
            "from_output": "out",
            "to_unit_id": to,
            "to_input": "in",
            "status": status,
        }})
    }

    #[test]
    fn chain_propagates_red_to_yellow() {
        let g = graph(json!([edge("a", "b", "pending"), edge("b", "c", "ok")]));
        assert_eq!(compute_status(&g, "a").status, Health::Green);
        assert_eq!(compute_status(&g, "b").status, Health::Red);
        assert_eq!(compute_status(&g, "c").status, Health::Yellow);
        assert_eq!(compute_status(&g, "unrelated").status, Health::Green);
    }

    #[test]
    fn yellow_propagates_through_multiple_hops_and_seeds() {
        let g = graph(json!([
            edge("a", "b", "pending"),
            edge("x", "y", "pending"),
            edge("y", "z", "ok"),
            edge("z", "w", "unknown"),
        ]));
        assert_eq!(compute_status(&g, "w").status, Health::Yellow);
        assert_eq!(compute_status(&g, "y").status, Health::Red);
        assert_eq!(compute_status(&g, "x").status, Health::Green);
    }

    #[test]
    fn red_wins_over_yellow() {
        let g = graph(json!([edge("a", "b", "pending"), edge("b", "c", "pending")]));
        assert_eq!(compute_status(&g, "c").status, Health::Red);
    }

    #[test]
    fn cycles_terminate() {
        let g = graph(json!([
            edge("a", "b", "pending"),
            edge("b", "c", "ok"),
            edge("c", "a", "ok"),
        ]));
        assert_eq!(compute_status(&g, "a").status, Health::Yellow);
        assert_eq!(compute_status(&g, "b").status, Health::Red);
    }

    #[test]
    fn incoming_sorted_and_summarized() {
        let g = graph(json!([
            edge("z", "t", "ok"),
            edge("m", "t", "unknown"),
            edge("b", "t", "pending"),
            edge("a", "t", "ok"),
            edge("q", "t", ""),
            edge("t", "other", "pending"),
        ]));
        let status = compute_status(&g, "/t/terraform.tfstate");
        assert_eq!(status.unit_id, "/t/terraform.tfstate");
        assert_eq!(status.status, Health::Red);
        let order: Vec<&str> = status.incoming.iter().map(|e| e.from_unit_id.as_str()).collect();
        assert_eq!(order, ["b", "m", "q", "a", "z"]);
        assert_eq!(
            status.summary,
            Summary {
                incoming_ok: 2,
                incoming_pending: 1,
                incoming_unknown: 2,
            }
        );
    }

    #[test]
    fn status_json_shape() {
        let mut g = graph(json!([edge("vpc", "app", "pending")]));
        if let Some(attrs) = g.edges_mut().next() {
            attrs.insert("id".into(), json!("vpc->app"));
            attrs.insert("in_digest".into(), json!("D1"));
        }
        let status = compute_status(&g, "app");
        insta::assert_json_snapshot!(status, @r#"
        {
          "unit_id": "app",
          "status": "red",
          "incoming": [
            {
              "edge_id": "vpc->app",
              "from_unit_id": "vpc",
              "from_output": "out",
              "status": "pending",
              "in_digest": "D1"
            }
          ],
          "summary": {
            "incoming_ok": 0,
            "incoming_pending": 1,
            "incoming_unknown": 0
          }
        }
        "#);
    }
}
