//! Dependency graph engine for the taco state backend.
//!
//! Units declare output-to-input edges in a reserved graph unit stored through
//! the ordinary [`UnitStore`](taco_storage::UnitStore) API. Every write to a
//! unit recomputes the digests of the edges touching it, and a status query
//! marks units whose inputs have gone stale, directly (red) or through an
//! upstream unit (yellow).
//!
//! # Modules
//!
//! - [`digest`]: canonical JSON and base58 SHA-256 fingerprints
//! - [`tfstate`]: the Terraform-state shaped graph document
//! - [`edge`]: the per-edge freshness state machine
//! - [`update`]: DependencyGraph, the locked write hook
//! - [`status`]: red/yellow/green status queries
//! - [`config`]: GraphConfig

pub mod config;
pub mod digest;
pub mod edge;
pub mod status;
pub mod tfstate;
pub mod update;

/// Reserved ID of the unit holding the dependency graph.
pub const SYSTEM_GRAPH_UNIT_ID: &str = "__opentaco_system";

/// Resource type whose instances are dependency edges.
pub const DEPENDENCY_RESOURCE_TYPE: &str = "opentaco_dependency";

// Re-export key types for ergonomic use.
pub use config::GraphConfig;
pub use digest::{canonical_json, digest_value};
pub use edge::{DependencyEdge, EdgeStatus};
pub use status::{Health, IncomingEdge, Summary, UnitStatus};
pub use tfstate::GraphState;
pub use update::{DependencyGraph, GraphUpdate, SkipReason};
