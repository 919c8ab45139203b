//! Dependency edges and their freshness state machine.
//!
//! An edge links output `from_output` of unit `from_unit_id` to input
//! `to_input` of unit `to_unit_id`. Its computed fields move only in
//! response to writes of either endpoint:
//!
//! - writing the source records the digest of the named output in
//!   `in_digest`; the edge is `ok` when that equals `out_digest`, `pending`
//!   otherwise, and `unknown` when the output cannot be read;
//! - writing the target acknowledges the latest known input by copying
//!   `in_digest` into `out_digest` and marking the edge `ok`.
//!
//! Edges are stored as raw attribute maps inside the graph document; only
//! the computed fields are ever touched here.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::digest::digest_value;
use crate::tfstate::StateOutputs;

pub const ATTR_ID: &str = "id";
pub const ATTR_FROM_UNIT: &str = "from_unit_id";
pub const ATTR_FROM_OUTPUT: &str = "from_output";
pub const ATTR_TO_UNIT: &str = "to_unit_id";
pub const ATTR_TO_INPUT: &str = "to_input";
pub const ATTR_IN_DIGEST: &str = "in_digest";
pub const ATTR_OUT_DIGEST: &str = "out_digest";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_LAST_IN_AT: &str = "last_in_at";
pub const ATTR_LAST_OUT_AT: &str = "last_out_at";

/// Freshness of a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    /// The source output could not be read.
    Unknown,
    /// The source changed since the target last acknowledged it.
    Pending,
    Ok,
}

impl EdgeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeStatus::Unknown => "unknown",
            EdgeStatus::Pending => "pending",
            EdgeStatus::Ok => "ok",
        }
    }

    /// Parses a stored status. Empty or unrecognized strings yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unknown" => Some(EdgeStatus::Unknown),
            "pending" => Some(EdgeStatus::Pending),
            "ok" => Some(EdgeStatus::Ok),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes a unit reference stored on an edge: surrounding whitespace and
/// slashes are trimmed and a trailing `/terraform.tfstate` is dropped.
pub fn normalize_unit_ref(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches('/');
    trimmed
        .strip_suffix("/terraform.tfstate")
        .unwrap_or(trimmed)
}

/// Reads an attribute as a string. Strings are returned as-is, null or
/// missing as `""`, anything else as its compact JSON text.
pub fn attr_str(attrs: &Map<String, Value>, key: &str) -> String {
    match attrs.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Typed, read-only view of an edge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub edge_id: Option<String>,
    pub from_unit_id: String,
    pub from_output: String,
    pub to_unit_id: String,
    pub to_input: String,
    pub in_digest: String,
    pub out_digest: String,
    /// Stored status text, kept verbatim.
    pub status: String,
    pub last_in_at: String,
    pub last_out_at: String,
}

impl DependencyEdge {
    pub fn from_attributes(attrs: &Map<String, Value>) -> Self {
        let edge_id = attr_str(attrs, ATTR_ID);
        DependencyEdge {
            edge_id: (!edge_id.is_empty()).then_some(edge_id),
            from_unit_id: normalize_unit_ref(&attr_str(attrs, ATTR_FROM_UNIT)).to_string(),
            from_output: attr_str(attrs, ATTR_FROM_OUTPUT),
            to_unit_id: normalize_unit_ref(&attr_str(attrs, ATTR_TO_UNIT)).to_string(),
            to_input: attr_str(attrs, ATTR_TO_INPUT),
            in_digest: attr_str(attrs, ATTR_IN_DIGEST),
            out_digest: attr_str(attrs, ATTR_OUT_DIGEST),
            status: attr_str(attrs, ATTR_STATUS),
            last_in_at: attr_str(attrs, ATTR_LAST_IN_AT),
            last_out_at: attr_str(attrs, ATTR_LAST_OUT_AT),
        }
    }

    pub fn status(&self) -> Option<EdgeStatus> {
        EdgeStatus::parse(&self.status)
    }
}

/// Applies a write of `unit` (already normalized) to one edge.
///
/// `outputs` is the written content's decoded outputs, `None` when they could
/// not be parsed. Returns whether any attribute changed.
pub fn apply_write(
    attrs: &mut Map<String, Value>,
    unit: &str,
    outputs: Option<&StateOutputs>,
    now: DateTime<Utc>,
) -> bool {
    let from = attr_str(attrs, ATTR_FROM_UNIT);
    let to = attr_str(attrs, ATTR_TO_UNIT);
    // Both sides compare against the status as it was before this write.
    let status = attr_str(attrs, ATTR_STATUS);
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut changed = false;

    if normalize_unit_ref(&from) == unit {
        changed |= refresh_source(attrs, &status, outputs, &stamp);
    }
    if normalize_unit_ref(&to) == unit {
        changed |= acknowledge_target(attrs, &status, &stamp);
    }
    changed
}

fn refresh_source(
    attrs: &mut Map<String, Value>,
    status: &str,
    outputs: Option<&StateOutputs>,
    stamp: &str,
) -> bool {
    let output_name = attr_str(attrs, ATTR_FROM_OUTPUT);

    let Some(output) = outputs.and_then(|o| o.get(&output_name)) else {
        return set_status(attrs, status, EdgeStatus::Unknown);
    };

    let mut changed = false;
    let digest = digest_value(&output.value);
    if attr_str(attrs, ATTR_IN_DIGEST) != digest {
        attrs.insert(ATTR_IN_DIGEST.to_string(), Value::String(digest.clone()));
        attrs.insert(ATTR_LAST_IN_AT.to_string(), Value::String(stamp.to_string()));
        changed = true;
    }

    let out_digest = attr_str(attrs, ATTR_OUT_DIGEST);
    let next = if !digest.is_empty() && !out_digest.is_empty() && digest == out_digest {
        EdgeStatus::Ok
    } else {
        EdgeStatus::Pending
    };
    set_status(attrs, status, next) || changed
}

fn acknowledge_target(attrs: &mut Map<String, Value>, status: &str, stamp: &str) -> bool {
    let in_digest = attr_str(attrs, ATTR_IN_DIGEST);
    if in_digest.is_empty() {
        return false;
    }
    if attr_str(attrs, ATTR_OUT_DIGEST) != in_digest {
        attrs.insert(ATTR_OUT_DIGEST.to_string(), Value::String(in_digest));
        attrs.insert(ATTR_LAST_OUT_AT.to_string(), Value::String(stamp.to_string()));
        attrs.insert(ATTR_STATUS.to_string(), Value::String(EdgeStatus::Ok.as_str().to_string()));
        return true;
    }
    set_status(attrs, status, EdgeStatus::Ok)
}

/// Writes `next` if it differs from `current`.
fn set_status(attrs: &mut Map<String, Value>, current: &str, next: EdgeStatus) -> bool {
    if current == next.as_str() {
        return false;
    }
    attrs.insert(ATTR_STATUS.to_string(), Value::String(next.as_str().to_string()));
    true
}
