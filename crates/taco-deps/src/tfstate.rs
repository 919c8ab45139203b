//! The minimal Terraform-state shape the graph unit is stored in.
//!
//! ```json
//! {"serial": 3, "lineage": "…", "resources": [
//!   {"type": "opentaco_dependency", "instances": [{"attributes": {…}}]}
//! ]}
//! ```
//!
//! Decoding is lenient the way state readers usually are: missing fields take
//! their defaults. Fields this engine does not know about are kept in `extra`
//! and written back untouched, so documents seeded by other tools survive a
//! read-modify-write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DEPENDENCY_RESOURCE_TYPE;

/// The graph document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    #[serde(default)]
    pub serial: i64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphState {
    /// An empty graph with a fresh lineage.
    pub fn empty() -> Self {
        GraphState {
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Attribute maps of every dependency instance, in document order.
    pub fn edges(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == DEPENDENCY_RESOURCE_TYPE)
            .flat_map(|r| r.instances.iter())
            .filter_map(|i| i.attributes.as_ref())
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Map<String, Value>> {
        self.resources
            .iter_mut()
            .filter(|r| r.resource_type == DEPENDENCY_RESOURCE_TYPE)
            .flat_map(|r| r.instances.iter_mut())
            .filter_map(|i| i.attributes.as_mut())
    }
}

/// One entry of a unit's `outputs` map.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputValue {
    #[serde(default)]
    pub value: Value,
}

/// The `outputs` view of a unit's state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateOutputs {
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
}

impl StateOutputs {
    /// Decodes `content`. Anything that is not a JSON object with an
    /// `outputs` object yields `None`.
    pub fn parse(content: &[u8]) -> Option<Self> {
        let parsed: StateOutputs = serde_json::from_slice(content).ok()?;
        parsed.outputs.as_ref()?;
        Some(parsed)
    }

    /// The named output, or `None` if it is absent or malformed.
    pub fn get(&self, name: &str) -> Option<OutputValue> {
        let raw = self.outputs.as_ref()?.get(name)?;
        serde_json::from_value(raw.clone()).ok()
    }
}
