//! Declarative node configs.
//!
//! A scene is described as a JSON tree:
//!
//! ```json
//! { "type": "material", "id": "red", "baseColor": { "r": 1 }, "nodes": [ ... ] }
//! ```
//!
//! `type`, `id`, `coreId` and `nodes` are common to every node; everything
//! else lands in [`NodeConfig::params`] and is interpreted by the node type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{PrismError, Result};
use crate::state::values;

fn default_type() -> String {
    "node".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(rename = "type", default = "default_type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeConfig>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("node")
    }
}

impl NodeConfig {
    #[must_use]
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            id: None,
            core_id: None,
            nodes: Vec::new(),
            params: Map::new(),
        }
    }

    /// Parses a config, rejecting anything that is not a JSON object.
    pub fn from_json(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PrismError::NodeConfigExpected(format!(
                "expected a node config object, got {value}"
            )));
        }
        Ok(Self::deserialize(value)?)
    }

    // -- Builder helpers --

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_core_id(mut self, core_id: impl Into<String>) -> Self {
        self.core_id = Some(core_id.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: NodeConfig) -> Self {
        self.nodes.push(child);
        self
    }

    // -- Param access --

    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Deserializes all params into a typed struct.
    pub fn parse_params<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        values::parse(&Value::Object(self.params.clone()), &self.node_type)
    }

    /// Deserializes one param, if present.
    pub fn parse_param<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<Option<T>> {
        self.params
            .get(name)
            .map(|v| values::parse(v, &format!("{}.{name}", self.node_type)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn common_fields_and_params_split() {
        let config = NodeConfig::from_json(&json!({
            "type": "material",
            "id": "red",
            "coreId": "shared",
            "baseColor": { "r": 1.0 },
            "nodes": [{ "type": "geometry/box" }],
        }))
        .unwrap();
        assert_eq!(config.node_type, "material");
        assert_eq!(config.id.as_deref(), Some("red"));
        assert_eq!(config.core_id.as_deref(), Some("shared"));
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.params.len(), 1);
        assert!(config.param("baseColor").is_some());
    }

    #[test]
    fn missing_type_is_a_group() {
        let config = NodeConfig::from_json(&json!({ "nodes": [] })).unwrap();
        assert_eq!(config.node_type, "node");
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            NodeConfig::from_json(&json!([1, 2])),
            Err(PrismError::NodeConfigExpected(_))
        ));
    }
}
