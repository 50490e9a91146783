//! Grouping node types: plain `node` groups and `instance`.

use serde_json::{Map, Value};

use crate::errors::{PrismError, Result};
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{CompileMode, DirtyLevel, NodeType, unknown_attr};

/// A node that only owns children.
pub struct GroupType {
    name: &'static str,
}

impl GroupType {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl NodeType for GroupType {
    fn type_name(&self) -> &str {
        self.name
    }
}

/// `instance {target}`: compiles the subtree of the node with ID `target`
/// in place, as if it were a child here.
pub struct InstanceType;

impl NodeType for InstanceType {
    fn type_name(&self) -> &str {
        "instance"
    }

    fn compile_mode(&self) -> CompileMode {
        CompileMode::Instance
    }

    /// Checks the target; an instance has no children of its own to build.
    fn construct(&self, config: &NodeConfig) -> Result<Vec<NodeConfig>> {
        match config.param("target") {
            Some(Value::String(_)) => Ok(Vec::new()),
            Some(other) => Err(PrismError::IllegalNodeConfig(format!(
                "instance.target: expected a node ID, got {other}"
            ))),
            None => Err(PrismError::IllegalNodeConfig(
                "instance: missing 'target'".to_string(),
            )),
        }
    }

    fn set_param(
        &self,
        _params: &Map<String, Value>,
        attr: &str,
        value: &Value,
    ) -> Result<DirtyLevel> {
        match attr {
            "target" if value.is_string() => Ok(DirtyLevel::Recompile),
            "target" => Err(PrismError::IllegalNodeConfig(format!(
                "instance.target: expected a node ID, got {value}"
            ))),
            _ => Err(unknown_attr("instance", attr)),
        }
    }
}
