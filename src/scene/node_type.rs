//! Node types and their registry.
//!
//! Every node is created from a type name. The [`NodeType`] registered
//! under that name decides which core category the node carries, how that
//! core is built from the config, how the node takes part in compile, and
//! which attributes can be set and read afterwards.
//!
//! Custom node types implement the same trait and are registered next to
//! the built-in ones. A custom type either carries a core of its own (a
//! shader type binding hooks, say) or expands into a subgraph of built-in
//! nodes through [`NodeType::construct`].

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use super::config::NodeConfig;
use super::types;
use crate::errors::{PrismError, Result};
use crate::state::{CoreKind, CorePayload};

/// How a node takes part in the compile traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Only recurses into children.
    Group,
    /// Pushes its core for the duration of its subtree.
    Push,
    /// A geometry leaf: builds a display object from the active cores.
    Geometry,
    /// Compiles another node's subtree in place.
    Instance,
}

/// The cheapest work that brings the display up to date after a setter.
///
/// Each level implies the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DirtyLevel {
    #[default]
    None,
    /// Values changed: redraw only.
    Image,
    /// Draw list membership changed.
    DrawList,
    /// Sort keys changed: resort.
    StateOrder,
    /// The core gained uniforms its chunks have not looked up.
    Uniforms,
    /// The core's shape changed: re-run the compile traversal.
    Recompile,
}

pub trait NodeType: Send + Sync {
    fn type_name(&self) -> &str;

    /// Category of the core the node carries, if any.
    fn core_kind(&self) -> Option<CoreKind> {
        None
    }

    fn compile_mode(&self) -> CompileMode {
        if self.core_kind().is_some() {
            CompileMode::Push
        } else {
            CompileMode::Group
        }
    }

    /// Key under which the core is shared with other nodes.
    fn core_id(&self, config: &NodeConfig) -> Result<Option<String>> {
        Ok(config.core_id.clone())
    }

    /// Builds the core payload from the config.
    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let _ = config;
        Err(PrismError::IllegalNodeConfig(format!(
            "{}: node type carries no core",
            self.type_name()
        )))
    }

    /// Child nodes to create ahead of the config's own `nodes`.
    fn construct(&self, config: &NodeConfig) -> Result<Vec<NodeConfig>> {
        let _ = config;
        Ok(Vec::new())
    }

    /// Applies a setter to the node's core.
    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let _ = (core, value);
        Err(unknown_attr(self.type_name(), attr))
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let _ = core;
        Err(unknown_attr(self.type_name(), attr))
    }

    /// Applies a setter to a node without a core. The value is retained in
    /// the node's params on success.
    fn set_param(
        &self,
        params: &Map<String, Value>,
        attr: &str,
        value: &Value,
    ) -> Result<DirtyLevel> {
        let _ = (params, value);
        Err(unknown_attr(self.type_name(), attr))
    }
}

impl fmt::Debug for dyn NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("type_name", &self.type_name())
            .finish()
    }
}

pub(crate) fn unknown_attr(node_type: &str, attr: &str) -> PrismError {
    PrismError::IllegalNodeConfig(format!("{node_type}: no attribute '{attr}'"))
}

pub(crate) fn payload_mismatch(node_type: &str) -> PrismError {
    PrismError::IllegalNodeConfig(format!("{node_type}: core has the wrong category"))
}

/// Node types by name.
#[derive(Clone)]
pub struct NodeTypeRegistry {
    types: FxHashMap<String, Arc<dyn NodeType>>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("NodeTypeRegistry").field("types", &names).finish()
    }
}

impl NodeTypeRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        types::register_builtins(&mut registry);
        registry
    }

    /// Registers a type, replacing and returning any type of the same name.
    pub fn register(&mut self, node_type: impl NodeType + 'static) -> Option<Arc<dyn NodeType>> {
        let name = node_type.type_name().to_string();
        log::debug!("Registered node type '{name}'");
        self.types.insert(name, Arc::new(node_type))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn NodeType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| PrismError::UnknownNodeType(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    impl NodeType for Marker {
        fn type_name(&self) -> &str {
            "marker"
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = NodeTypeRegistry::with_builtins();
        for name in [
            "node", "rotate", "translate", "scale", "matrix", "quaternion", "lookAt", "camera",
            "material", "texture", "regionMap", "clips", "flags", "enable", "layer", "stage", "tag",
            "name", "shader", "shaderParams", "lights", "colorTarget", "depthTarget", "depthBuffer",
            "colorBuffer", "stencilBuffer", "geometry", "geometry/box", "geometry/quad",
            "geometry/sphere", "instance",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn unknown_types_fail_and_custom_types_register() {
        let mut registry = NodeTypeRegistry::empty();
        assert!(matches!(registry.get("marker"), Err(PrismError::UnknownNodeType(_))));
        assert!(registry.register(Marker).is_none());
        let marker = registry.get("marker").unwrap();
        assert_eq!(marker.compile_mode(), CompileMode::Group);
        assert!(registry.register(Marker).is_some());
    }

    #[test]
    fn dirty_levels_order_by_cost() {
        assert!(DirtyLevel::Image < DirtyLevel::DrawList);
        assert!(DirtyLevel::DrawList < DirtyLevel::StateOrder);
        assert!(DirtyLevel::StateOrder < DirtyLevel::Recompile);
        assert_eq!(DirtyLevel::Image.max(DirtyLevel::StateOrder), DirtyLevel::StateOrder);
    }
}
