use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::scene::NodeHandle;
use crate::scene::node_type::NodeType;
use crate::state::CoreHandle;

/// One vertex of the scene tree.
///
/// A node owns its children and refers to its core by handle; the core
/// itself lives in the scene's [`CoreFactory`](crate::state::CoreFactory)
/// and may be shared with other nodes through a `coreId`.
pub struct Node {
    pub(crate) id: String,
    pub(crate) node_type: Arc<dyn NodeType>,
    pub(crate) core: Option<CoreHandle>,

    // === Hierarchy ===
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,

    /// Params of core-less types (e.g. the `instance` target).
    pub(crate) params: Map<String, Value>,
    /// Listeners core, created on the first render listener.
    pub(crate) listeners: Option<CoreHandle>,
    /// Queued for destruction at the next compile.
    pub(crate) destroyed: bool,
}

impl Node {
    pub(crate) fn new(
        id: String,
        node_type: Arc<dyn NodeType>,
        core: Option<CoreHandle>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            node_type,
            core,
            parent: None,
            children: Vec::new(),
            params,
            listeners: None,
            destroyed: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.node_type.type_name()
    }

    #[inline]
    #[must_use]
    pub fn node_type(&self) -> &Arc<dyn NodeType> {
        &self.node_type
    }

    /// Handle of the node's core; `None` for groups and instances.
    #[inline]
    #[must_use]
    pub fn core(&self) -> Option<CoreHandle> {
        self.core
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type", &self.type_name())
            .field("core", &self.core)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
