//! Scene Graph
//!
//! The declarative tree and its compile traversal:
//!
//! - [`NodeConfig`]: JSON node descriptions
//! - [`NodeType`] / [`NodeTypeRegistry`]: what each type name means
//! - [`Node`] / [`Scene`]: the live tree, its cores, setters and getters
//! - [`CompileContext`]: per-traversal state stacks
//! - [`SceneNode`]: chainable typed setters
//! - [`loader`]: asynchronous asset loads

pub mod compile;
pub mod config;
pub mod loader;
pub mod node;
pub mod node_type;
pub mod scene;
pub mod types;
pub mod wrapper;

pub use compile::CompileContext;
pub use config::NodeConfig;
pub use loader::{AssetLoader, LoadRequest, LoadResult, LoadSender, LoadedAsset, NullLoader};
pub use node::Node;
pub use node_type::{CompileMode, DirtyLevel, NodeType, NodeTypeRegistry};
pub use scene::{PendingChanges, Scene};
pub use wrapper::SceneNode;

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a node in a [`Scene`].
    pub struct NodeHandle;
}
