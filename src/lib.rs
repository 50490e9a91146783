#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod display;
pub mod engine;
pub mod errors;
pub mod events;
pub mod gpu;
pub mod primitives;
pub mod scene;
pub mod state;
pub mod status;

pub use config::EngineConfig;
pub use display::{Display, DisplayDirty, PickBufferPolicy, PickHit, PickOptions};
pub use engine::Engine;
pub use errors::{ErrorReport, PrismError, Result};
pub use events::{EngineEvent, EventBus, Subscription};
pub use gpu::{GpuContext, HeadlessGpu, TextureImage};
pub use scene::{
    AssetLoader, LoadRequest, LoadSender, LoadedAsset, Node, NodeConfig, NodeHandle, NodeType,
    NodeTypeRegistry, Scene, SceneNode,
};
pub use state::{CoreFactory, CoreHandle, CoreKind};
pub use status::{Status, TaskId};
