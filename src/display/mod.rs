//! Display
//!
//! Everything between compiled scene state and GPU calls:
//!
//! - [`program_source`] generates GLSL for a program hash
//! - [`program`] compiles and shares programs
//! - [`chunks`] wrap one core's GPU effect against one program
//! - [`object`] holds the chunks for one geometry leaf
//! - [`list`] sorts objects into the draw and pick lists and runs them

pub mod chunks;
pub mod frame;
pub mod list;
pub mod object;
pub mod pick;
pub mod program;
pub mod program_source;

pub use chunks::{ChunkHandle, ChunkKind};
pub use frame::{FrameContext, PickMode};
pub use list::{Display, DisplayDirty, DisplayStats, DrawStep, PickBufferPolicy};
pub use object::{DisplayObject, ObjectKey, ObjectMeta, ObjectStates, SortKey};
pub use pick::{PickHit, PickOptions, RegionHit, TriangleHit};
pub use program::{Program, ProgramFactory, ProgramHandle};
pub use program_source::{ProgramSource, ProgramSourceFactory};
