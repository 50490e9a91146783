//! Display objects: one per geometry leaf (and instance placement) reached
//! during compile.

use slotmap::new_key_type;
use smallvec::SmallVec;

use super::chunks::{ChunkHandle, ChunkKind};
use super::program::ProgramHandle;
use crate::scene::NodeHandle;
use crate::state::{CoreHandle, CoreKind};

new_key_type! {
    /// Handle to a [`DisplayObject`] in the display.
    pub struct ObjectHandle;
}

/// Identifies an object across recompiles: the geometry node and, inside
/// `instance` placements, which placement it was reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub node: NodeHandle,
    pub placement: u64,
}

impl ObjectKey {
    #[must_use]
    pub fn new(node: NodeHandle, placement: u64) -> Self {
        Self { node, placement }
    }
}

/// The cores active at a geometry leaf: the top of every stack, plus the
/// whole shader and shader-parameter stacks, which compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStates {
    cores: [CoreHandle; CoreKind::COUNT],
    pub shaders: SmallVec<[CoreHandle; 2]>,
    pub shader_params: SmallVec<[CoreHandle; 2]>,
}

impl ObjectStates {
    #[must_use]
    pub fn new(cores: [CoreHandle; CoreKind::COUNT]) -> Self {
        Self {
            cores,
            shaders: SmallVec::new(),
            shader_params: SmallVec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn core(&self, kind: CoreKind) -> CoreHandle {
        self.cores[kind.index()]
    }

    #[inline]
    pub fn set_core(&mut self, kind: CoreKind, core: CoreHandle) {
        self.cores[kind.index()] = core;
    }

    /// Every distinct core referenced, for GPU uploads.
    pub fn all_cores(&self) -> impl Iterator<Item = CoreHandle> + '_ {
        self.cores
            .iter()
            .chain(&self.shaders)
            .chain(&self.shader_params)
            .copied()
    }
}

/// Naming of an object for pick hits and listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// ID of the geometry node.
    pub node_id: String,
    /// `name` nodes from the root down.
    pub path: Vec<String>,
}

impl ObjectMeta {
    /// Innermost name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }
}

/// One geometry leaf's render recipe.
#[derive(Debug, Clone)]
pub struct DisplayObject {
    pub key: ObjectKey,
    pub states: ObjectStates,
    pub meta: ObjectMeta,
    pub program: ProgramHandle,
    pub program_hash: String,
    /// Chunks by slot; `None` where the core is a no-op.
    pub chunks: [Option<ChunkHandle>; ChunkKind::SLOTS],
    pub render_target: Option<ChunkHandle>,
    pub sort_key: SortKey,
    /// Compile order, the sort tie-break.
    pub seq: u64,
}

impl DisplayObject {
    #[inline]
    #[must_use]
    pub fn chunk(&self, kind: ChunkKind) -> Option<ChunkHandle> {
        self.chunks.get(kind.order()).copied().flatten()
    }

    /// Chunks in slot order.
    pub fn chunk_handles(&self) -> impl Iterator<Item = ChunkHandle> + '_ {
        self.chunks.iter().flatten().copied()
    }
}

/// Draw order of an object. Fields compare in declaration order, so stage
/// wins over pass, pass over layer, and so on down to the texture state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub stage: i64,
    /// 0 for opaque objects, 1 for transparent ones.
    pub pass: u8,
    pub layer: i64,
    pub program: u32,
    /// State ID of the texture core, 0 when untextured.
    pub texture: u64,
}

impl SortKey {
    #[must_use]
    pub fn new(stage: i64, transparent: bool, layer: i64, program: u32, texture: u64) -> Self {
        Self {
            stage,
            pass: u8::from(transparent),
            layer,
            program,
            texture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_orders_stage_before_layer_before_program() {
        assert!(SortKey::new(1, false, 0, 0, 0) > SortKey::new(0, true, 50, 90, 900));
        assert!(SortKey::new(0, true, 0, 0, 0) > SortKey::new(0, false, 50, 90, 900));
        assert!(SortKey::new(0, false, 1, 0, 0) > SortKey::new(0, false, 0, 90, 900));
        assert!(SortKey::new(0, false, 0, 1, 0) > SortKey::new(0, false, 0, 0, 900));
        assert!(SortKey::new(0, false, 0, 0, 8) > SortKey::new(0, false, 0, 0, 7));
    }

    #[test]
    fn sort_key_fields_do_not_spill_into_each_other() {
        assert!(SortKey::new(0, false, 0, 1, 0) > SortKey::new(0, false, 0, 0, 5_000));
        assert!(SortKey::new(0, false, 1, 0, 0) > SortKey::new(0, false, 0, u32::MAX, u64::MAX));
        assert!(SortKey::new(10_000_000, false, 0, 0, 0) > SortKey::new(9_999_999, true, 0, 0, 0));
        assert!(SortKey::new(i64::MIN, true, i64::MAX, 0, 0) < SortKey::new(i64::MAX, false, i64::MIN, 0, 0));
        assert!(SortKey::new(-3, false, 0, 0, 0) < SortKey::new(0, false, -3, 0, 0));
    }
}
