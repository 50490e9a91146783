//! State Chunks
//!
//! A chunk applies one category of state for one display object, against
//! one program. Chunks are shared: two objects that would apply the same
//! cores to the same program get the same chunk, identified by a string ID
//! built from the slot order, the program ID and the cores' state IDs.
//!
//! Chunks resolve their uniform and attribute locations once, when they are
//! built against a program, and again after a context restore. Applying a
//! chunk only touches fixed-function state that differs from the
//! [`FrameContext`].
//!
//! | Slot | Kind            | Pick pass |
//! |------|-----------------|-----------|
//! | 0    | `Program`       | yes       |
//! | 1    | `Transform`     | yes       |
//! | 2    | `ViewTransform` | yes       |
//! | 3    | `Projection`    | yes       |
//! | 4    | `Flags`         | yes       |
//! | 5    | `Shader`        | yes       |
//! | 6    | `ShaderParams`  | yes       |
//! | 7    | `DepthBuffer`   | yes       |
//! | 8    | `ColorBuffer`   |           |
//! | 9    | `StencilBuffer` |           |
//! | 10   | `Lights`        |           |
//! | 11   | `Material`      |           |
//! | 12   | `Texture`       |           |
//! | 13   | `RegionMap`     | yes       |
//! | 14   | `Clips`         | yes       |
//! | 15   | `Geometry`      | yes       |
//! | 16   | `Listeners`     |           |
//! | 17   | `Draw`          | yes       |
//!
//! Render target chunks have no slot; the display inserts them between
//! object runs in the draw list.

mod geometry;
mod material;
mod program;
mod shader;
mod state;
mod transform;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use super::frame::FrameContext;
use super::program::{ProgramFactory, ProgramHandle};
use crate::errors::Result;
use crate::gpu::{GpuContext, GpuProgram, UniformLocation, UniformValue};
use crate::state::{CoreFactory, CoreHandle, CoreKind};

new_key_type! {
    /// Handle to a [`Chunk`] in the [`ChunkFactory`].
    pub struct ChunkHandle;
}

/// Category of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Program,
    Transform,
    ViewTransform,
    Projection,
    Flags,
    Shader,
    ShaderParams,
    DepthBuffer,
    ColorBuffer,
    StencilBuffer,
    Lights,
    Material,
    Texture,
    RegionMap,
    Clips,
    Geometry,
    Listeners,
    Draw,
    RenderTarget,
}

impl ChunkKind {
    /// Number of per-object slots. Render targets have none.
    pub const SLOTS: usize = 18;

    /// Kinds in slot order.
    pub const SLOTTED: [Self; Self::SLOTS] = [
        Self::Program,
        Self::Transform,
        Self::ViewTransform,
        Self::Projection,
        Self::Flags,
        Self::Shader,
        Self::ShaderParams,
        Self::DepthBuffer,
        Self::ColorBuffer,
        Self::StencilBuffer,
        Self::Lights,
        Self::Material,
        Self::Texture,
        Self::RegionMap,
        Self::Clips,
        Self::Geometry,
        Self::Listeners,
        Self::Draw,
    ];

    #[inline]
    #[must_use]
    pub fn order(self) -> usize {
        self as usize
    }

    /// Chunks whose effect does not depend on the bound program. Their IDs
    /// leave the program out, so runs of them survive program switches.
    #[must_use]
    pub fn is_global(self) -> bool {
        matches!(
            self,
            Self::RenderTarget
                | Self::DepthBuffer
                | Self::ColorBuffer
                | Self::StencilBuffer
                | Self::Listeners
        )
    }

    /// Never dropped from a run of identical chunks.
    #[inline]
    #[must_use]
    pub fn is_unique(self) -> bool {
        self == Self::Draw
    }

    /// Whether the chunk takes part in pick passes.
    #[must_use]
    pub fn picks(self) -> bool {
        matches!(
            self,
            Self::Program
                | Self::Transform
                | Self::ViewTransform
                | Self::Projection
                | Self::Flags
                | Self::Shader
                | Self::ShaderParams
                | Self::DepthBuffer
                | Self::RegionMap
                | Self::Clips
                | Self::Geometry
                | Self::Draw
        )
    }

    /// Core category whose stack feeds this slot.
    #[must_use]
    pub fn core_kind(self) -> Option<CoreKind> {
        let kind = match self {
            Self::Program => return None,
            Self::Transform => CoreKind::Transform,
            Self::ViewTransform => CoreKind::ViewTransform,
            Self::Projection => CoreKind::Projection,
            Self::Flags => CoreKind::Flags,
            Self::Shader => CoreKind::Shader,
            Self::ShaderParams => CoreKind::ShaderParams,
            Self::DepthBuffer => CoreKind::DepthBuffer,
            Self::ColorBuffer => CoreKind::ColorBuffer,
            Self::StencilBuffer => CoreKind::StencilBuffer,
            Self::Lights => CoreKind::Lights,
            Self::Material => CoreKind::Material,
            Self::Texture => CoreKind::Texture,
            Self::RegionMap => CoreKind::RegionMap,
            Self::Clips => CoreKind::Clips,
            Self::Geometry | Self::Draw => CoreKind::Geometry,
            Self::Listeners => CoreKind::Listeners,
            Self::RenderTarget => CoreKind::RenderTarget,
        };
        Some(kind)
    }

    /// `{order}__p{program}_{stateIds}`, or `{order}___{stateIds}` for
    /// global kinds.
    #[must_use]
    pub fn chunk_id(self, program_id: u32, state_ids: &[u64]) -> String {
        let states = state_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("__");
        if self.is_global() {
            format!("{}___{states}", self.order())
        } else if state_ids.is_empty() {
            format!("{}__p{program_id}", self.order())
        } else {
            format!("{}__p{program_id}_{states}", self.order())
        }
    }
}

/// Locations a chunk resolved against one program.
#[derive(Debug, Clone, Default)]
pub enum ChunkState {
    #[default]
    Empty,
    Program(program::ProgramLocations),
    Draw(program::DrawLocations),
    Transform(transform::ModelLocations),
    View(transform::ViewLocations),
    Projection(transform::ProjectionLocations),
    Flags(state::FlagsLocations),
    Params(shader::ParamLocations),
    Clips(shader::ClipLocations),
    Lights(material::LightLocations),
    Material(material::MaterialLocations),
    Texture(material::TextureLocations),
    RegionMap(material::RegionLocations),
    Geometry(geometry::AttributeLocations),
}

/// What chunks need while being applied.
pub struct ChunkEnv<'a> {
    pub gpu: &'a mut dyn GpuContext,
    pub cores: &'a CoreFactory,
    pub programs: &'a ProgramFactory,
}

/// One shared state applier.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub kind: ChunkKind,
    pub program: Option<ProgramHandle>,
    pub cores: SmallVec<[CoreHandle; 2]>,
    pub use_count: u32,
    draw_state: ChunkState,
    pick_state: ChunkState,
}

impl Chunk {
    /// Resolves locations against the chunk's draw and pick programs.
    pub fn build(
        &mut self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        programs: &ProgramFactory,
    ) {
        let program = self.program.and_then(|h| programs.get(h));
        let (draw, pick) = program.map_or((None, None), |p| (p.draw, p.pick));
        self.draw_state = draw.map(|p| self.resolve(gpu, cores, p, false)).unwrap_or_default();
        self.pick_state = match pick {
            Some(p) if self.kind.picks() => self.resolve(gpu, cores, p, true),
            _ => ChunkState::Empty,
        };
    }

    fn resolve(
        &self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        program: GpuProgram,
        pick: bool,
    ) -> ChunkState {
        match self.kind {
            ChunkKind::Program => program::build_program(gpu, program, pick),
            ChunkKind::Draw => program::build_draw(gpu, program, pick),
            ChunkKind::Transform => transform::build_model(gpu, program, pick),
            ChunkKind::ViewTransform => transform::build_view(gpu, program, pick),
            ChunkKind::Projection => transform::build_projection(gpu, program),
            ChunkKind::Flags => state::build_flags(gpu, program, pick),
            ChunkKind::Shader | ChunkKind::ShaderParams => {
                shader::build_params(gpu, program, cores, &self.cores)
            }
            ChunkKind::Clips => shader::build_clips(gpu, program, cores, &self.cores),
            ChunkKind::Lights => material::build_lights(gpu, program, cores, &self.cores),
            ChunkKind::Material => material::build_material(gpu, program),
            ChunkKind::Texture => material::build_texture(gpu, program, cores, &self.cores),
            ChunkKind::RegionMap => material::build_region_map(gpu, program),
            ChunkKind::Geometry => geometry::build_attributes(gpu, program),
            ChunkKind::DepthBuffer
            | ChunkKind::ColorBuffer
            | ChunkKind::StencilBuffer
            | ChunkKind::Listeners
            | ChunkKind::RenderTarget => ChunkState::Empty,
        }
    }

    pub fn draw(&self, env: &mut ChunkEnv<'_>, frame: &mut FrameContext) -> Result<()> {
        self.apply(env, frame, &self.draw_state, false)
    }

    pub fn pick(&self, env: &mut ChunkEnv<'_>, frame: &mut FrameContext) -> Result<()> {
        if !self.kind.picks() {
            return Ok(());
        }
        self.apply(env, frame, &self.pick_state, true)
    }

    fn apply(
        &self,
        env: &mut ChunkEnv<'_>,
        frame: &mut FrameContext,
        locations: &ChunkState,
        pick: bool,
    ) -> Result<()> {
        let core = self.cores.first().copied();
        match (self.kind, locations) {
            (ChunkKind::Program, ChunkState::Program(l)) => {
                program::apply_program(self, env, frame, l, pick)
            }
            (ChunkKind::Draw, ChunkState::Draw(l)) => program::apply_draw(env, frame, l, pick),
            (ChunkKind::RenderTarget, _) => program::apply_render_target(core, env, frame),
            (ChunkKind::Listeners, _) => {
                program::apply_listeners(core, env, frame);
                Ok(())
            }
            (ChunkKind::Transform, ChunkState::Transform(l)) => {
                transform::apply_model(core, env, l);
                Ok(())
            }
            (ChunkKind::ViewTransform, ChunkState::View(l)) => {
                transform::apply_view(core, env, frame, l);
                Ok(())
            }
            (ChunkKind::Projection, ChunkState::Projection(l)) => {
                transform::apply_projection(core, env, frame, l);
                Ok(())
            }
            (ChunkKind::Flags, ChunkState::Flags(l)) => {
                state::apply_flags(core, env, frame, l, pick);
                Ok(())
            }
            (ChunkKind::DepthBuffer, _) => {
                state::apply_depth_buffer(core, env, frame);
                Ok(())
            }
            (ChunkKind::ColorBuffer, _) => {
                state::apply_color_buffer(core, env, frame);
                Ok(())
            }
            (ChunkKind::StencilBuffer, _) => {
                state::apply_stencil_buffer(core, env, frame);
                Ok(())
            }
            (ChunkKind::Shader | ChunkKind::ShaderParams, ChunkState::Params(l)) => {
                shader::apply_params(&self.cores, env, l);
                Ok(())
            }
            (ChunkKind::Clips, ChunkState::Clips(l)) => {
                shader::apply_clips(core, env, l);
                Ok(())
            }
            (ChunkKind::Lights, ChunkState::Lights(l)) => {
                material::apply_lights(core, env, frame, l);
                Ok(())
            }
            (ChunkKind::Material, ChunkState::Material(l)) => {
                material::apply_material(core, env, l);
                Ok(())
            }
            (ChunkKind::Texture, ChunkState::Texture(l)) => {
                material::apply_texture(core, env, frame, l);
                Ok(())
            }
            (ChunkKind::RegionMap, ChunkState::RegionMap(l)) => {
                material::apply_region_map(core, env, frame, l, pick);
                Ok(())
            }
            (ChunkKind::Geometry, ChunkState::Geometry(l)) => {
                geometry::apply_attributes(core, env, frame, l);
                Ok(())
            }
            // Not built against a live program.
            _ => Ok(()),
        }
    }
}

/// Returns to the default framebuffer after a run of render target bins.
pub fn unbind_render_target(env: &mut ChunkEnv<'_>, frame: &mut FrameContext) -> Result<()> {
    program::apply_render_target(None, env, frame)
}

/// Sets a uniform the program declares; a missing location is a no-op.
fn set_uniform(gpu: &mut dyn GpuContext, location: Option<UniformLocation>, value: UniformValue) {
    if let Some(location) = location {
        gpu.set_uniform(location, value);
    }
}

// ============================================================================
// Chunk Factory
// ============================================================================

/// Shares chunks by ID and counts their users.
#[derive(Default)]
pub struct ChunkFactory {
    chunks: SlotMap<ChunkHandle, Chunk>,
    by_id: FxHashMap<String, ChunkHandle>,
}

impl ChunkFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the chunk registered under `id` with its use count bumped,
    /// or builds a new one.
    pub fn get_chunk(
        &mut self,
        id: String,
        kind: ChunkKind,
        program: Option<ProgramHandle>,
        cores: SmallVec<[CoreHandle; 2]>,
        env: &mut ChunkEnv<'_>,
    ) -> ChunkHandle {
        if let Some(&handle) = self.by_id.get(&id)
            && let Some(chunk) = self.chunks.get_mut(handle)
        {
            chunk.use_count += 1;
            return handle;
        }
        let mut chunk = Chunk {
            id: id.clone(),
            kind,
            program,
            cores,
            use_count: 1,
            draw_state: ChunkState::Empty,
            pick_state: ChunkState::Empty,
        };
        chunk.build(env.gpu, env.cores, env.programs);
        let handle = self.chunks.insert(chunk);
        self.by_id.insert(id, handle);
        handle
    }

    pub fn put_chunk(&mut self, handle: ChunkHandle) {
        let Some(chunk) = self.chunks.get_mut(handle) else {
            return;
        };
        chunk.use_count = chunk.use_count.saturating_sub(1);
        if chunk.use_count == 0
            && let Some(chunk) = self.chunks.remove(handle)
        {
            self.by_id.remove(&chunk.id);
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: ChunkHandle) -> Option<&Chunk> {
        self.chunks.get(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Re-resolves every chunk's locations against the rebuilt programs.
    pub fn webgl_restored(
        &mut self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        programs: &ProgramFactory,
    ) {
        for chunk in self.chunks.values_mut() {
            chunk.build(gpu, cores, programs);
        }
    }

    /// Re-resolves the chunks of one kind, e.g. after a core's uniform
    /// count changed without changing the program.
    pub fn rebuild_kind(
        &mut self,
        kind: ChunkKind,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        programs: &ProgramFactory,
    ) {
        for chunk in self.chunks.values_mut().filter(|c| c.kind == kind) {
            chunk.build(gpu, cores, programs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_encode_slot_program_and_states() {
        assert_eq!(ChunkKind::Program.chunk_id(3, &[]), "0__p3");
        assert_eq!(ChunkKind::Material.chunk_id(3, &[12]), "11__p3_12");
        assert_eq!(ChunkKind::Shader.chunk_id(0, &[4, 9]), "5__p0_4__9");
        assert_eq!(ChunkKind::DepthBuffer.chunk_id(3, &[7]), "7___7");
        assert_eq!(ChunkKind::DepthBuffer.chunk_id(5, &[7]), "7___7");
    }

    #[test]
    fn slot_order_matches_declaration() {
        for (i, kind) in ChunkKind::SLOTTED.into_iter().enumerate() {
            assert_eq!(kind.order(), i);
        }
        assert!(ChunkKind::Draw.is_unique());
        assert!(!ChunkKind::Material.picks());
        assert!(ChunkKind::Clips.picks());
    }
}
