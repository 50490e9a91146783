//! Per-pass scratch state shared by every chunk applied in one pass.

use glam::{Mat4, Vec3};

use crate::gpu::{CompareFunc, FrontFace, GpuRenderBuffer};

use super::program::ProgramHandle;

/// What a pick pass writes into the pick buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PickMode {
    /// One colour-encoded index per object.
    Object,
    /// Colour-encoded primitive index within one object.
    Triangle,
    /// Region map colour.
    Region,
}

impl PickMode {
    /// Value of the `uPickMode` uniform.
    #[must_use]
    pub fn uniform(self) -> i32 {
        match self {
            Self::Object => 0,
            Self::Triangle => 1,
            Self::Region => 2,
        }
    }
}

/// GL state currently bound, tracked so chunks only issue calls that change
/// something.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub program: Option<ProgramHandle>,
    pub render_buffer: Option<GpuRenderBuffer>,
    pub backfaces: bool,
    pub front_face: FrontFace,
    pub blend_enabled: bool,
    pub depth_enabled: bool,
    pub depth_func: CompareFunc,
    pub clear_depth: f32,
    pub stencil_enabled: bool,
    pub line_width: f32,
    pub transparent: bool,
    pub texture_unit: u32,
    pub ambient: Vec3,
    /// View matrix last applied; world-space lights are moved into view
    /// space with it.
    pub view_matrix: Mat4,
    /// Canvas width over height.
    pub aspect: f32,
    /// `None` for a draw pass.
    pub pick_mode: Option<PickMode>,
    /// Next index to encode in an object pick pass.
    pub pick_index: u32,
    /// Geometry core bound by the last geometry chunk, drawn by the draw
    /// chunk.
    pub geometry: Option<crate::state::CoreHandle>,
    /// Listener node IDs reached during a draw pass.
    pub rendered_nodes: Vec<String>,
}

impl FrameContext {
    #[must_use]
    pub fn new(aspect: f32, ambient: Vec3, pick_mode: Option<PickMode>) -> Self {
        Self {
            program: None,
            render_buffer: None,
            backfaces: true,
            front_face: FrontFace::Ccw,
            blend_enabled: false,
            depth_enabled: true,
            depth_func: CompareFunc::Less,
            clear_depth: 1.0,
            stencil_enabled: false,
            line_width: 1.0,
            transparent: false,
            texture_unit: 0,
            ambient,
            view_matrix: Mat4::IDENTITY,
            aspect,
            pick_mode,
            pick_index: 0,
            geometry: None,
            rendered_nodes: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn picking(&self) -> bool {
        self.pick_mode.is_some()
    }
}
