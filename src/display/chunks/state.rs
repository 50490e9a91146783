//! Fixed-function state chunks.

use super::{ChunkEnv, ChunkState, set_uniform};
use crate::display::frame::FrameContext;
use crate::gpu::{Capability, GpuContext, GpuProgram, UniformLocation, UniformValue, names};
use crate::state::CoreHandle;

#[derive(Debug, Clone, Default)]
pub struct FlagsLocations {
    clipping: Option<UniformLocation>,
    backface_lighting: Option<UniformLocation>,
    backface_texturing: Option<UniformLocation>,
}

pub(super) fn build_flags(gpu: &mut dyn GpuContext, program: GpuProgram, pick: bool) -> ChunkState {
    let mut locations = FlagsLocations {
        clipping: gpu.uniform_location(program, names::CLIPPING),
        ..FlagsLocations::default()
    };
    if !pick {
        locations.backface_lighting = gpu.uniform_location(program, names::BACKFACE_LIGHTING);
        locations.backface_texturing = gpu.uniform_location(program, names::BACKFACE_TEXTURING);
    }
    ChunkState::Flags(locations)
}

pub(super) fn apply_flags(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &FlagsLocations,
    pick: bool,
) {
    let Some(flags) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.flags()) else {
        return;
    };
    let flags = &flags.flags;

    if frame.backfaces != flags.backfaces {
        env.gpu.set_capability(Capability::CullFace, !flags.backfaces);
        frame.backfaces = flags.backfaces;
    }
    if frame.front_face != flags.front_face {
        env.gpu.set_front_face(flags.front_face);
        frame.front_face = flags.front_face;
    }
    if !pick && frame.transparent != flags.transparent {
        env.gpu.set_capability(Capability::Blend, flags.transparent);
        env.gpu.set_depth_mask(!flags.transparent);
        frame.transparent = flags.transparent;
        frame.blend_enabled = flags.transparent;
    }

    set_uniform(env.gpu, locations.clipping, UniformValue::Bool(flags.clipping));
    set_uniform(
        env.gpu,
        locations.backface_lighting,
        UniformValue::Bool(flags.backface_lighting),
    );
    set_uniform(
        env.gpu,
        locations.backface_texturing,
        UniformValue::Bool(flags.backface_texturing),
    );
}

pub(super) fn apply_depth_buffer(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
) {
    let Some(depth) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.depth_buffer()) else {
        return;
    };
    if frame.depth_enabled != depth.enabled {
        env.gpu.set_capability(Capability::DepthTest, depth.enabled);
        frame.depth_enabled = depth.enabled;
    }
    if frame.depth_func != depth.depth_func {
        env.gpu.set_depth_func(depth.depth_func);
        frame.depth_func = depth.depth_func;
    }
    if (frame.clear_depth - depth.clear_depth).abs() > f32::EPSILON {
        env.gpu.set_clear_depth(depth.clear_depth);
        frame.clear_depth = depth.clear_depth;
    }
}

pub(super) fn apply_color_buffer(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
) {
    let Some(color) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.color_buffer()) else {
        return;
    };
    // Transparency already turned blending on.
    let blend = color.blend_enabled || frame.transparent;
    if frame.blend_enabled != blend {
        env.gpu.set_capability(Capability::Blend, blend);
        frame.blend_enabled = blend;
    }
    env.gpu.set_color_mask(color.color_mask);
}

pub(super) fn apply_stencil_buffer(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
) {
    let Some(stencil) = core
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.stencil_buffer())
    else {
        return;
    };
    if frame.stencil_enabled != stencil.enabled {
        env.gpu.set_capability(Capability::StencilTest, stencil.enabled);
        frame.stencil_enabled = stencil.enabled;
    }
    if stencil.enabled {
        env.gpu.set_stencil(stencil.state());
    }
}
