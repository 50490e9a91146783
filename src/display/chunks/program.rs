//! Pass control chunks: program binding, draw calls, render target
//! switches and render listeners.

use glam::Vec3;

use super::{Chunk, ChunkEnv, ChunkState, set_uniform};
use crate::display::frame::{FrameContext, PickMode};
use crate::errors::{PrismError, Result};
use crate::gpu::{
    ClearMask, GpuContext, GpuProgram, UniformLocation, UniformValue, encode_index, names,
};
use crate::state::CoreHandle;

#[derive(Debug, Clone, Default)]
pub struct ProgramLocations {
    pick_mode: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct DrawLocations {
    pick_color: Option<UniformLocation>,
}

pub(super) fn build_program(
    gpu: &mut dyn GpuContext,
    program: GpuProgram,
    pick: bool,
) -> ChunkState {
    ChunkState::Program(ProgramLocations {
        pick_mode: pick
            .then(|| gpu.uniform_location(program, names::PICK_MODE))
            .flatten(),
    })
}

pub(super) fn build_draw(gpu: &mut dyn GpuContext, program: GpuProgram, pick: bool) -> ChunkState {
    ChunkState::Draw(DrawLocations {
        pick_color: pick
            .then(|| gpu.uniform_location(program, names::PICK_COLOR))
            .flatten(),
    })
}

pub(super) fn apply_program(
    chunk: &Chunk,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &ProgramLocations,
    pick: bool,
) -> Result<()> {
    let handle = chunk.program.ok_or(PrismError::ContextLost)?;
    let program = env.programs.get(handle).ok_or(PrismError::ContextLost)?;
    let gpu_program = if pick { program.pick } else { program.draw };
    let gpu_program = gpu_program.ok_or(PrismError::ContextLost)?;

    env.gpu.use_program(gpu_program)?;
    frame.program = Some(handle);
    frame.texture_unit = 0;

    if let Some(mode) = frame.pick_mode {
        set_uniform(env.gpu, locations.pick_mode, UniformValue::Int(mode.uniform()));
    }
    Ok(())
}

pub(super) fn apply_draw(
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &DrawLocations,
    pick: bool,
) -> Result<()> {
    if pick && frame.pick_mode == Some(PickMode::Object) {
        let [r, g, b] = encode_index(frame.pick_index + 1);
        let color = Vec3::new(f32::from(r), f32::from(g), f32::from(b)) / 255.0;
        set_uniform(env.gpu, locations.pick_color, UniformValue::Vec3(color));
        frame.pick_index += 1;
    }

    let Some(geometry) = frame
        .geometry
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.geometry())
    else {
        return Ok(());
    };
    let Some(buffers) = geometry.buffers() else {
        return Ok(());
    };

    let primitive = geometry.data.primitive;
    match buffers.index {
        Some(index) => {
            let count = geometry.data.element_count() as u32;
            env.gpu.draw_elements(primitive, index, count)?;
        }
        None => {
            let count = geometry.data.vertex_count() as u32;
            env.gpu.draw_arrays(primitive, count)?;
        }
    }
    Ok(())
}

/// Binds the target's buffer and clears it, or with no core, returns to the
/// default framebuffer.
pub(super) fn apply_render_target(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
) -> Result<()> {
    let target = core
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.render_target())
        .and_then(|t| t.buffer());

    match target {
        Some(buffer) => {
            env.gpu.finish();
            env.gpu.bind_render_buffer(None);
            env.gpu.bind_render_buffer(Some(buffer.framebuffer));
            env.gpu.set_viewport(buffer.width, buffer.height);
            env.gpu.clear([0.0; 4], ClearMask::COLOR | ClearMask::DEPTH);
            frame.render_buffer = Some(buffer.framebuffer);
        }
        None => {
            if frame.render_buffer.take().is_some() {
                env.gpu.finish();
                env.gpu.bind_render_buffer(None);
                let (width, height) = env.gpu.drawing_buffer_size();
                env.gpu.set_viewport(width, height);
            }
        }
    }
    Ok(())
}

pub(super) fn apply_listeners(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
) {
    if frame.picking() {
        return;
    }
    if let Some(listeners) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.listeners()) {
        frame.rendered_nodes.push(listeners.node_id.clone());
    }
}
