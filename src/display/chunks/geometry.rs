use super::{ChunkEnv, ChunkState};
use crate::display::frame::FrameContext;
use crate::gpu::{AttributeLocation, GpuContext, GpuProgram, names};
use crate::state::CoreHandle;

#[derive(Debug, Clone, Default)]
pub struct AttributeLocations {
    position: Option<AttributeLocation>,
    normal: Option<AttributeLocation>,
    uv: Option<AttributeLocation>,
    uv2: Option<AttributeLocation>,
    color: Option<AttributeLocation>,
}

pub(super) fn build_attributes(gpu: &mut dyn GpuContext, program: GpuProgram) -> ChunkState {
    ChunkState::Geometry(AttributeLocations {
        position: gpu.attribute_location(program, names::POSITION),
        normal: gpu.attribute_location(program, names::NORMAL),
        uv: gpu.attribute_location(program, names::UV),
        uv2: gpu.attribute_location(program, names::UV2),
        color: gpu.attribute_location(program, names::COLOR),
    })
}

pub(super) fn apply_attributes(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &AttributeLocations,
) {
    frame.geometry = core;
    let Some(buffers) = core
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.geometry())
        .and_then(|g| g.buffers())
    else {
        return;
    };
    let attributes = [
        (locations.position, Some(buffers.position), 3),
        (locations.normal, buffers.normal, 3),
        (locations.uv, buffers.uv, 2),
        (locations.uv2, buffers.uv2, 2),
        (locations.color, buffers.color, 4),
    ];
    for (location, buffer, components) in attributes {
        if let (Some(location), Some(buffer)) = (location, buffer) {
            env.gpu.bind_attribute(location, buffer, components);
        }
    }
}
