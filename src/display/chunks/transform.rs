use super::{ChunkEnv, ChunkState, set_uniform};
use crate::display::frame::FrameContext;
use crate::gpu::{GpuContext, GpuProgram, UniformLocation, UniformValue, names};
use crate::state::CoreHandle;

#[derive(Debug, Clone, Default)]
pub struct ModelLocations {
    matrix: Option<UniformLocation>,
    normal_matrix: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct ViewLocations {
    matrix: Option<UniformLocation>,
    normal_matrix: Option<UniformLocation>,
    eye: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectionLocations {
    matrix: Option<UniformLocation>,
    near: Option<UniformLocation>,
    far: Option<UniformLocation>,
}

pub(super) fn build_model(gpu: &mut dyn GpuContext, program: GpuProgram, pick: bool) -> ChunkState {
    ChunkState::Transform(ModelLocations {
        matrix: gpu.uniform_location(program, names::MODEL_MATRIX),
        normal_matrix: (!pick)
            .then(|| gpu.uniform_location(program, names::MODEL_NORMAL_MATRIX))
            .flatten(),
    })
}

pub(super) fn build_view(gpu: &mut dyn GpuContext, program: GpuProgram, pick: bool) -> ChunkState {
    let mut locations = ViewLocations {
        matrix: gpu.uniform_location(program, names::VIEW_MATRIX),
        ..ViewLocations::default()
    };
    if !pick {
        locations.normal_matrix = gpu.uniform_location(program, names::VIEW_NORMAL_MATRIX);
        locations.eye = gpu.uniform_location(program, names::WORLD_EYE);
    }
    ChunkState::View(locations)
}

pub(super) fn build_projection(gpu: &mut dyn GpuContext, program: GpuProgram) -> ChunkState {
    ChunkState::Projection(ProjectionLocations {
        matrix: gpu.uniform_location(program, names::PROJ_MATRIX),
        near: gpu.uniform_location(program, names::Z_NEAR),
        far: gpu.uniform_location(program, names::Z_FAR),
    })
}

pub(super) fn apply_model(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    locations: &ModelLocations,
) {
    let Some(transform) = core.and_then(|h| env.cores.transform(h)) else {
        return;
    };
    set_uniform(env.gpu, locations.matrix, UniformValue::Mat4(transform.world_matrix));
    set_uniform(
        env.gpu,
        locations.normal_matrix,
        UniformValue::Mat4(transform.normal_matrix),
    );
}

pub(super) fn apply_view(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &ViewLocations,
) {
    let Some(view) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.view()) else {
        return;
    };
    frame.view_matrix = view.matrix;
    set_uniform(env.gpu, locations.matrix, UniformValue::Mat4(view.matrix));
    set_uniform(env.gpu, locations.normal_matrix, UniformValue::Mat4(view.normal_matrix));
    set_uniform(env.gpu, locations.eye, UniformValue::Vec3(view.eye));
}

pub(super) fn apply_projection(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &FrameContext,
    locations: &ProjectionLocations,
) {
    let Some(projection) = core
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.projection())
    else {
        return;
    };
    let optics = &projection.optics;
    set_uniform(
        env.gpu,
        locations.matrix,
        UniformValue::Mat4(optics.matrix(frame.aspect)),
    );
    set_uniform(env.gpu, locations.near, UniformValue::Float(optics.near));
    set_uniform(env.gpu, locations.far, UniformValue::Float(optics.far));
}
