use std::collections::BTreeSet;

use super::{ChunkEnv, ChunkState, set_uniform};
use crate::gpu::{GpuContext, GpuProgram, UniformLocation, UniformValue, names};
use crate::state::{CoreFactory, CoreHandle, CorePayload};

/// Uniform locations of every parameter name the stacked cores set.
#[derive(Debug, Clone, Default)]
pub struct ParamLocations {
    params: Vec<(String, Option<UniformLocation>)>,
}

#[derive(Debug, Clone, Default)]
pub struct ClipLocations {
    clips: Vec<(Option<UniformLocation>, Option<UniformLocation>)>,
}

fn params_of(payload: &CorePayload) -> impl Iterator<Item = (&String, &UniformValue)> {
    let shader = payload.shader().map(|s| &s.params);
    let params = payload.shader_params().map(|s| &s.params);
    shader.into_iter().chain(params).flatten()
}

pub(super) fn build_params(
    gpu: &mut dyn GpuContext,
    program: GpuProgram,
    cores: &CoreFactory,
    handles: &[CoreHandle],
) -> ChunkState {
    let names: BTreeSet<&String> = handles
        .iter()
        .filter_map(|&h| cores.payload(h))
        .flat_map(|p| params_of(p).map(|(name, _)| name))
        .collect();
    let params = names
        .into_iter()
        .map(|name| (name.clone(), gpu.uniform_location(program, name)))
        .collect();
    ChunkState::Params(ParamLocations { params })
}

pub(super) fn build_clips(
    gpu: &mut dyn GpuContext,
    program: GpuProgram,
    cores: &CoreFactory,
    handles: &[CoreHandle],
) -> ChunkState {
    let count = handles
        .first()
        .and_then(|&h| cores.payload(h))
        .and_then(|p| p.clips())
        .map_or(0, |c| c.clips.len());
    let clips = (0..count)
        .map(|i| {
            (
                gpu.uniform_location(program, &names::clip_mode(i)),
                gpu.uniform_location(program, &names::clip_normal_and_dist(i)),
            )
        })
        .collect();
    ChunkState::Clips(ClipLocations { clips })
}

/// Applies the stacked cores bottom-up so inner values win.
pub(super) fn apply_params(
    handles: &[CoreHandle],
    env: &mut ChunkEnv<'_>,
    locations: &ParamLocations,
) {
    for payload in handles.iter().filter_map(|&h| env.cores.payload(h)) {
        for (name, value) in params_of(payload) {
            let location = locations
                .params
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, l)| *l);
            set_uniform(env.gpu, location, *value);
        }
    }
}

pub(super) fn apply_clips(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    locations: &ClipLocations,
) {
    let Some(clips) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.clips()) else {
        return;
    };
    for (clip, (mode, plane)) in clips.clips.iter().zip(&locations.clips) {
        set_uniform(env.gpu, *mode, UniformValue::Float(clip.mode.uniform()));
        set_uniform(env.gpu, *plane, UniformValue::Vec4(clip.normal_and_dist()));
    }
}
