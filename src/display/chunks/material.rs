//! Surface chunks: material colours, lights, texture layers and region maps.

use glam::Vec3;

use super::{ChunkEnv, ChunkState, set_uniform};
use crate::display::frame::{FrameContext, PickMode};
use crate::gpu::{GpuContext, GpuProgram, GpuTexture, UniformLocation, UniformValue, names};
use crate::state::{CoreFactory, CoreHandle, LightMode, LightSpace, TextureLayer};

#[derive(Debug, Clone, Default)]
pub struct MaterialLocations {
    base_color: Option<UniformLocation>,
    specular_color: Option<UniformLocation>,
    specular: Option<UniformLocation>,
    shine: Option<UniformLocation>,
    emit: Option<UniformLocation>,
    alpha: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
struct LightSlot {
    color: Option<UniformLocation>,
    dir: Option<UniformLocation>,
    pos: Option<UniformLocation>,
    attenuation: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct LightLocations {
    ambient: Option<UniformLocation>,
    lights: Vec<LightSlot>,
}

#[derive(Debug, Clone, Default)]
struct LayerSlot {
    sampler: Option<UniformLocation>,
    matrix: Option<UniformLocation>,
    blend_factor: Option<UniformLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct TextureLocations {
    layers: Vec<LayerSlot>,
}

#[derive(Debug, Clone, Default)]
pub struct RegionLocations {
    sampler: Option<UniformLocation>,
    highlight_color: Option<UniformLocation>,
    highlight_factor: Option<UniformLocation>,
}

pub(super) fn build_material(gpu: &mut dyn GpuContext, program: GpuProgram) -> ChunkState {
    ChunkState::Material(MaterialLocations {
        base_color: gpu.uniform_location(program, names::MATERIAL_BASE_COLOR),
        specular_color: gpu.uniform_location(program, names::MATERIAL_SPECULAR_COLOR),
        specular: gpu.uniform_location(program, names::MATERIAL_SPECULAR),
        shine: gpu.uniform_location(program, names::MATERIAL_SHINE),
        emit: gpu.uniform_location(program, names::MATERIAL_EMIT),
        alpha: gpu.uniform_location(program, names::MATERIAL_ALPHA),
    })
}

pub(super) fn build_lights(
    gpu: &mut dyn GpuContext,
    program: GpuProgram,
    cores: &CoreFactory,
    handles: &[CoreHandle],
) -> ChunkState {
    let count = handles
        .first()
        .and_then(|&h| cores.payload(h))
        .and_then(|p| p.lights())
        .map_or(0, |l| l.lights.len());
    let lights = (0..count)
        .map(|i| LightSlot {
            color: gpu.uniform_location(program, &names::light_color(i)),
            dir: gpu.uniform_location(program, &names::light_dir(i)),
            pos: gpu.uniform_location(program, &names::light_pos(i)),
            attenuation: gpu.uniform_location(program, &names::light_attenuation(i)),
        })
        .collect();
    ChunkState::Lights(LightLocations {
        ambient: gpu.uniform_location(program, names::AMBIENT_COLOR),
        lights,
    })
}

pub(super) fn build_texture(
    gpu: &mut dyn GpuContext,
    program: GpuProgram,
    cores: &CoreFactory,
    handles: &[CoreHandle],
) -> ChunkState {
    let count = handles
        .first()
        .and_then(|&h| cores.payload(h))
        .and_then(|p| p.texture())
        .map_or(0, |t| t.layers.iter().filter(|l| l.is_ready()).count());
    let layers = (0..count)
        .map(|i| LayerSlot {
            sampler: gpu.uniform_location(program, &names::layer_sampler(i)),
            matrix: gpu.uniform_location(program, &names::layer_matrix(i)),
            blend_factor: gpu.uniform_location(program, &names::layer_blend_factor(i)),
        })
        .collect();
    ChunkState::Texture(TextureLocations { layers })
}

pub(super) fn build_region_map(gpu: &mut dyn GpuContext, program: GpuProgram) -> ChunkState {
    ChunkState::RegionMap(RegionLocations {
        sampler: gpu.uniform_location(program, names::REGION_MAP_SAMPLER),
        highlight_color: gpu.uniform_location(program, names::REGION_HIGHLIGHT_COLOR),
        highlight_factor: gpu.uniform_location(program, names::REGION_HIGHLIGHT),
    })
}

pub(super) fn apply_material(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    locations: &MaterialLocations,
) {
    let Some(material) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.material()) else {
        return;
    };
    let gpu = &mut *env.gpu;
    set_uniform(gpu, locations.base_color, UniformValue::Vec3(material.base_color));
    set_uniform(
        gpu,
        locations.specular_color,
        UniformValue::Vec3(material.specular_color),
    );
    set_uniform(gpu, locations.specular, UniformValue::Float(material.specular));
    set_uniform(gpu, locations.shine, UniformValue::Float(material.shine));
    set_uniform(gpu, locations.emit, UniformValue::Float(material.emit));
    set_uniform(gpu, locations.alpha, UniformValue::Float(material.alpha));
}

pub(super) fn apply_lights(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &LightLocations,
) {
    let Some(lights) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.lights()) else {
        return;
    };
    frame.ambient = lights.ambient();
    set_uniform(env.gpu, locations.ambient, UniformValue::Vec3(frame.ambient));

    for (light, slot) in lights.lights.iter().zip(&locations.lights) {
        if light.mode == LightMode::Ambient {
            continue;
        }
        let (dir, pos) = match light.space {
            LightSpace::View => (light.dir, light.pos),
            LightSpace::World => (
                frame.view_matrix.transform_vector3(light.dir),
                frame.view_matrix.transform_point3(light.pos),
            ),
        };
        set_uniform(env.gpu, slot.color, UniformValue::Vec3(light.color));
        match light.mode {
            LightMode::Dir => set_uniform(env.gpu, slot.dir, UniformValue::Vec3(dir)),
            LightMode::Point => {
                set_uniform(env.gpu, slot.pos, UniformValue::Vec3(pos));
                set_uniform(env.gpu, slot.attenuation, UniformValue::Vec3(light.attenuation));
            }
            LightMode::Ambient => {}
        }
    }
}

/// Texture a layer samples: its own upload, or a render target's colour
/// buffer.
fn layer_texture(layer: &TextureLayer, cores: &CoreFactory) -> Option<GpuTexture> {
    match layer.target_core {
        Some(target) => cores
            .payload(target)
            .and_then(|p| p.render_target())
            .and_then(|t| t.buffer())
            .map(|b| b.texture),
        None => layer.gpu_texture(),
    }
}

pub(super) fn apply_texture(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &TextureLocations,
) {
    let Some(texture) = core.and_then(|h| env.cores.payload(h)).and_then(|p| p.texture()) else {
        return;
    };
    frame.texture_unit = 0;
    let ready = texture.layers.iter().filter(|l| l.is_ready());
    for (layer, slot) in ready.zip(&locations.layers) {
        let unit = frame.texture_unit;
        env.gpu.bind_texture(unit, layer_texture(layer, env.cores));
        set_uniform(env.gpu, slot.sampler, UniformValue::Sampler(unit));
        set_uniform(env.gpu, slot.matrix, UniformValue::Mat4(layer.matrix));
        set_uniform(env.gpu, slot.blend_factor, UniformValue::Float(layer.blend_factor));
        frame.texture_unit += 1;
    }
}

pub(super) fn apply_region_map(
    core: Option<CoreHandle>,
    env: &mut ChunkEnv<'_>,
    frame: &mut FrameContext,
    locations: &RegionLocations,
    pick: bool,
) {
    if pick && frame.pick_mode != Some(PickMode::Region) {
        return;
    }
    let Some(region_map) = core
        .and_then(|h| env.cores.payload(h))
        .and_then(|p| p.region_map())
    else {
        return;
    };
    let Some(texture) = region_map.gpu else {
        return;
    };
    let unit = frame.texture_unit;
    env.gpu.bind_texture(unit, Some(texture));
    set_uniform(env.gpu, locations.sampler, UniformValue::Sampler(unit));
    frame.texture_unit += 1;
    if !pick {
        let highlight = region_map.highlight.unwrap_or(Vec3::splat(-1.0));
        let factor = if region_map.highlight.is_some() {
            region_map.highlight_factor
        } else {
            0.0
        };
        set_uniform(env.gpu, locations.highlight_color, UniformValue::Vec3(highlight));
        set_uniform(env.gpu, locations.highlight_factor, UniformValue::Float(factor));
    }
}
