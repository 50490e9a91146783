//! Surface node types: `material`, `texture`, `regionMap` and `lights`.

use std::sync::Arc;

use glam::Vec2;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::errors::{PrismError, Result};
use crate::gpu::{TextureImage, TextureSampling};
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::lights::LightConfig;
use crate::state::texture::LayerConfig;
use crate::state::values::{self, ColorPatch, VecPatch};
use crate::state::{
    CoreKind, CorePayload, LayerSource, Light, LightsCore, MaterialCore, Region, RegionMapCore,
    TextureCore, TextureLayer,
};

// ============================================================================
// material
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MaterialParams {
    base_color: ColorPatch,
    specular_color: ColorPatch,
    specular: Option<f32>,
    shine: Option<f32>,
    alpha: Option<f32>,
    emit: Option<f32>,
}

/// `material {baseColor, specularColor, specular, shine, alpha, emit}`.
pub struct MaterialType;

impl NodeType for MaterialType {
    fn type_name(&self) -> &str {
        "material"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Material)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: MaterialParams = config.parse_params()?;
        let d = MaterialCore::default();
        Ok(CorePayload::Material(MaterialCore {
            base_color: p.base_color.apply(d.base_color),
            specular_color: p.specular_color.apply(d.specular_color),
            specular: p.specular.unwrap_or(d.specular),
            shine: p.shine.unwrap_or(d.shine),
            alpha: p.alpha.unwrap_or(d.alpha),
            emit: p.emit.unwrap_or(d.emit),
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let m = core.material_mut().ok_or_else(|| payload_mismatch("material"))?;
        let what = format!("material.{attr}");
        match attr {
            "baseColor" => m.base_color = ColorPatch::from_json(value)?.apply(m.base_color),
            "specularColor" => {
                m.specular_color = ColorPatch::from_json(value)?.apply(m.specular_color);
            }
            "specular" => m.specular = values::number(value, &what)?,
            "shine" => m.shine = values::number(value, &what)?,
            "alpha" => m.alpha = values::number(value, &what)?,
            "emit" => m.emit = values::number(value, &what)?,
            _ => return Err(unknown_attr("material", attr)),
        }
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let m = core.material().ok_or_else(|| payload_mismatch("material"))?;
        match attr {
            "baseColor" => Ok(values::color_json(m.base_color)),
            "specularColor" => Ok(values::color_json(m.specular_color)),
            "specular" => Ok(json!(m.specular)),
            "shine" => Ok(json!(m.shine)),
            "alpha" => Ok(json!(m.alpha)),
            "emit" => Ok(json!(m.emit)),
            _ => Err(unknown_attr("material", attr)),
        }
    }
}

// ============================================================================
// texture
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextureParams {
    layers: Vec<LayerConfig>,
}

fn layer_from_config(config: LayerConfig) -> Result<TextureLayer> {
    let source = match (config.image, config.uri, config.target) {
        (Some(image), _, _) => LayerSource::Image(Arc::new(image)),
        (None, Some(uri), _) => LayerSource::Uri(uri),
        (None, None, Some(target)) => LayerSource::Target(target),
        (None, None, None) => {
            return Err(PrismError::IllegalNodeConfig(
                "texture: layer needs an image, a uri or a target".into(),
            ));
        }
    };
    let mut layer = TextureLayer::new(source);
    layer.apply_to = config.apply_to;
    layer.blend_mode = config.blend_mode;
    layer.blend_factor = config.blend_factor.unwrap_or(1.0);
    layer.sampling = TextureSampling {
        wrap_s: config.wrap_s,
        wrap_t: config.wrap_t,
        min_filter: config.min_filter,
        mag_filter: config.mag_filter,
    };
    if let Some(translate) = &config.translate {
        layer.translate = VecPatch::from_json(translate)?.apply2(Vec2::ZERO);
    }
    if let Some(scale) = &config.scale {
        layer.scale = VecPatch::from_json(scale)?.apply2(Vec2::ONE);
    }
    layer.rotate = config.rotate.unwrap_or(0.0);
    layer.rebuild_matrix();
    Ok(layer)
}

/// Update of one layer's matrix and blend factor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerUpdate {
    index: usize,
    translate: Option<VecPatch>,
    rotate: Option<f32>,
    scale: Option<VecPatch>,
    blend_factor: Option<f32>,
}

/// `texture {layers}`. Layers with a `uri` load asynchronously; layers with
/// a `target` sample a render-target node by ID.
pub struct TextureType;

impl NodeType for TextureType {
    fn type_name(&self) -> &str {
        "texture"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Texture)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: TextureParams = config.parse_params()?;
        let layers = p
            .layers
            .into_iter()
            .map(layer_from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(CorePayload::Texture(TextureCore { layers }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let texture = core.texture_mut().ok_or_else(|| payload_mismatch("texture"))?;
        match attr {
            "layer" => {
                let update: LayerUpdate = values::parse(value, "texture.layer")?;
                let count = texture.layers.len();
                let layer = texture.layers.get_mut(update.index).ok_or_else(|| {
                    PrismError::IllegalNodeConfig(format!(
                        "texture.layer: index {} out of range ({count} layers)",
                        update.index
                    ))
                })?;
                if let Some(t) = update.translate {
                    layer.translate = t.apply2(layer.translate);
                }
                if let Some(s) = update.scale {
                    layer.scale = s.apply2(layer.scale);
                }
                if let Some(r) = update.rotate {
                    layer.rotate = r;
                }
                if let Some(f) = update.blend_factor {
                    layer.blend_factor = f;
                }
                layer.rebuild_matrix();
                Ok(DirtyLevel::Image)
            }
            "layers" => {
                let configs: Vec<LayerConfig> = values::parse(value, "texture.layers")?;
                texture.layers = configs
                    .into_iter()
                    .map(layer_from_config)
                    .collect::<Result<Vec<_>>>()?;
                Ok(DirtyLevel::Recompile)
            }
            _ => Err(unknown_attr("texture", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let texture = core.texture().ok_or_else(|| payload_mismatch("texture"))?;
        match attr {
            "layers" => Ok(texture
                .layers
                .iter()
                .map(|l| {
                    json!({
                        "applyTo": l.apply_to,
                        "blendMode": l.blend_mode,
                        "blendFactor": l.blend_factor,
                        "translate": { "x": l.translate.x, "y": l.translate.y },
                        "rotate": l.rotate,
                        "scale": { "x": l.scale.x, "y": l.scale.y },
                        "ready": l.is_ready(),
                    })
                })
                .collect()),
            _ => Err(unknown_attr("texture", attr)),
        }
    }
}

// ============================================================================
// regionMap
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RegionMapParams {
    image: Option<TextureImage>,
    region_data: Vec<Region>,
    highlight_factor: Option<f32>,
}

/// `regionMap {image, regionData: [{color, data}]}`.
pub struct RegionMapType;

impl NodeType for RegionMapType {
    fn type_name(&self) -> &str {
        "regionMap"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::RegionMap)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: RegionMapParams = config.parse_params()?;
        Ok(CorePayload::RegionMap(RegionMapCore {
            image: p.image.map(Arc::new),
            regions: p.region_data,
            highlight: None,
            highlight_factor: p.highlight_factor.unwrap_or(1.5),
            gpu: None,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let map = core.region_map_mut().ok_or_else(|| payload_mismatch("regionMap"))?;
        match attr {
            "regionData" => map.regions = values::parse(value, "regionMap.regionData")?,
            "highlightRegion" => {
                map.highlight = if value.is_null() {
                    None
                } else {
                    let region: Region = values::parse(value, "regionMap.highlightRegion")?;
                    Some(region.color)
                };
            }
            "highlightFactor" => {
                map.highlight_factor = values::number(value, "regionMap.highlightFactor")?;
            }
            _ => return Err(unknown_attr("regionMap", attr)),
        }
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let map = core.region_map().ok_or_else(|| payload_mismatch("regionMap"))?;
        match attr {
            "regionData" => Ok(serde_json::to_value(&map.regions)?),
            "highlightRegion" => Ok(map.highlight.map_or(Value::Null, values::color_json)),
            "highlightFactor" => Ok(json!(map.highlight_factor)),
            _ => Err(unknown_attr("regionMap", attr)),
        }
    }
}

// ============================================================================
// lights
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LightsParams {
    lights: Vec<LightConfig>,
}

fn light_json(light: &Light) -> Value {
    json!({
        "mode": light.mode,
        "color": values::color_json(light.color),
        "diffuse": light.diffuse,
        "specular": light.specular,
        "pos": values::vec_json(light.pos),
        "dir": values::vec_json(light.dir),
        "space": light.space,
        "constantAttenuation": light.attenuation.x,
        "linearAttenuation": light.attenuation.y,
        "quadraticAttenuation": light.attenuation.z,
    })
}

/// `lights {lights: [...]}`.
///
/// Setting `lights` to an array replaces every light; setting it to an
/// object keyed by index updates those lights in place.
pub struct LightsType;

impl LightsType {
    fn update(lights: &mut LightsCore, patches: &Map<String, Value>) -> Result<()> {
        for (key, patch) in patches {
            let index: usize = key.parse().map_err(|_| {
                PrismError::IllegalNodeConfig(format!("lights: '{key}' is not a light index"))
            })?;
            let config: LightConfig = values::parse(patch, "lights")?;
            let count = lights.lights.len();
            let light = lights.lights.get_mut(index).ok_or_else(|| {
                PrismError::IllegalNodeConfig(format!(
                    "lights: index {index} out of range ({count} lights)"
                ))
            })?;
            light.update(&config);
        }
        Ok(())
    }
}

impl NodeType for LightsType {
    fn type_name(&self) -> &str {
        "lights"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Lights)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: LightsParams = config.parse_params()?;
        Ok(CorePayload::Lights(LightsCore {
            lights: p.lights.iter().map(Light::from_config).collect(),
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let lights = core.lights_mut().ok_or_else(|| payload_mismatch("lights"))?;
        if attr != "lights" {
            return Err(unknown_attr("lights", attr));
        }
        let before = lights.hash();
        match value {
            Value::Array(_) => {
                let configs: Vec<LightConfig> = values::parse(value, "lights")?;
                lights.lights = configs.iter().map(Light::from_config).collect();
            }
            Value::Object(patches) => {
                let mut next = lights.clone();
                Self::update(&mut next, patches)?;
                *lights = next;
            }
            _ => {
                return Err(PrismError::IllegalNodeConfig(format!(
                    "lights: expected an array or an index map, got {value}"
                )));
            }
        }
        Ok(if lights.hash() == before {
            DirtyLevel::Image
        } else {
            DirtyLevel::Recompile
        })
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let lights = core.lights().ok_or_else(|| payload_mismatch("lights"))?;
        match attr {
            "lights" => Ok(lights.lights.iter().map(light_json).collect()),
            "ambient" => Ok(values::color_json(lights.ambient())),
            _ => Err(unknown_attr("lights", attr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn base_color(core: &CorePayload) -> Vec3 {
        core.material().map_or(Vec3::ZERO, |m| m.base_color)
    }

    fn config(value: Value) -> NodeConfig {
        NodeConfig::from_json(&value).unwrap()
    }

    #[test]
    fn partial_colours_keep_prior_channels() {
        let mut core = MaterialType
            .init_core(&config(json!({ "type": "material", "baseColor": { "r": 0.2 } })))
            .unwrap();
        assert_eq!(base_color(&core), Vec3::new(0.2, 1.0, 1.0));

        MaterialType.set(&mut core, "baseColor", &json!({ "g": 0.5 })).unwrap();
        assert_eq!(base_color(&core), Vec3::new(0.2, 0.5, 1.0));
        let back = MaterialType.get(&core, "baseColor").unwrap();
        assert_eq!(back["r"].as_f64().map(|v| v as f32), Some(0.2));
    }

    #[test]
    fn texture_layers_need_a_source() {
        let err = TextureType
            .init_core(&config(json!({ "type": "texture", "layers": [{ "applyTo": "baseColor" }] })))
            .unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));

        let core = TextureType
            .init_core(&config(json!({
                "type": "texture",
                "layers": [{ "uri": "a.png", "blendMode": "add" }],
            })))
            .unwrap();
        assert_eq!(core.pending_loads().len(), 1);
    }

    #[test]
    fn light_count_change_recompiles() {
        let mut core = LightsType
            .init_core(&config(json!({
                "type": "lights",
                "lights": [{ "mode": "dir", "dir": { "z": -1 } }],
            })))
            .unwrap();
        let level = LightsType
            .set(&mut core, "lights", &json!({ "0": { "color": { "r": 0.5 } } }))
            .unwrap();
        assert_eq!(level, DirtyLevel::Image);
        let level = LightsType
            .set(&mut core, "lights", &json!([{ "mode": "dir" }, { "mode": "point" }]))
            .unwrap();
        assert_eq!(level, DirtyLevel::Recompile);
    }
}
