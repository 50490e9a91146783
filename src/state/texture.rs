//! Texture and region-map cores.
//!
//! A texture core holds an ordered list of layers. Layers with an image are
//! ready immediately; layers with a `uri` stay [`LoadState::Pending`] until
//! the asset loader delivers pixels; layers with a `target` sample the colour
//! attachment of a render-target node.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CoreHandle, LoadState};
use crate::gpu::{Filter, GpuTexture, SharedImage, TextureImage, TextureSampling, Wrap};

/// Material channel a layer modulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyTo {
    #[default]
    BaseColor,
    Specular,
    Emit,
    Alpha,
    Normals,
}

impl ApplyTo {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseColor => "baseColor",
            Self::Specular => "specular",
            Self::Emit => "emit",
            Self::Alpha => "alpha",
            Self::Normals => "normals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Multiply,
    Add,
}

impl BlendMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multiply => "multiply",
            Self::Add => "add",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerSource {
    Image(SharedImage),
    Uri(String),
    /// ID of a `colorTarget` or `depthTarget` node.
    Target(String),
}

/// One layer as written in a node config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayerConfig {
    pub uri: Option<String>,
    pub image: Option<TextureImage>,
    pub target: Option<String>,
    pub apply_to: ApplyTo,
    pub blend_mode: BlendMode,
    pub blend_factor: Option<f32>,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub translate: Option<Value>,
    pub rotate: Option<f32>,
    pub scale: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct TextureLayer {
    pub source: LayerSource,
    pub apply_to: ApplyTo,
    pub blend_mode: BlendMode,
    pub blend_factor: f32,
    pub sampling: TextureSampling,
    pub translate: Vec2,
    /// Degrees about the texture-space Z axis.
    pub rotate: f32,
    pub scale: Vec2,
    pub matrix: Mat4,
    pub state: LoadState,
    pub image: Option<SharedImage>,
    pub(crate) gpu: Option<GpuTexture>,
    pub(crate) target_core: Option<CoreHandle>,
}

impl TextureLayer {
    #[must_use]
    pub fn new(source: LayerSource) -> Self {
        let (state, image) = match &source {
            LayerSource::Image(image) => (LoadState::Ready, Some(image.clone())),
            LayerSource::Uri(_) => (LoadState::Pending, None),
            LayerSource::Target(_) => (LoadState::Ready, None),
        };
        let mut layer = Self {
            source,
            apply_to: ApplyTo::BaseColor,
            blend_mode: BlendMode::Multiply,
            blend_factor: 1.0,
            sampling: TextureSampling::default(),
            translate: Vec2::ZERO,
            rotate: 0.0,
            scale: Vec2::ONE,
            matrix: Mat4::IDENTITY,
            state,
            image,
            gpu: None,
            target_core: None,
        };
        layer.rebuild_matrix();
        layer
    }

    pub fn rebuild_matrix(&mut self) {
        self.matrix = Mat4::from_translation(self.translate.extend(0.0))
            * Mat4::from_rotation_z(self.rotate.to_radians())
            * Mat4::from_scale(self.scale.extend(1.0));
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    #[inline]
    #[must_use]
    pub fn gpu_texture(&self) -> Option<GpuTexture> {
        self.gpu
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextureCore {
    pub layers: Vec<TextureLayer>,
}

impl TextureCore {
    /// `applyTo/blendMode` per ready layer.
    #[must_use]
    pub fn hash(&self) -> String {
        self.layers
            .iter()
            .filter(|l| l.is_ready())
            .map(|l| format!("{}/{}", l.apply_to.as_str(), l.blend_mode.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Overall state: failed if any layer failed, pending if any is pending.
    #[must_use]
    pub fn load_state(&self) -> LoadState {
        if self.layers.iter().any(|l| l.state == LoadState::Failed) {
            LoadState::Failed
        } else if self.layers.iter().any(|l| l.state == LoadState::Pending) {
            LoadState::Pending
        } else {
            LoadState::Ready
        }
    }
}

/// A colour in a region map and the data it identifies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Region {
    #[serde(with = "rgb")]
    pub color: Vec3,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RegionMapCore {
    pub image: Option<SharedImage>,
    pub regions: Vec<Region>,
    /// Colour of the region to highlight when drawing.
    pub highlight: Option<Vec3>,
    pub highlight_factor: f32,
    pub(crate) gpu: Option<GpuTexture>,
}

impl RegionMapCore {
    /// Matching tolerance per colour channel.
    pub const TOLERANCE: f32 = 0.01;

    /// Finds the region whose colour matches `rgba`, ignoring transparent
    /// texels.
    #[must_use]
    pub fn region_at(&self, rgba: [u8; 4]) -> Option<&Region> {
        if rgba[3] == 0 {
            return None;
        }
        let color = Vec3::new(
            f32::from(rgba[0]) / 255.0,
            f32::from(rgba[1]) / 255.0,
            f32::from(rgba[2]) / 255.0,
        );
        self.regions
            .iter()
            .find(|r| (r.color - color).abs().max_element() <= Self::TOLERANCE)
    }
}

mod rgb {
    use glam::Vec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Rgb {
        r: f32,
        g: f32,
        b: f32,
    }

    pub fn serialize<S: Serializer>(c: &Vec3, s: S) -> Result<S::Ok, S::Error> {
        Rgb {
            r: c.x,
            g: c.y,
            b: c.z,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec3, D::Error> {
        let c = Rgb::deserialize(d)?;
        Ok(Vec3::new(c.r, c.g, c.b))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn hash_covers_ready_layers_only() {
        let image = Arc::new(TextureImage::solid(1, 1, [255; 4]));
        let mut core = TextureCore {
            layers: vec![
                TextureLayer::new(LayerSource::Image(image)),
                TextureLayer::new(LayerSource::Uri("rock.png".into())),
            ],
        };
        core.layers[1].apply_to = ApplyTo::Specular;
        assert_eq!(core.hash(), "baseColor/multiply");
        assert_eq!(core.load_state(), LoadState::Pending);

        core.layers[1].state = LoadState::Ready;
        assert_eq!(core.hash(), "baseColor/multiply,specular/multiply");
    }

    #[test]
    fn region_lookup_uses_tolerance_and_skips_transparent() {
        let core = RegionMapCore {
            regions: vec![Region {
                color: Vec3::new(1.0, 0.0, 0.0),
                data: Value::from("lake"),
            }],
            ..RegionMapCore::default()
        };
        assert_eq!(core.region_at([254, 1, 0, 255]).map(|r| &r.data), Some(&Value::from("lake")));
        assert!(core.region_at([255, 0, 0, 0]).is_none());
        assert!(core.region_at([0, 255, 0, 255]).is_none());
    }
}
