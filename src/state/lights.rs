//! Light sources.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::values::{ColorPatch, VecPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    Ambient,
    #[default]
    Dir,
    Point,
}

/// Coordinate space a light's position or direction is given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightSpace {
    #[default]
    View,
    World,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LightConfig {
    pub mode: LightMode,
    pub color: ColorPatch,
    pub diffuse: Option<bool>,
    pub specular: Option<bool>,
    pub pos: VecPatch,
    pub dir: VecPatch,
    pub space: LightSpace,
    pub constant_attenuation: Option<f32>,
    pub linear_attenuation: Option<f32>,
    pub quadratic_attenuation: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub mode: LightMode,
    pub color: Vec3,
    pub diffuse: bool,
    pub specular: bool,
    pub pos: Vec3,
    pub dir: Vec3,
    pub space: LightSpace,
    /// Constant, linear and quadratic terms.
    pub attenuation: Vec3,
}

impl Light {
    #[must_use]
    pub fn from_config(config: &LightConfig) -> Self {
        Self {
            mode: config.mode,
            color: config.color.apply(Vec3::ONE),
            diffuse: config.diffuse.unwrap_or(true),
            specular: config.specular.unwrap_or(true),
            pos: config.pos.apply(Vec3::ZERO),
            dir: config.dir.apply(Vec3::new(0.0, 0.0, -1.0)),
            space: config.space,
            attenuation: Vec3::new(
                config.constant_attenuation.unwrap_or(0.0),
                config.linear_attenuation.unwrap_or(0.0),
                config.quadratic_attenuation.unwrap_or(0.0),
            ),
        }
    }

    /// Applies a partial update, keeping unspecified fields.
    pub fn update(&mut self, config: &LightConfig) {
        self.color = config.color.apply(self.color);
        self.pos = config.pos.apply(self.pos);
        self.dir = config.dir.apply(self.dir);
        if let Some(diffuse) = config.diffuse {
            self.diffuse = diffuse;
        }
        if let Some(specular) = config.specular {
            self.specular = specular;
        }
        if let Some(c) = config.constant_attenuation {
            self.attenuation.x = c;
        }
        if let Some(l) = config.linear_attenuation {
            self.attenuation.y = l;
        }
        if let Some(q) = config.quadratic_attenuation {
            self.attenuation.z = q;
        }
    }

    fn shape(&self) -> String {
        let mode = match self.mode {
            LightMode::Ambient => "ambient",
            LightMode::Dir => "dir",
            LightMode::Point => "point",
        };
        let space = match self.space {
            LightSpace::View => "view",
            LightSpace::World => "world",
        };
        format!("{mode}:{space}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightsCore {
    pub lights: Vec<Light>,
}

impl Default for LightsCore {
    fn default() -> Self {
        let dir = |color: Vec3, dir: Vec3| Light {
            mode: LightMode::Dir,
            color,
            diffuse: true,
            specular: true,
            pos: Vec3::ZERO,
            dir,
            space: LightSpace::View,
            attenuation: Vec3::ZERO,
        };
        Self {
            lights: vec![
                Light {
                    mode: LightMode::Ambient,
                    ..dir(Vec3::new(0.7, 0.7, 0.8), Vec3::ZERO)
                },
                dir(Vec3::ONE, Vec3::new(-0.5, -0.5, -1.0)),
                dir(Vec3::ONE, Vec3::new(1.0, -0.9, -0.7)),
            ],
        }
    }
}

impl LightsCore {
    /// Mode and space per light.
    #[must_use]
    pub fn hash(&self) -> String {
        self.lights
            .iter()
            .map(Light::shape)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Sum of all ambient light colours.
    #[must_use]
    pub fn ambient(&self) -> Vec3 {
        self.lights
            .iter()
            .filter(|l| l.mode == LightMode::Ambient)
            .map(|l| l.color)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lights_hash_by_shape() {
        let core = LightsCore::default();
        assert_eq!(core.hash(), "ambient:view;dir:view;dir:view");
        assert_eq!(core.ambient(), Vec3::new(0.7, 0.7, 0.8));
    }
}
