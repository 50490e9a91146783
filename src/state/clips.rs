//! User clip planes.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::values::VecPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    Inside,
    Outside,
    #[default]
    Disabled,
}

impl ClipMode {
    /// Value written to `uClipMode{i}`.
    #[must_use]
    pub fn uniform(self) -> f32 {
        match self {
            Self::Disabled => 0.0,
            Self::Inside => 1.0,
            Self::Outside => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub mode: ClipMode,
    pub normal: VecPatch,
    pub dist: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub mode: ClipMode,
    pub normal: Vec3,
    pub dist: f32,
}

impl From<ClipConfig> for Clip {
    fn from(config: ClipConfig) -> Self {
        Self {
            mode: config.mode,
            normal: config.normal.apply(Vec3::Z),
            dist: config.dist,
        }
    }
}

impl Clip {
    #[must_use]
    pub fn normal_and_dist(&self) -> Vec4 {
        self.normal.normalize_or_zero().extend(self.dist)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipsCore {
    pub clips: Vec<Clip>,
}
