//! Render flags.

use serde::{Deserialize, Serialize};

use crate::gpu::FrontFace;

/// Per-subtree toggles. All of them reach the GPU as uniforms or fixed
/// function state, so the flags core never changes the program hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Flags {
    /// Excludes objects from the draw list without destroying them.
    pub enabled: bool,
    /// Includes objects in the pick list.
    pub picking: bool,
    pub clipping: bool,
    /// Sorts objects into the transparent pass.
    pub transparent: bool,
    /// Draws back faces; disabling enables culling.
    pub backfaces: bool,
    pub front_face: FrontFace,
    pub backface_lighting: bool,
    pub backface_texturing: bool,
    pub specular: bool,
    pub diffuse: bool,
    pub ambient: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            enabled: true,
            picking: true,
            clipping: true,
            transparent: false,
            backfaces: true,
            front_face: FrontFace::Ccw,
            backface_lighting: true,
            backface_texturing: true,
            specular: true,
            diffuse: true,
            ambient: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlagsCore {
    pub flags: Flags,
}
