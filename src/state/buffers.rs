//! Framebuffer state: render targets and depth, colour and stencil buffer
//! configuration.

use serde::{Deserialize, Serialize};

use crate::gpu::{CompareFunc, RenderBufferHandles, StencilOp, StencilState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Color,
    Depth,
}

/// An off-screen buffer that objects below a `colorTarget` or `depthTarget`
/// node render into.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetCore {
    pub kind: TargetKind,
    /// Explicit size; the drawing buffer size when unset.
    pub size: Option<(u32, u32)>,
    pub(crate) buffer: Option<RenderBufferHandles>,
}

impl RenderTargetCore {
    #[must_use]
    pub fn new(kind: TargetKind, size: Option<(u32, u32)>) -> Self {
        Self {
            kind,
            size,
            buffer: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> Option<RenderBufferHandles> {
        self.buffer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DepthBufferCore {
    pub enabled: bool,
    pub clear_depth: f32,
    pub depth_func: CompareFunc,
}

impl Default for DepthBufferCore {
    fn default() -> Self {
        Self {
            enabled: true,
            clear_depth: 1.0,
            depth_func: CompareFunc::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorBufferCore {
    pub blend_enabled: bool,
    pub color_mask: [bool; 4],
}

impl Default for ColorBufferCore {
    fn default() -> Self {
        Self {
            blend_enabled: false,
            color_mask: [true; 4],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StencilBufferCore {
    pub enabled: bool,
    pub func: CompareFunc,
    #[serde(rename = "ref")]
    pub reference: i32,
    pub mask: Option<u32>,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub clear_stencil: i32,
}

impl StencilBufferCore {
    #[must_use]
    pub fn state(&self) -> StencilState {
        StencilState {
            func: self.func,
            reference: self.reference,
            mask: self.mask.unwrap_or(u32::MAX),
            fail: self.fail,
            depth_fail: self.depth_fail,
            pass: self.pass,
        }
    }
}
