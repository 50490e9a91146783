//! Graphics API Abstraction
//!
//! The engine drives an immediate-mode graphics API through the
//! [`GpuContext`] trait: programs, buffers, textures and off-screen render
//! buffers are created through it and referenced by opaque handles, and all
//! per-draw state (uniforms, capabilities, bound buffers) is set through it.
//!
//! [`HeadlessGpu`] is the in-tree implementation. It records every call,
//! simulates context loss, and answers single-pixel readbacks by probing
//! the triangles drawn since the last clear, which is what picking needs.

pub mod headless;
pub mod names;

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use thiserror::Error;

pub use headless::{GpuCommand, HeadlessGpu};

new_key_type! {
    /// A linked GPU program.
    pub struct GpuProgram;
    /// A vertex or index buffer.
    pub struct GpuBuffer;
    /// A 2D texture.
    pub struct GpuTexture;
    /// An off-screen framebuffer with colour and depth attachments.
    pub struct GpuRenderBuffer;
}

/// Errors reported by a [`GpuContext`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("graphics context lost")]
    ContextLost,

    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: &'static str, log: String },

    #[error("program failed to link: {0}")]
    Link(String),

    #[error("allocation failed: {0}")]
    OutOfMemory(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Uniform location within one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Vertex attribute location within one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeLocation(pub u32);

/// A value assignable to a shader uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    /// Texture unit index for a sampler uniform.
    Sampler(u32),
}

impl UniformValue {
    /// Interprets a JSON parameter as a uniform value.
    ///
    /// Numbers become floats, booleans stay booleans, and numeric arrays of
    /// length 2, 3, 4 or 16 become vectors or a column-major matrix.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(|v| Self::Float(v as f32)),
            serde_json::Value::Array(items) => {
                let floats: Option<Vec<f32>> =
                    items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
                let floats = floats?;
                match floats.len() {
                    2 => Some(Self::Vec2(Vec2::from_slice(&floats))),
                    3 => Some(Self::Vec3(Vec3::from_slice(&floats))),
                    4 => Some(Self::Vec4(Vec4::from_slice(&floats))),
                    16 => Some(Self::Mat4(Mat4::from_cols_slice(&floats))),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Primitive {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Primitive {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Lines => "lines",
            Self::LineLoop => "line-loop",
            Self::LineStrip => "line-strip",
            Self::Triangles => "triangles",
            Self::TriangleStrip => "triangle-strip",
            Self::TriangleFan => "triangle-fan",
        }
    }
}

/// Buffer contents handed to [`GpuContext::create_buffer`].
#[derive(Debug, Clone, Copy)]
pub enum BufferData<'a> {
    Vertex(&'a [f32]),
    Index(&'a [u32]),
}

/// Toggleable pipeline capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CullFace,
    Blend,
    DepthTest,
    StencilTest,
    ScissorTest,
}

/// Winding order of front-facing triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// Comparison used by depth and stencil tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    Lequal,
    Greater,
    Notequal,
    Gequal,
    Always,
}

/// Stencil buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    Incr,
    Decr,
    Invert,
}

/// Full stencil test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilState {
    pub func: CompareFunc,
    pub reference: i32,
    pub mask: u32,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

bitflags! {
    /// Buffers affected by [`GpuContext::clear`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMask: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Texture wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Wrap {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
    LinearMipmapLinear,
}

/// Sampling parameters applied when a texture is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureSampling {
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
}

/// CPU-side RGBA8 image, retained so textures can be re-uploaded after a
/// context loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    /// Creates a single-colour image.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Nearest-texel lookup with repeat wrapping; `v` grows downwards.
    #[must_use]
    pub fn sample(&self, uv: Vec2) -> [u8; 4] {
        if self.width == 0 || self.height == 0 {
            return [0; 4];
        }
        let u = uv.x.rem_euclid(1.0);
        let v = uv.y.rem_euclid(1.0);
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let i = ((y * self.width + x) * 4) as usize;
        match self.pixels.get(i..i + 4) {
            Some(p) => [p[0], p[1], p[2], p[3]],
            None => [0; 4],
        }
    }
}

/// Handles of an off-screen render buffer and its colour texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderBufferHandles {
    pub framebuffer: GpuRenderBuffer,
    pub texture: GpuTexture,
    pub width: u32,
    pub height: u32,
}

/// Immediate-mode graphics API consumed by the display.
///
/// Creation calls and draw calls are fallible; state setters are not, in the
/// same way a lost GL context silently ignores state changes. Callers check
/// [`is_context_lost`](Self::is_context_lost) at frame boundaries.
pub trait GpuContext {
    fn is_context_lost(&self) -> bool;

    /// Size of the default framebuffer in pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    fn create_program(&mut self, vertex: &str, fragment: &str) -> GpuResult<GpuProgram>;
    fn delete_program(&mut self, program: GpuProgram);
    fn uniform_location(&mut self, program: GpuProgram, name: &str) -> Option<UniformLocation>;
    fn attribute_location(&mut self, program: GpuProgram, name: &str)
    -> Option<AttributeLocation>;
    fn use_program(&mut self, program: GpuProgram) -> GpuResult<()>;
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    fn create_buffer(&mut self, data: BufferData<'_>) -> GpuResult<GpuBuffer>;
    fn delete_buffer(&mut self, buffer: GpuBuffer);
    fn bind_attribute(&mut self, location: AttributeLocation, buffer: GpuBuffer, components: u8);

    fn create_texture(
        &mut self,
        image: &TextureImage,
        sampling: TextureSampling,
    ) -> GpuResult<GpuTexture>;
    fn delete_texture(&mut self, texture: GpuTexture);
    fn bind_texture(&mut self, unit: u32, texture: Option<GpuTexture>);

    fn create_render_buffer(&mut self, width: u32, height: u32) -> GpuResult<RenderBufferHandles>;
    fn delete_render_buffer(&mut self, buffer: RenderBufferHandles);
    /// Binds an off-screen buffer, or the default framebuffer for `None`.
    fn bind_render_buffer(&mut self, buffer: Option<GpuRenderBuffer>);

    fn set_viewport(&mut self, width: u32, height: u32);
    fn clear(&mut self, color: [f32; 4], mask: ClearMask);
    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn set_front_face(&mut self, face: FrontFace);
    fn set_depth_func(&mut self, func: CompareFunc);
    fn set_depth_mask(&mut self, enabled: bool);
    fn set_clear_depth(&mut self, depth: f32);
    fn set_color_mask(&mut self, mask: [bool; 4]);
    fn set_stencil(&mut self, state: StencilState);
    fn set_line_width(&mut self, width: f32);

    fn draw_elements(&mut self, primitive: Primitive, indices: GpuBuffer, count: u32)
    -> GpuResult<()>;
    fn draw_arrays(&mut self, primitive: Primitive, count: u32) -> GpuResult<()>;

    /// Reads one RGBA pixel of the bound framebuffer; `(0, 0)` is the top-left.
    fn read_pixel(&mut self, x: u32, y: u32) -> GpuResult<[u8; 4]>;

    fn flush(&mut self);
    /// Blocks until all submitted work has completed.
    fn finish(&mut self);
}

/// Shared immutable image reference used by cores.
pub type SharedImage = Arc<TextureImage>;

// ============================================================================
// Pick colour encoding
// ============================================================================

/// Encodes a non-zero pick index as `r + g * 256 + b * 65536`.
#[must_use]
pub fn encode_index(index: u32) -> [u8; 3] {
    [
        (index & 0xff) as u8,
        ((index >> 8) & 0xff) as u8,
        ((index >> 16) & 0xff) as u8,
    ]
}

/// Decodes a pixel written with [`encode_index`]. `None` for a miss (zero).
#[must_use]
pub fn decode_index(pixel: [u8; 4]) -> Option<u32> {
    let index = u32::from(pixel[0]) | (u32::from(pixel[1]) << 8) | (u32::from(pixel[2]) << 16);
    (index != 0).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uniform_values_from_json() {
        assert_eq!(
            UniformValue::from_json(&json!(10)),
            Some(UniformValue::Float(10.0))
        );
        assert_eq!(
            UniformValue::from_json(&json!([1.0, 2.0, 3.0])),
            Some(UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(UniformValue::from_json(&json!("text")), None);
        assert_eq!(UniformValue::from_json(&json!([1.0, 2.0, 3.0, 4.0, 5.0])), None);
    }

    #[test]
    fn pick_index_encoding_is_little_endian_rgb() {
        assert_eq!(encode_index(1), [1, 0, 0]);
        assert_eq!(encode_index(256 + 2), [2, 1, 0]);
        assert_eq!(decode_index([2, 1, 0, 255]), Some(258));
        assert_eq!(decode_index([0, 0, 0, 255]), None);
    }

    #[test]
    fn texture_sample_wraps_and_clamps() {
        let mut image = TextureImage::solid(2, 1, [0, 0, 0, 255]);
        image.pixels[4..8].copy_from_slice(&[255, 0, 0, 255]);
        assert_eq!(image.sample(Vec2::new(0.25, 0.5)), [0, 0, 0, 255]);
        assert_eq!(image.sample(Vec2::new(0.75, 0.5)), [255, 0, 0, 255]);
        assert_eq!(image.sample(Vec2::new(1.75, 0.5)), [255, 0, 0, 255]);
    }
}
