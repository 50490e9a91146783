//! State Cores
//!
//! A [`StateCore`] is one shareable bundle of render state for a single
//! category ([`CoreKind`]): a material's colours, a transform's matrices, a
//! geometry's vertex arrays. Scene nodes refer to cores by [`CoreHandle`];
//! the [`CoreFactory`] owns them all, deduplicates them by explicit `coreId`,
//! and counts how many nodes use each one.
//!
//! During compile, nodes push their cores onto per-category stacks; the
//! display reads the top of every stack when it builds an object. A core's
//! [`hash`](StateCore::hash) names only the parts of its state that change
//! the generated shader, so objects that differ only in values share one
//! program.

pub mod buffers;
pub mod clips;
pub mod factory;
pub mod flags;
pub mod geometry;
pub mod grouping;
pub mod lights;
pub mod material;
pub mod shader;
pub mod texture;
pub mod transform;
pub mod values;
pub mod view;

use slotmap::new_key_type;

pub use buffers::{
    ColorBufferCore, DepthBufferCore, RenderTargetCore, StencilBufferCore, TargetKind,
};
pub use clips::{Clip, ClipMode, ClipsCore};
pub use factory::CoreFactory;
pub use flags::{Flags, FlagsCore};
pub use geometry::{GeometryBuffers, GeometryConfig, GeometryCore, GeometryData};
pub use grouping::{
    EnableCore, LayerCore, ListenersCore, NameCore, StageCore, TagCore, TagSelector,
};
pub use lights::{Light, LightMode, LightSpace, LightsCore};
pub use material::MaterialCore;
pub use shader::{ShaderCore, ShaderParamsCore, ShaderStage, StageCode};
pub use texture::{
    ApplyTo, BlendMode, LayerSource, Region, RegionMapCore, TextureCore, TextureLayer,
};
pub use transform::{LocalTransform, MemoLevel, MultOrder, TransformCore};
pub use view::{Optics, OpticsKind, ProjectionCore, ViewCore};

new_key_type! {
    /// Handle to a core in the [`CoreFactory`].
    pub struct CoreHandle;
}

/// State category of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoreKind {
    Transform,
    ViewTransform,
    Projection,
    Material,
    Texture,
    RegionMap,
    Clips,
    Flags,
    Enable,
    Layer,
    Stage,
    Tag,
    Name,
    Shader,
    ShaderParams,
    Lights,
    RenderTarget,
    DepthBuffer,
    ColorBuffer,
    StencilBuffer,
    Listeners,
    Geometry,
}

impl CoreKind {
    pub const COUNT: usize = 22;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Transform,
        Self::ViewTransform,
        Self::Projection,
        Self::Material,
        Self::Texture,
        Self::RegionMap,
        Self::Clips,
        Self::Flags,
        Self::Enable,
        Self::Layer,
        Self::Stage,
        Self::Tag,
        Self::Name,
        Self::Shader,
        Self::ShaderParams,
        Self::Lights,
        Self::RenderTarget,
        Self::DepthBuffer,
        Self::ColorBuffer,
        Self::StencilBuffer,
        Self::Listeners,
        Self::Geometry,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether nodes of this category push onto a stack during compile.
    /// Geometry is consumed at the leaf instead.
    #[inline]
    #[must_use]
    pub fn is_stacked(self) -> bool {
        self != Self::Geometry
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "xform",
            Self::ViewTransform => "lookAt",
            Self::Projection => "camera",
            Self::Material => "material",
            Self::Texture => "texture",
            Self::RegionMap => "regionMap",
            Self::Clips => "clips",
            Self::Flags => "flags",
            Self::Enable => "enable",
            Self::Layer => "layer",
            Self::Stage => "stage",
            Self::Tag => "tag",
            Self::Name => "name",
            Self::Shader => "shader",
            Self::ShaderParams => "shaderParams",
            Self::Lights => "lights",
            Self::RenderTarget => "renderTarget",
            Self::DepthBuffer => "depthBuffer",
            Self::ColorBuffer => "colorBuffer",
            Self::StencilBuffer => "stencilBuffer",
            Self::Listeners => "listeners",
            Self::Geometry => "geometry",
        }
    }

    /// Resolves a category name. The modelling transform node types are
    /// aliases of one category, as are the two render target types.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "xform" | "rotate" | "translate" | "scale" | "matrix" | "quaternion" => {
                Self::Transform
            }
            "colorTarget" | "depthTarget" => Self::RenderTarget,
            other => return Self::ALL.into_iter().find(|k| k.as_str() == other),
        };
        Some(kind)
    }

    /// Whether the default core of this category does nothing when applied.
    #[must_use]
    pub fn default_is_empty(self) -> bool {
        matches!(
            self,
            Self::Texture
                | Self::RegionMap
                | Self::Clips
                | Self::Shader
                | Self::ShaderParams
                | Self::RenderTarget
                | Self::Name
                | Self::Listeners
                | Self::Tag
                | Self::Geometry
        )
    }
}

/// Availability of data that arrives asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadState {
    #[default]
    Ready,
    Pending,
    Failed,
}

/// Which part of a core an asynchronous load fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadTarget {
    Geometry,
    TextureLayer(usize),
}

/// Category-specific core state.
#[derive(Debug, Clone)]
pub enum CorePayload {
    Transform(TransformCore),
    ViewTransform(ViewCore),
    Projection(ProjectionCore),
    Material(MaterialCore),
    Texture(TextureCore),
    RegionMap(RegionMapCore),
    Clips(ClipsCore),
    Flags(FlagsCore),
    Enable(EnableCore),
    Layer(LayerCore),
    Stage(StageCore),
    Tag(TagCore),
    Name(NameCore),
    Shader(ShaderCore),
    ShaderParams(ShaderParamsCore),
    Lights(LightsCore),
    RenderTarget(RenderTargetCore),
    DepthBuffer(DepthBufferCore),
    ColorBuffer(ColorBufferCore),
    StencilBuffer(StencilBufferCore),
    Listeners(ListenersCore),
    Geometry(GeometryCore),
}

macro_rules! payload_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        impl CorePayload {
            #[must_use]
            pub fn kind(&self) -> CoreKind {
                match self {
                    $(Self::$variant(_) => CoreKind::$variant,)*
                }
            }

            $(
                #[inline]
                #[must_use]
                pub fn $get(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(p) => Some(p),
                        _ => None,
                    }
                }

                #[inline]
                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Self::$variant(p) => Some(p),
                        _ => None,
                    }
                }
            )*
        }
    };
}

payload_accessors! {
    Transform => TransformCore, transform, transform_mut;
    ViewTransform => ViewCore, view, view_mut;
    Projection => ProjectionCore, projection, projection_mut;
    Material => MaterialCore, material, material_mut;
    Texture => TextureCore, texture, texture_mut;
    RegionMap => RegionMapCore, region_map, region_map_mut;
    Clips => ClipsCore, clips, clips_mut;
    Flags => FlagsCore, flags, flags_mut;
    Enable => EnableCore, enable, enable_mut;
    Layer => LayerCore, layer, layer_mut;
    Stage => StageCore, stage, stage_mut;
    Tag => TagCore, tag, tag_mut;
    Name => NameCore, name, name_mut;
    Shader => ShaderCore, shader, shader_mut;
    ShaderParams => ShaderParamsCore, shader_params, shader_params_mut;
    Lights => LightsCore, lights, lights_mut;
    RenderTarget => RenderTargetCore, render_target, render_target_mut;
    DepthBuffer => DepthBufferCore, depth_buffer, depth_buffer_mut;
    ColorBuffer => ColorBufferCore, color_buffer, color_buffer_mut;
    StencilBuffer => StencilBufferCore, stencil_buffer, stencil_buffer_mut;
    Listeners => ListenersCore, listeners, listeners_mut;
    Geometry => GeometryCore, geometry, geometry_mut;
}

impl CorePayload {
    /// The payload of a category's default core.
    #[must_use]
    pub fn default_for(kind: CoreKind) -> Self {
        match kind {
            CoreKind::Transform => Self::Transform(TransformCore::root()),
            CoreKind::ViewTransform => Self::ViewTransform(ViewCore::default()),
            CoreKind::Projection => Self::Projection(ProjectionCore::default()),
            CoreKind::Material => Self::Material(MaterialCore::default()),
            CoreKind::Texture => Self::Texture(TextureCore::default()),
            CoreKind::RegionMap => Self::RegionMap(RegionMapCore::default()),
            CoreKind::Clips => Self::Clips(ClipsCore::default()),
            CoreKind::Flags => Self::Flags(FlagsCore::default()),
            CoreKind::Enable => Self::Enable(EnableCore::default()),
            CoreKind::Layer => Self::Layer(LayerCore::default()),
            CoreKind::Stage => Self::Stage(StageCore::default()),
            CoreKind::Tag => Self::Tag(TagCore::default()),
            CoreKind::Name => Self::Name(NameCore::default()),
            CoreKind::Shader => Self::Shader(ShaderCore::default()),
            CoreKind::ShaderParams => Self::ShaderParams(ShaderParamsCore::default()),
            CoreKind::Lights => Self::Lights(LightsCore::default()),
            CoreKind::RenderTarget => {
                Self::RenderTarget(RenderTargetCore::new(TargetKind::Color, None))
            }
            CoreKind::DepthBuffer => Self::DepthBuffer(DepthBufferCore::default()),
            CoreKind::ColorBuffer => Self::ColorBuffer(ColorBufferCore::default()),
            CoreKind::StencilBuffer => Self::StencilBuffer(StencilBufferCore::default()),
            CoreKind::Listeners => Self::Listeners(ListenersCore::default()),
            CoreKind::Geometry => Self::Geometry(GeometryCore::default()),
        }
    }

    /// GPU-visible shape of the payload; see the module docs.
    #[must_use]
    pub fn hash(&self) -> String {
        match self {
            Self::Geometry(g) => g.data.hash(),
            Self::Clips(c) => c.clips.len().to_string(),
            Self::Texture(t) => t.hash(),
            Self::Lights(l) => l.hash(),
            Self::RegionMap(r) if r.image.is_some() => "regionMap".to_string(),
            _ => String::new(),
        }
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        match self {
            Self::Texture(t) => t.load_state(),
            Self::Geometry(g) => g.state,
            _ => LoadState::Ready,
        }
    }

    /// Outstanding asynchronous loads and the URI each one fetches.
    #[must_use]
    pub fn pending_loads(&self) -> Vec<(LoadTarget, String)> {
        match self {
            Self::Geometry(g) if g.state == LoadState::Pending => g
                .source
                .iter()
                .map(|uri| (LoadTarget::Geometry, uri.clone()))
                .collect(),
            Self::Texture(t) => t
                .layers
                .iter()
                .enumerate()
                .filter_map(|(i, layer)| match (&layer.source, layer.state) {
                    (LayerSource::Uri(uri), LoadState::Pending) => {
                        Some((LoadTarget::TextureLayer(i), uri.clone()))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One shareable bundle of state.
#[derive(Debug, Clone)]
pub struct StateCore {
    pub kind: CoreKind,
    /// Monotonic per factory; 0 for the default cores.
    pub state_id: u64,
    pub core_id: Option<String>,
    pub use_count: u32,
    /// Default cores of no-op categories.
    pub empty: bool,
    pub payload: CorePayload,
}

impl StateCore {
    #[must_use]
    pub fn hash(&self) -> String {
        self.payload.hash()
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.payload.load_state() == LoadState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_aliases_share_a_category() {
        for name in ["rotate", "translate", "scale", "matrix", "quaternion", "xform"] {
            assert_eq!(CoreKind::from_name(name), Some(CoreKind::Transform));
        }
        assert_eq!(CoreKind::from_name("depthTarget"), Some(CoreKind::RenderTarget));
        assert_eq!(CoreKind::from_name("shaderParams"), Some(CoreKind::ShaderParams));
        assert_eq!(CoreKind::from_name("teapot"), None);
    }

    #[test]
    fn kind_indices_match_declaration_order() {
        for (i, kind) in CoreKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(CorePayload::default_for(kind).kind(), kind);
        }
    }
}
