//! Attribute and uniform names shared by the shader templates, the chunks
//! that feed them, and the headless backend that interprets them.

// Attributes
pub const POSITION: &str = "aPosition";
pub const NORMAL: &str = "aNormal";
pub const UV: &str = "aUV";
pub const UV2: &str = "aUV2";
pub const COLOR: &str = "aColor";

// Transforms
pub const MODEL_MATRIX: &str = "uModelMatrix";
pub const MODEL_NORMAL_MATRIX: &str = "uModelNormalMatrix";
pub const VIEW_MATRIX: &str = "uViewMatrix";
pub const VIEW_NORMAL_MATRIX: &str = "uViewNormalMatrix";
pub const PROJ_MATRIX: &str = "uProjMatrix";
pub const WORLD_EYE: &str = "uWorldEye";
pub const Z_NEAR: &str = "uZNear";
pub const Z_FAR: &str = "uZFar";

// Material
pub const MATERIAL_BASE_COLOR: &str = "uMaterialBaseColor";
pub const MATERIAL_SPECULAR_COLOR: &str = "uMaterialSpecularColor";
pub const MATERIAL_SPECULAR: &str = "uMaterialSpecular";
pub const MATERIAL_SHINE: &str = "uMaterialShine";
pub const MATERIAL_EMIT: &str = "uMaterialEmit";
pub const MATERIAL_ALPHA: &str = "uMaterialAlpha";

// Lighting
pub const AMBIENT_COLOR: &str = "uAmbientColor";

// Flags
pub const CLIPPING: &str = "uClipping";
pub const BACKFACE_LIGHTING: &str = "uBackfaceLighting";
pub const BACKFACE_TEXTURING: &str = "uBackfaceTexturing";

// Picking
pub const PICK_MODE: &str = "uPickMode";
pub const PICK_COLOR: &str = "uPickColor";
pub const REGION_MAP_SAMPLER: &str = "uRegionMapSampler";
pub const REGION_HIGHLIGHT: &str = "uRegionHighlightFactor";
pub const REGION_HIGHLIGHT_COLOR: &str = "uRegionHighlightColor";

/// `uLightColor{i}`
#[must_use]
pub fn light_color(i: usize) -> String {
    format!("uLightColor{i}")
}

/// `uLightDir{i}`
#[must_use]
pub fn light_dir(i: usize) -> String {
    format!("uLightDir{i}")
}

/// `uLightPos{i}`
#[must_use]
pub fn light_pos(i: usize) -> String {
    format!("uLightPos{i}")
}

/// `uLightAttenuation{i}`
#[must_use]
pub fn light_attenuation(i: usize) -> String {
    format!("uLightAttenuation{i}")
}

/// `uClipMode{i}`
#[must_use]
pub fn clip_mode(i: usize) -> String {
    format!("uClipMode{i}")
}

/// `uClipNormalAndDist{i}`
#[must_use]
pub fn clip_normal_and_dist(i: usize) -> String {
    format!("uClipNormalAndDist{i}")
}

/// `uSampler{i}`
#[must_use]
pub fn layer_sampler(i: usize) -> String {
    format!("uSampler{i}")
}

/// `uLayer{i}Matrix`
#[must_use]
pub fn layer_matrix(i: usize) -> String {
    format!("uLayer{i}Matrix")
}

/// `uLayer{i}BlendFactor`
#[must_use]
pub fn layer_blend_factor(i: usize) -> String {
    format!("uLayer{i}BlendFactor")
}
