//! Built-in node types.

mod geometry;
mod group;
mod shader;
mod state;
mod surface;
mod transform;
mod view;

pub use geometry::{BoxType, GeometryType, QuadType, SphereType};
pub use group::{GroupType, InstanceType};
pub use shader::{ShaderParamsType, ShaderType};
pub use state::{
    BufferType, ClipsType, EnableType, FlagsType, LayerType, NameType, RenderTargetType,
    StageType, TagType,
};
pub use surface::{LightsType, MaterialType, RegionMapType, TextureType};
pub use transform::{MatrixType, QuaternionType, RotateType, ScaleType, TranslateType};
pub use view::{CameraType, LookAtType};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::node_type::NodeTypeRegistry;
use crate::errors::{PrismError, Result};
use crate::gpu::UniformValue;
use crate::state::{CoreKind, TargetKind, values};

pub(crate) fn register_builtins(registry: &mut NodeTypeRegistry) {
    registry.register(GroupType::new("node"));
    registry.register(GroupType::new("scene"));
    registry.register(InstanceType);

    registry.register(RotateType);
    registry.register(TranslateType);
    registry.register(ScaleType);
    registry.register(MatrixType);
    registry.register(QuaternionType);
    registry.register(LookAtType);
    registry.register(CameraType);

    registry.register(MaterialType);
    registry.register(TextureType);
    registry.register(RegionMapType);
    registry.register(LightsType);

    registry.register(ClipsType);
    registry.register(FlagsType);
    registry.register(EnableType);
    registry.register(LayerType);
    registry.register(StageType);
    registry.register(TagType);
    registry.register(NameType);
    registry.register(RenderTargetType::new("colorTarget", TargetKind::Color));
    registry.register(RenderTargetType::new("depthTarget", TargetKind::Depth));
    registry.register(BufferType::new("depthBuffer", CoreKind::DepthBuffer));
    registry.register(BufferType::new("colorBuffer", CoreKind::ColorBuffer));
    registry.register(BufferType::new("stencilBuffer", CoreKind::StencilBuffer));

    registry.register(ShaderType);
    registry.register(ShaderParamsType);

    registry.register(GeometryType);
    registry.register(BoxType);
    registry.register(QuadType);
    registry.register(SphereType);
}

/// Overlays the keys of `patch` on the serialized form of `current`.
///
/// With `attr` other than `whole`, the value is treated as `{ attr: value }`
/// and `attr` must name a field of `T`.
pub(crate) fn merge_patch<T: Serialize + DeserializeOwned>(
    current: &T,
    whole: &str,
    attr: &str,
    value: &Value,
    node_type: &str,
) -> Result<T> {
    let mut base = serde_json::to_value(current)?;
    let Some(fields) = base.as_object_mut() else {
        return Err(PrismError::IllegalNodeConfig(format!("{node_type}: state is not an object")));
    };
    if attr == whole {
        let Some(patch) = value.as_object() else {
            return Err(PrismError::IllegalNodeConfig(format!(
                "{node_type}.{attr}: expected an object, got {value}"
            )));
        };
        for (k, v) in patch {
            fields.insert(k.clone(), v.clone());
        }
    } else {
        if !fields.contains_key(attr) {
            return Err(super::node_type::unknown_attr(node_type, attr));
        }
        fields.insert(attr.to_string(), value.clone());
    }
    values::parse(&base, node_type)
}

pub(crate) fn uniform_json(value: &UniformValue) -> Value {
    match *value {
        UniformValue::Bool(b) => json!(b),
        UniformValue::Int(i) => json!(i),
        UniformValue::Sampler(unit) => json!(unit),
        UniformValue::Float(f) => json!(f),
        UniformValue::Vec2(v) => json!(v.to_array()),
        UniformValue::Vec3(v) => json!(v.to_array()),
        UniformValue::Vec4(v) => json!(v.to_array()),
        UniformValue::Mat4(m) => json!(m.to_cols_array()),
    }
}
