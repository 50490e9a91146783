//! Geometry leaf node types: `geometry` with explicit arrays, and the
//! generated `geometry/box`, `geometry/quad` and `geometry/sphere`.
//!
//! Generated shapes derive their `coreId` from their parameters, so equal
//! shapes share one core and one set of GPU buffers.

use glam::{Vec2, Vec3};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{PrismError, Result};
use crate::primitives::{SphereOptions, create_box, create_quad, create_sphere};
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{CompileMode, DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::values::{self, VecPatch};
use crate::state::{CoreKind, CorePayload, GeometryConfig, GeometryCore, GeometryData};

/// `geometry {primitive, positions, normals, uv, uv2, colors, indices,
/// source}`. With `source` the arrays load asynchronously.
pub struct GeometryType;

impl NodeType for GeometryType {
    fn type_name(&self) -> &str {
        "geometry"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Geometry)
    }

    fn compile_mode(&self) -> CompileMode {
        CompileMode::Geometry
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let mut geometry: GeometryConfig = config.parse_params()?;
        let core = match geometry.source.take() {
            Some(source) => GeometryCore::pending(source),
            None => GeometryCore::ready(GeometryData::new(geometry)?),
        };
        Ok(CorePayload::Geometry(core))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let geometry = core.geometry_mut().ok_or_else(|| payload_mismatch("geometry"))?;
        let data = &geometry.data;
        let mut config = GeometryConfig {
            primitive: data.primitive,
            positions: data.positions.clone(),
            normals: data.normals.clone(),
            uv: data.uv.clone(),
            uv2: data.uv2.clone(),
            colors: data.colors.clone(),
            indices: data.indices.clone(),
            source: None,
        };
        let what = format!("geometry.{attr}");
        match attr {
            "primitive" => config.primitive = values::parse(value, &what)?,
            "positions" => config.positions = values::parse(value, &what)?,
            "normals" => config.normals = values::parse(value, &what)?,
            "uv" => config.uv = values::parse(value, &what)?,
            "uv2" => config.uv2 = values::parse(value, &what)?,
            "colors" => config.colors = values::parse(value, &what)?,
            "indices" => config.indices = values::parse(value, &what)?,
            _ => return Err(unknown_attr("geometry", attr)),
        }
        geometry.data = GeometryData::new(config)?.into();
        Ok(DirtyLevel::Recompile)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let geometry = core.geometry().ok_or_else(|| payload_mismatch("geometry"))?;
        let data = &geometry.data;
        match attr {
            "primitive" => Ok(serde_json::to_value(data.primitive)?),
            "positions" => Ok(json!(data.positions)),
            "normals" => Ok(json!(data.normals)),
            "uv" => Ok(json!(data.uv)),
            "uv2" => Ok(json!(data.uv2)),
            "colors" => Ok(json!(data.colors)),
            "indices" => Ok(json!(data.indices)),
            "vertexCount" => Ok(json!(data.vertex_count())),
            _ => Err(unknown_attr("geometry", attr)),
        }
    }
}

/// Reads back the generated arrays of a shape node.
fn get_generated(core: &CorePayload, attr: &str, node_type: &str) -> Result<Value> {
    let geometry = core.geometry().ok_or_else(|| payload_mismatch(node_type))?;
    match attr {
        "primitive" => Ok(serde_json::to_value(geometry.data.primitive)?),
        "vertexCount" => Ok(json!(geometry.data.vertex_count())),
        _ => Err(unknown_attr(node_type, attr)),
    }
}

// ============================================================================
// geometry/box
// ============================================================================

/// A box size: one half-extent for all axes, or per axis.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum BoxSize {
    Uniform(f32),
    Axes(VecPatch),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BoxParams {
    size: Option<BoxSize>,
    wire: bool,
}

impl BoxParams {
    fn half_extents(&self) -> Vec3 {
        match self.size {
            None => Vec3::ONE,
            Some(BoxSize::Uniform(s)) => Vec3::splat(s),
            Some(BoxSize::Axes(patch)) => patch.apply(Vec3::ONE),
        }
    }
}

/// `geometry/box {size, wire}`; `size` gives half-extents.
pub struct BoxType;

impl NodeType for BoxType {
    fn type_name(&self) -> &str {
        "geometry/box"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Geometry)
    }

    fn compile_mode(&self) -> CompileMode {
        CompileMode::Geometry
    }

    fn core_id(&self, config: &NodeConfig) -> Result<Option<String>> {
        if config.core_id.is_some() {
            return Ok(config.core_id.clone());
        }
        let p: BoxParams = config.parse_params()?;
        let h = p.half_extents();
        Ok(Some(format!("box_{}_{}_{}_{}", h.x, h.y, h.z, p.wire)))
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: BoxParams = config.parse_params()?;
        Ok(CorePayload::Geometry(GeometryCore::ready(create_box(
            p.half_extents(),
            p.wire,
        ))))
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        get_generated(core, attr, "geometry/box")
    }
}

// ============================================================================
// geometry/quad
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuadParams {
    size: Option<BoxSize>,
}

impl QuadParams {
    fn half_extents(&self) -> Vec2 {
        match self.size {
            None => Vec2::ONE,
            Some(BoxSize::Uniform(s)) => Vec2::splat(s),
            Some(BoxSize::Axes(patch)) => patch.apply2(Vec2::ONE),
        }
    }
}

/// `geometry/quad {size}`: a quad in the XY plane facing +Z.
pub struct QuadType;

impl NodeType for QuadType {
    fn type_name(&self) -> &str {
        "geometry/quad"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Geometry)
    }

    fn compile_mode(&self) -> CompileMode {
        CompileMode::Geometry
    }

    fn core_id(&self, config: &NodeConfig) -> Result<Option<String>> {
        if config.core_id.is_some() {
            return Ok(config.core_id.clone());
        }
        let h = config.parse_params::<QuadParams>()?.half_extents();
        Ok(Some(format!("quad_{}_{}", h.x, h.y)))
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let h = config.parse_params::<QuadParams>()?.half_extents();
        Ok(CorePayload::Geometry(GeometryCore::ready(create_quad(h))))
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        get_generated(core, attr, "geometry/quad")
    }
}

// ============================================================================
// geometry/sphere
// ============================================================================

/// `geometry/sphere {radius, latitudeBands, longitudeBands}`.
pub struct SphereType;

impl NodeType for SphereType {
    fn type_name(&self) -> &str {
        "geometry/sphere"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Geometry)
    }

    fn compile_mode(&self) -> CompileMode {
        CompileMode::Geometry
    }

    fn core_id(&self, config: &NodeConfig) -> Result<Option<String>> {
        if config.core_id.is_some() {
            return Ok(config.core_id.clone());
        }
        let o: SphereOptions = config.parse_params()?;
        Ok(Some(format!(
            "sphere_{}_{}_{}",
            o.radius, o.latitude_bands, o.longitude_bands
        )))
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let options: SphereOptions = config.parse_params()?;
        if options.radius <= 0.0 || options.latitude_bands == 0 || options.longitude_bands == 0 {
            return Err(PrismError::IllegalNodeConfig(format!(
                "geometry/sphere: degenerate sphere {options:?}"
            )));
        }
        Ok(CorePayload::Geometry(GeometryCore::ready(create_sphere(options))))
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        get_generated(core, attr, "geometry/sphere")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Primitive;
    use crate::state::LoadState;

    fn config(value: Value) -> NodeConfig {
        NodeConfig::from_json(&value).unwrap()
    }

    #[test]
    fn equal_boxes_derive_equal_core_ids() {
        let a = BoxType
            .core_id(&config(json!({ "type": "geometry/box", "size": 2 })))
            .unwrap();
        let b = BoxType
            .core_id(&config(json!({ "type": "geometry/box", "size": { "x": 2, "y": 2, "z": 2 } })))
            .unwrap();
        let wire = BoxType
            .core_id(&config(json!({ "type": "geometry/box", "size": 2, "wire": true })))
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, wire);
    }

    #[test]
    fn sourced_geometry_starts_pending() {
        let core = GeometryType
            .init_core(&config(json!({ "type": "geometry", "source": "teapot.json" })))
            .unwrap();
        assert_eq!(core.load_state(), LoadState::Pending);
    }

    #[test]
    fn replacing_arrays_recompiles_and_validates() {
        let mut core = GeometryType
            .init_core(&config(json!({
                "type": "geometry",
                "positions": [0, 0, 0, 1, 0, 0, 0, 1, 0],
                "indices": [0, 1, 2],
            })))
            .unwrap();
        assert_eq!(
            GeometryType.set(&mut core, "primitive", &json!("lines")).unwrap(),
            DirtyLevel::Recompile
        );
        assert_eq!(GeometryType.get(&core, "primitive").unwrap(), json!("lines"));
        assert!(GeometryType.set(&mut core, "indices", &json!([0, 1, 9])).is_err());
        assert_eq!(core.geometry().unwrap().data.primitive, Primitive::Lines);
    }
}
