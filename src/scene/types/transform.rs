//! Modelling transform node types: `rotate`, `translate`, `scale`,
//! `matrix` and `quaternion`. All five carry a transform core.

use glam::{Mat4, Quat, Vec3};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{PrismError, Result};
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::values::{self, VecPatch};
use crate::state::{CoreKind, CorePayload, LocalTransform, MultOrder, TransformCore};

fn transform_mut<'a>(core: &'a mut CorePayload, node_type: &str) -> Result<&'a mut TransformCore> {
    core.transform_mut().ok_or_else(|| payload_mismatch(node_type))
}

fn transform<'a>(core: &'a CorePayload, node_type: &str) -> Result<&'a TransformCore> {
    core.transform().ok_or_else(|| payload_mismatch(node_type))
}

fn core(local: LocalTransform, mult_order: MultOrder) -> CorePayload {
    CorePayload::Transform(TransformCore::new(local, mult_order))
}

/// Attributes every transform node answers.
fn get_common(t: &TransformCore, attr: &str) -> Option<Value> {
    match attr {
        "matrix" => Some(json!(t.local_matrix.to_cols_array())),
        "worldMatrix" => Some(json!(t.world_matrix.to_cols_array())),
        "normalMatrix" => Some(json!(t.normal_matrix.to_cols_array())),
        "multOrder" => serde_json::to_value(t.mult_order).ok(),
        _ => None,
    }
}

fn set_mult_order(t: &mut TransformCore, value: &Value, node_type: &str) -> Result<DirtyLevel> {
    t.set_mult_order(values::parse(value, &format!("{node_type}.multOrder"))?);
    Ok(DirtyLevel::Image)
}

fn rotation(angle: f32, axis: Vec3) -> Result<LocalTransform> {
    if axis.length_squared() == 0.0 {
        return Err(PrismError::IllegalNodeConfig(
            "rotate: rotation axis is zero".into(),
        ));
    }
    Ok(LocalTransform::Rotate { angle, axis })
}

// ============================================================================
// rotate
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RotateParams {
    angle: f32,
    x: f32,
    y: f32,
    z: f32,
    mult_order: MultOrder,
}

/// `rotate {angle, x, y, z, multOrder}`; the angle is in degrees.
pub struct RotateType;

impl NodeType for RotateType {
    fn type_name(&self) -> &str {
        "rotate"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Transform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: RotateParams = config.parse_params()?;
        Ok(core(rotation(p.angle, Vec3::new(p.x, p.y, p.z))?, p.mult_order))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let t = transform_mut(core, "rotate")?;
        let LocalTransform::Rotate { mut angle, mut axis } = t.local else {
            return Err(payload_mismatch("rotate"));
        };
        match attr {
            "angle" => angle = values::number(value, "rotate.angle")?,
            "incAngle" => angle += values::number(value, "rotate.incAngle")?,
            "x" => axis.x = values::number(value, "rotate.x")?,
            "y" => axis.y = values::number(value, "rotate.y")?,
            "z" => axis.z = values::number(value, "rotate.z")?,
            "xyz" => axis = VecPatch::from_json(value)?.apply(axis),
            "multOrder" => return set_mult_order(t, value, "rotate"),
            _ => return Err(unknown_attr("rotate", attr)),
        }
        t.set_local(rotation(angle, axis)?);
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let t = transform(core, "rotate")?;
        let LocalTransform::Rotate { angle, axis } = t.local else {
            return Err(payload_mismatch("rotate"));
        };
        let value = match attr {
            "angle" => json!(angle),
            "x" => json!(axis.x),
            "y" => json!(axis.y),
            "z" => json!(axis.z),
            "xyz" => values::vec_json(axis),
            _ => get_common(t, attr).ok_or_else(|| unknown_attr("rotate", attr))?,
        };
        Ok(value)
    }
}

// ============================================================================
// translate / scale
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VectorParams {
    #[serde(flatten)]
    xyz: VecPatch,
    mult_order: MultOrder,
}

fn set_vector(
    t: &mut TransformCore,
    current: Vec3,
    attr: &str,
    value: &Value,
    node_type: &str,
) -> Result<Option<Vec3>> {
    let what = format!("{node_type}.{attr}");
    let v = match attr {
        "x" => Vec3::new(values::number(value, &what)?, current.y, current.z),
        "y" => Vec3::new(current.x, values::number(value, &what)?, current.z),
        "z" => Vec3::new(current.x, current.y, values::number(value, &what)?),
        "xyz" => VecPatch::from_json(value)?.apply(current),
        "multOrder" => {
            set_mult_order(t, value, node_type)?;
            return Ok(None);
        }
        _ => return Err(unknown_attr(node_type, attr)),
    };
    Ok(Some(v))
}

fn get_vector(t: &TransformCore, v: Vec3, attr: &str, node_type: &str) -> Result<Value> {
    Ok(match attr {
        "x" => json!(v.x),
        "y" => json!(v.y),
        "z" => json!(v.z),
        "xyz" => values::vec_json(v),
        _ => get_common(t, attr).ok_or_else(|| unknown_attr(node_type, attr))?,
    })
}

/// `translate {x, y, z, multOrder}`.
pub struct TranslateType;

impl NodeType for TranslateType {
    fn type_name(&self) -> &str {
        "translate"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Transform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: VectorParams = config.parse_params()?;
        Ok(core(LocalTransform::Translate(p.xyz.apply(Vec3::ZERO)), p.mult_order))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let t = transform_mut(core, "translate")?;
        let LocalTransform::Translate(current) = t.local else {
            return Err(payload_mismatch("translate"));
        };
        if let Some(v) = set_vector(t, current, attr, value, "translate")? {
            t.set_local(LocalTransform::Translate(v));
        }
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let t = transform(core, "translate")?;
        let LocalTransform::Translate(v) = t.local else {
            return Err(payload_mismatch("translate"));
        };
        get_vector(t, v, attr, "translate")
    }
}

/// `scale {x, y, z, multOrder}`; missing factors are 1.
pub struct ScaleType;

impl NodeType for ScaleType {
    fn type_name(&self) -> &str {
        "scale"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Transform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: VectorParams = config.parse_params()?;
        Ok(core(LocalTransform::Scale(p.xyz.apply(Vec3::ONE)), p.mult_order))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let t = transform_mut(core, "scale")?;
        let LocalTransform::Scale(current) = t.local else {
            return Err(payload_mismatch("scale"));
        };
        if let Some(v) = set_vector(t, current, attr, value, "scale")? {
            t.set_local(LocalTransform::Scale(v));
        }
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let t = transform(core, "scale")?;
        let LocalTransform::Scale(v) = t.local else {
            return Err(payload_mismatch("scale"));
        };
        get_vector(t, v, attr, "scale")
    }
}

// ============================================================================
// matrix
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MatrixParams {
    elements: Option<Vec<f32>>,
    mult_order: MultOrder,
}

fn matrix_from(elements: &[f32]) -> Result<Mat4> {
    if elements.len() != 16 {
        return Err(PrismError::IllegalNodeConfig(format!(
            "matrix: expected 16 elements, got {}",
            elements.len()
        )));
    }
    Ok(Mat4::from_cols_slice(elements))
}

/// `matrix {elements, multOrder}`; elements are column-major.
pub struct MatrixType;

impl NodeType for MatrixType {
    fn type_name(&self) -> &str {
        "matrix"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Transform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: MatrixParams = config.parse_params()?;
        let m = match p.elements {
            Some(elements) => matrix_from(&elements)?,
            None => Mat4::IDENTITY,
        };
        Ok(core(LocalTransform::Matrix(m), p.mult_order))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let t = transform_mut(core, "matrix")?;
        match attr {
            "elements" => {
                let elements: Vec<f32> = values::parse(value, "matrix.elements")?;
                t.set_local(LocalTransform::Matrix(matrix_from(&elements)?));
                Ok(DirtyLevel::Image)
            }
            "multOrder" => set_mult_order(t, value, "matrix"),
            _ => Err(unknown_attr("matrix", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let t = transform(core, "matrix")?;
        match attr {
            "elements" => Ok(json!(t.local_matrix.to_cols_array())),
            _ => get_common(t, attr).ok_or_else(|| unknown_attr("matrix", attr)),
        }
    }
}

// ============================================================================
// quaternion
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuaternionParams {
    x: f32,
    y: f32,
    z: f32,
    w: f32,
    mult_order: MultOrder,
}

impl Default for QuaternionParams {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
            mult_order: MultOrder::Post,
        }
    }
}

fn quaternion(q: Quat) -> Result<LocalTransform> {
    if q.length_squared() == 0.0 {
        return Err(PrismError::IllegalNodeConfig(
            "quaternion: zero quaternion".into(),
        ));
    }
    Ok(LocalTransform::Quaternion(q))
}

/// `quaternion {x, y, z, w}`. `rotation {x, y, z, angle}` composes a
/// further rotation onto the current one.
pub struct QuaternionType;

impl NodeType for QuaternionType {
    fn type_name(&self) -> &str {
        "quaternion"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Transform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: QuaternionParams = config.parse_params()?;
        Ok(core(quaternion(Quat::from_xyzw(p.x, p.y, p.z, p.w))?, p.mult_order))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let t = transform_mut(core, "quaternion")?;
        let LocalTransform::Quaternion(mut q) = t.local else {
            return Err(payload_mismatch("quaternion"));
        };
        let what = format!("quaternion.{attr}");
        match attr {
            "x" => q.x = values::number(value, &what)?,
            "y" => q.y = values::number(value, &what)?,
            "z" => q.z = values::number(value, &what)?,
            "w" => q.w = values::number(value, &what)?,
            "rotation" => {
                #[derive(Deserialize)]
                struct Rotation {
                    #[serde(flatten)]
                    axis: VecPatch,
                    angle: f32,
                }
                let r: Rotation = values::parse(value, &what)?;
                let axis = r.axis.apply(Vec3::ZERO);
                if axis.length_squared() == 0.0 {
                    return Err(PrismError::IllegalNodeConfig(
                        "quaternion.rotation: rotation axis is zero".into(),
                    ));
                }
                q = Quat::from_axis_angle(axis.normalize(), r.angle.to_radians()) * q;
            }
            "multOrder" => return set_mult_order(t, value, "quaternion"),
            _ => return Err(unknown_attr("quaternion", attr)),
        }
        t.set_local(quaternion(q)?);
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let t = transform(core, "quaternion")?;
        let LocalTransform::Quaternion(q) = t.local else {
            return Err(payload_mismatch("quaternion"));
        };
        match attr {
            "x" => Ok(json!(q.x)),
            "y" => Ok(json!(q.y)),
            "z" => Ok(json!(q.z)),
            "w" => Ok(json!(q.w)),
            _ => get_common(t, attr).ok_or_else(|| unknown_attr("quaternion", attr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(node_type: &str, params: Value) -> NodeConfig {
        let mut value = params;
        value["type"] = json!(node_type);
        NodeConfig::from_json(&value).unwrap()
    }

    #[test]
    fn zero_rotation_axis_is_rejected() {
        let err = RotateType
            .init_core(&config("rotate", json!({ "angle": 45 })))
            .unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));

        let mut core = RotateType
            .init_core(&config("rotate", json!({ "angle": 45, "y": 1 })))
            .unwrap();
        assert!(RotateType.set(&mut core, "y", &json!(0)).is_err());
    }

    #[test]
    fn illegal_mult_order_is_rejected() {
        let err = TranslateType
            .init_core(&config("translate", json!({ "x": 1, "multOrder": "sideways" })))
            .unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
    }

    #[test]
    fn matrix_needs_sixteen_elements() {
        let err = MatrixType
            .init_core(&config("matrix", json!({ "elements": [1, 0, 0] })))
            .unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
    }

    #[test]
    fn translate_setters_keep_other_components() {
        let mut core = TranslateType
            .init_core(&config("translate", json!({ "x": 1, "y": 2, "z": 3 })))
            .unwrap();
        assert_eq!(TranslateType.set(&mut core, "y", &json!(5)).unwrap(), DirtyLevel::Image);
        assert_eq!(
            TranslateType.get(&core, "xyz").unwrap(),
            json!({ "x": 1.0, "y": 5.0, "z": 3.0 })
        );
    }

    #[test]
    fn scale_defaults_to_one() {
        let core = ScaleType.init_core(&config("scale", json!({ "x": 2 }))).unwrap();
        assert_eq!(ScaleType.get(&core, "y").unwrap(), json!(1.0));
    }
}
