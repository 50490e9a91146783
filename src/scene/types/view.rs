//! `lookAt` and `camera` node types.

use serde::Deserialize;
use serde_json::{Value, json};

use super::merge_patch;
use crate::errors::Result;
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::values::{self, VecPatch};
use crate::state::{CoreKind, CorePayload, Optics, ProjectionCore, ViewCore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LookAtParams {
    eye: VecPatch,
    look: VecPatch,
    up: VecPatch,
}

/// `lookAt {eye, look, up}`.
pub struct LookAtType;

impl NodeType for LookAtType {
    fn type_name(&self) -> &str {
        "lookAt"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::ViewTransform)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: LookAtParams = config.parse_params()?;
        let d = ViewCore::default();
        let view = ViewCore::new(p.eye.apply(d.eye), p.look.apply(d.look), p.up.apply(d.up))?;
        Ok(CorePayload::ViewTransform(view))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let view = core.view_mut().ok_or_else(|| payload_mismatch("lookAt"))?;
        let mut next = view.clone();
        match attr {
            "eye" => next.eye = VecPatch::from_json(value)?.apply(view.eye),
            "look" => next.look = VecPatch::from_json(value)?.apply(view.look),
            "up" => next.up = VecPatch::from_json(value)?.apply(view.up),
            _ => return Err(unknown_attr("lookAt", attr)),
        }
        next.validate()?;
        next.rebuild();
        *view = next;
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let view = core.view().ok_or_else(|| payload_mismatch("lookAt"))?;
        match attr {
            "eye" => Ok(values::vec_json(view.eye)),
            "look" => Ok(values::vec_json(view.look)),
            "up" => Ok(values::vec_json(view.up)),
            "matrix" => Ok(json!(view.matrix.to_cols_array())),
            _ => Err(unknown_attr("lookAt", attr)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CameraParams {
    optics: Optics,
}

/// `camera {optics}`. Setting `optics` overlays only the fields given.
pub struct CameraType;

impl NodeType for CameraType {
    fn type_name(&self) -> &str {
        "camera"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Projection)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: CameraParams = config.parse_params()?;
        p.optics.validate()?;
        Ok(CorePayload::Projection(ProjectionCore { optics: p.optics }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let projection = core.projection_mut().ok_or_else(|| payload_mismatch("camera"))?;
        if attr != "optics" {
            return Err(unknown_attr("camera", attr));
        }
        let optics: Optics = merge_patch(&projection.optics, "optics", attr, value, "camera")?;
        optics.validate()?;
        projection.optics = optics;
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let projection = core.projection().ok_or_else(|| payload_mismatch("camera"))?;
        match attr {
            "optics" => Ok(serde_json::to_value(projection.optics)?),
            _ => Err(unknown_attr("camera", attr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PrismError;
    use crate::state::OpticsKind;

    #[test]
    fn optics_patch_keeps_unset_fields() {
        let config = NodeConfig::from_json(&json!({
            "type": "camera",
            "optics": { "type": "perspective", "fovy": 45, "near": 0.5, "far": 100 },
        }))
        .unwrap();
        let mut core = CameraType.init_core(&config).unwrap();
        CameraType.set(&mut core, "optics", &json!({ "far": 200 })).unwrap();
        let optics = core.projection().unwrap().optics;
        assert_eq!(optics.kind, OpticsKind::Perspective);
        assert_eq!(optics.fovy, 45.0);
        assert_eq!(optics.far, 200.0);

        let err = CameraType.set(&mut core, "optics", &json!({ "near": 500 })).unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
        assert_eq!(core.projection().unwrap().optics.far, 200.0);
    }

    #[test]
    fn degenerate_eye_update_leaves_view_untouched() {
        let config = NodeConfig::from_json(&json!({
            "type": "lookAt", "eye": { "z": 10 }, "look": { "y": 0 },
        }))
        .unwrap();
        let mut core = LookAtType.init_core(&config).unwrap();
        assert!(LookAtType.set(&mut core, "eye", &json!({ "z": 0 })).is_err());
        assert_eq!(core.view().unwrap().eye.z, 10.0);
    }
}
