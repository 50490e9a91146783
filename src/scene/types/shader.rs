//! `shader` and `shaderParams` node types.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::uniform_json;
use crate::errors::{PrismError, Result};
use crate::gpu::UniformValue;
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::shader::{ShaderSourceConfig, parse_params};
use crate::state::values;
use crate::state::{CoreKind, CorePayload, ShaderCore, ShaderParamsCore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShaderParams {
    shaders: Vec<ShaderSourceConfig>,
    params: Map<String, Value>,
}

fn params_map(value: &Value, what: &str) -> Result<Map<String, Value>> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{what}: expected an object, got {value}")))
}

fn params_json(params: &BTreeMap<String, UniformValue>) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(name, v)| (name.clone(), uniform_json(v)))
            .collect(),
    )
}

/// Merges new values in. Names the chunks have not looked up yet need a
/// chunk rebuild; known names only need a redraw.
fn merge_params(
    params: &mut BTreeMap<String, UniformValue>,
    value: &Value,
    what: &str,
) -> Result<DirtyLevel> {
    let update = parse_params(&params_map(value, what)?)?;
    let added = update.keys().any(|name| !params.contains_key(name));
    params.extend(update);
    Ok(if added {
        DirtyLevel::Uniforms
    } else {
        DirtyLevel::Image
    })
}

/// `shader {shaders, params}`: custom GLSL bound to pipeline hooks, with
/// uniforms set generically from `params`.
pub struct ShaderType;

impl NodeType for ShaderType {
    fn type_name(&self) -> &str {
        "shader"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Shader)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: ShaderParams = config.parse_params()?;
        let mut core = ShaderCore::from_sources(p.shaders)?;
        core.set_params(&p.params)?;
        Ok(CorePayload::Shader(core))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let shader = core.shader_mut().ok_or_else(|| payload_mismatch("shader"))?;
        match attr {
            "params" => merge_params(&mut shader.params, value, "shader.params"),
            "shaders" => {
                let sources: Vec<ShaderSourceConfig> = values::parse(value, "shader.shaders")?;
                let params = std::mem::take(&mut shader.params);
                *shader = ShaderCore::from_sources(sources)?;
                shader.params = params;
                Ok(DirtyLevel::Recompile)
            }
            _ => Err(unknown_attr("shader", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let shader = core.shader().ok_or_else(|| payload_mismatch("shader"))?;
        match attr {
            "params" => Ok(params_json(&shader.params)),
            _ => Err(unknown_attr("shader", attr)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShaderParamsParams {
    params: Map<String, Value>,
}

/// `shaderParams {params}`: overrides the params of enclosing shaders for
/// everything below it.
pub struct ShaderParamsType;

impl NodeType for ShaderParamsType {
    fn type_name(&self) -> &str {
        "shaderParams"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::ShaderParams)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: ShaderParamsParams = config.parse_params()?;
        Ok(CorePayload::ShaderParams(ShaderParamsCore {
            params: parse_params(&p.params)?,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core
            .shader_params_mut()
            .ok_or_else(|| payload_mismatch("shaderParams"))?;
        match attr {
            "params" => merge_params(&mut core.params, value, "shaderParams.params"),
            _ => Err(unknown_attr("shaderParams", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core
            .shader_params()
            .ok_or_else(|| payload_mismatch("shaderParams"))?;
        match attr {
            "params" => Ok(params_json(&core.params)),
            _ => Err(unknown_attr("shaderParams", attr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_param_names_need_a_chunk_rebuild() {
        let config = NodeConfig::from_json(&json!({
            "type": "shader",
            "shaders": [{ "stage": "fragment", "code": "uniform float uA;" }],
            "params": { "uA": 1.0 },
        }))
        .unwrap();
        let mut core = ShaderType.init_core(&config).unwrap();
        assert_eq!(
            ShaderType.set(&mut core, "params", &json!({ "uA": 2.0 })).unwrap(),
            DirtyLevel::Image
        );
        assert_eq!(
            ShaderType.set(&mut core, "params", &json!({ "uB": [1, 2, 3] })).unwrap(),
            DirtyLevel::Uniforms
        );
        assert_eq!(
            ShaderType.get(&core, "params").unwrap(),
            json!({ "uA": 2.0, "uB": [1.0, 2.0, 3.0] })
        );
    }

    #[test]
    fn replacing_code_keeps_params() {
        let config = NodeConfig::from_json(&json!({
            "type": "shader",
            "params": { "uA": 1.0 },
        }))
        .unwrap();
        let mut core = ShaderType.init_core(&config).unwrap();
        let level = ShaderType
            .set(&mut core, "shaders", &json!([{ "stage": "vertex", "code": "// v" }]))
            .unwrap();
        assert_eq!(level, DirtyLevel::Recompile);
        let shader = core.shader().unwrap();
        assert_eq!(shader.vertex.code, "// v");
        assert!(shader.params.contains_key("uA"));
    }
}
