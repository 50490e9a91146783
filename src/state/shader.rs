//! Custom shader cores.
//!
//! A shader node contributes GLSL code per stage plus a map from hook point
//! to the name of a function in that code. Shader cores stack: the program
//! for an object merges every shader core on the stack, concatenating code
//! and letting inner bindings of the same hook win.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{PrismError, Result};
use crate::gpu::UniformValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Hook points of the vertex stage, in the order the generated shader
/// calls them.
pub const VERTEX_HOOKS: &[&str] = &[
    "modelPos",
    "modelNormal",
    "worldPos",
    "viewMatrix",
    "viewPos",
    "projMatrix",
];

/// Hook points of the fragment stage, in call order.
pub const FRAGMENT_HOOKS: &[&str] = &[
    "worldPosClip",
    "viewPosClip",
    "texturePos",
    "worldPos",
    "viewPos",
    "worldEyeVec",
    "worldNormal",
    "viewNormal",
    "materialBaseColor",
    "materialAlpha",
    "materialEmit",
    "materialSpecular",
    "materialSpecularColor",
    "materialShine",
    "pixelColor",
];

impl ShaderStage {
    #[must_use]
    pub fn hooks(self) -> &'static [&'static str] {
        match self {
            Self::Vertex => VERTEX_HOOKS,
            Self::Fragment => FRAGMENT_HOOKS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CodeLines {
    Lines(Vec<String>),
    Text(String),
}

impl Default for CodeLines {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl CodeLines {
    #[must_use]
    pub fn into_source(self) -> String {
        match self {
            Self::Lines(lines) => lines.join("\n"),
            Self::Text(text) => text,
        }
    }
}

/// One entry of a shader node's `shaders` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ShaderSourceConfig {
    pub stage: ShaderStage,
    #[serde(default)]
    pub code: CodeLines,
    #[serde(default)]
    pub hooks: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageCode {
    pub code: String,
    /// `None` when the config gave no `hooks`; code without hooks replaces
    /// the generated stage entirely.
    pub hooks: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderCore {
    pub vertex: StageCode,
    pub fragment: StageCode,
    pub params: BTreeMap<String, UniformValue>,
}

impl ShaderCore {
    /// Builds a core from a node's `shaders` array, rejecting unknown hook
    /// points.
    pub fn from_sources(sources: Vec<ShaderSourceConfig>) -> Result<Self> {
        let mut core = Self::default();
        for source in sources {
            if let Some(hooks) = &source.hooks {
                if let Some(bad) = hooks.keys().find(|h| !source.stage.hooks().contains(&h.as_str()))
                {
                    return Err(PrismError::IllegalNodeConfig(format!(
                        "shader: unknown {:?} hook '{bad}'",
                        source.stage
                    )));
                }
            }
            let target = match source.stage {
                ShaderStage::Vertex => &mut core.vertex,
                ShaderStage::Fragment => &mut core.fragment,
            };
            if !target.code.is_empty() {
                target.code.push('\n');
            }
            target.code.push_str(&source.code.into_source());
            if let Some(hooks) = source.hooks {
                target.hooks.get_or_insert_with(BTreeMap::new).extend(hooks);
            }
        }
        Ok(core)
    }

    pub fn set_params(&mut self, params: &serde_json::Map<String, Value>) -> Result<()> {
        self.params.extend(parse_params(params)?);
        Ok(())
    }
}

/// Overrides shader params for everything below a `shaderParams` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderParamsCore {
    pub params: BTreeMap<String, UniformValue>,
}

/// Converts a JSON param map into uniform values.
pub fn parse_params(
    params: &serde_json::Map<String, Value>,
) -> Result<BTreeMap<String, UniformValue>> {
    params
        .iter()
        .map(|(name, value)| {
            UniformValue::from_json(value)
                .map(|v| (name.clone(), v))
                .ok_or_else(|| {
                    PrismError::IllegalNodeConfig(format!(
                        "shader param '{name}' has unsupported value {value}"
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sources_merge_per_stage() {
        let sources: Vec<ShaderSourceConfig> = serde_json::from_value(json!([
            { "stage": "fragment", "code": ["float a;"], "hooks": { "worldPos": "f" } },
            { "stage": "fragment", "code": "float b;", "hooks": { "pixelColor": "g" } },
        ]))
        .unwrap();
        let core = ShaderCore::from_sources(sources).unwrap();
        assert_eq!(core.fragment.code, "float a;\nfloat b;");
        assert_eq!(core.fragment.hooks.as_ref().map(BTreeMap::len), Some(2));
        assert!(core.vertex.hooks.is_none());
    }

    #[test]
    fn unknown_hooks_are_rejected() {
        let sources: Vec<ShaderSourceConfig> = serde_json::from_value(json!([
            { "stage": "vertex", "code": "", "hooks": { "materialBaseColor": "f" } },
        ]))
        .unwrap();
        assert!(matches!(
            ShaderCore::from_sources(sources),
            Err(PrismError::IllegalNodeConfig(_))
        ));
    }
}
