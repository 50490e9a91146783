//! Node types that steer what is drawn and how: `clips`, `flags`,
//! `enable`, `layer`, `stage`, `tag`, `name`, render targets and the
//! depth, colour and stencil buffer nodes.

use serde::Deserialize;
use serde_json::{Value, json};

use super::merge_patch;
use crate::errors::{PrismError, Result};
use crate::scene::config::NodeConfig;
use crate::scene::node_type::{DirtyLevel, NodeType, payload_mismatch, unknown_attr};
use crate::state::clips::ClipConfig;
use crate::state::values;
use crate::state::{
    Clip, ClipsCore, ColorBufferCore, CoreKind, CorePayload, DepthBufferCore, EnableCore, Flags,
    FlagsCore, LayerCore, NameCore, RenderTargetCore, StageCore, StencilBufferCore, TagCore,
    TargetKind,
};

// ============================================================================
// clips
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClipsParams {
    clips: Vec<ClipConfig>,
}

/// `clips {clips: [{mode, normal, dist}]}`.
pub struct ClipsType;

impl NodeType for ClipsType {
    fn type_name(&self) -> &str {
        "clips"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Clips)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: ClipsParams = config.parse_params()?;
        Ok(CorePayload::Clips(ClipsCore {
            clips: p.clips.into_iter().map(Clip::from).collect(),
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let clips = core.clips_mut().ok_or_else(|| payload_mismatch("clips"))?;
        if attr != "clips" {
            return Err(unknown_attr("clips", attr));
        }
        let count = clips.clips.len();
        match value {
            Value::Array(_) => {
                let configs: Vec<ClipConfig> = values::parse(value, "clips")?;
                clips.clips = configs.into_iter().map(Clip::from).collect();
            }
            Value::Object(updates) => {
                let mut next = clips.clips.clone();
                for (key, update) in updates {
                    let slot = key
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| next.get_mut(i))
                        .ok_or_else(|| {
                            PrismError::IllegalNodeConfig(format!("clips: no clip at index '{key}'"))
                        })?;
                    *slot = Clip::from(values::parse::<ClipConfig>(update, "clips")?);
                }
                clips.clips = next;
            }
            _ => {
                return Err(PrismError::IllegalNodeConfig(format!(
                    "clips: expected an array or an index map, got {value}"
                )));
            }
        }
        Ok(if clips.clips.len() == count {
            DirtyLevel::Image
        } else {
            DirtyLevel::Recompile
        })
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let clips = core.clips().ok_or_else(|| payload_mismatch("clips"))?;
        match attr {
            "clips" => Ok(clips
                .clips
                .iter()
                .map(|c| {
                    json!({
                        "mode": c.mode,
                        "normal": values::vec_json(c.normal),
                        "dist": c.dist,
                    })
                })
                .collect()),
            _ => Err(unknown_attr("clips", attr)),
        }
    }
}

// ============================================================================
// flags
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlagsParams {
    flags: Option<Value>,
}

/// How much a flags change costs the display.
fn flags_dirty(before: &Flags, after: &Flags) -> DirtyLevel {
    let mut level = DirtyLevel::Image;
    if before.enabled != after.enabled || before.picking != after.picking {
        level = level.max(DirtyLevel::DrawList);
    }
    if before.transparent != after.transparent {
        level = level.max(DirtyLevel::StateOrder);
    }
    level
}

/// `flags {flags: {...}}`. Setting `flags` overlays the given fields;
/// setting a single field by name works too.
pub struct FlagsType;

impl NodeType for FlagsType {
    fn type_name(&self) -> &str {
        "flags"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Flags)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: FlagsParams = config.parse_params()?;
        let flags = match p.flags {
            Some(patch) => merge_patch(&Flags::default(), "flags", "flags", &patch, "flags")?,
            None => Flags::default(),
        };
        Ok(CorePayload::Flags(FlagsCore { flags }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.flags_mut().ok_or_else(|| payload_mismatch("flags"))?;
        let flags: Flags = merge_patch(&core.flags, "flags", attr, value, "flags")?;
        let level = flags_dirty(&core.flags, &flags);
        core.flags = flags;
        Ok(level)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.flags().ok_or_else(|| payload_mismatch("flags"))?;
        let all = serde_json::to_value(core.flags)?;
        if attr == "flags" {
            return Ok(all);
        }
        all.get(attr).cloned().ok_or_else(|| unknown_attr("flags", attr))
    }
}

// ============================================================================
// enable / layer / stage
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EnableParams {
    enabled: bool,
}

impl Default for EnableParams {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `enable {enabled}`. Disabling drops objects from the draw list without
/// destroying them.
pub struct EnableType;

impl NodeType for EnableType {
    fn type_name(&self) -> &str {
        "enable"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Enable)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: EnableParams = config.parse_params()?;
        Ok(CorePayload::Enable(EnableCore { enabled: p.enabled }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.enable_mut().ok_or_else(|| payload_mismatch("enable"))?;
        match attr {
            "enabled" => core.enabled = values::boolean(value, "enable.enabled")?,
            _ => return Err(unknown_attr("enable", attr)),
        }
        Ok(DirtyLevel::DrawList)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.enable().ok_or_else(|| payload_mismatch("enable"))?;
        match attr {
            "enabled" => Ok(json!(core.enabled)),
            _ => Err(unknown_attr("enable", attr)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LayerParams {
    priority: i64,
    enabled: bool,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self {
            priority: 0,
            enabled: true,
        }
    }
}

/// `layer {priority, enabled}`.
pub struct LayerType;

impl NodeType for LayerType {
    fn type_name(&self) -> &str {
        "layer"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Layer)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: LayerParams = config.parse_params()?;
        Ok(CorePayload::Layer(LayerCore {
            priority: p.priority,
            enabled: p.enabled,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.layer_mut().ok_or_else(|| payload_mismatch("layer"))?;
        match attr {
            "priority" => {
                core.priority = values::integer(value, "layer.priority")?;
                Ok(DirtyLevel::StateOrder)
            }
            "enabled" => {
                core.enabled = values::boolean(value, "layer.enabled")?;
                Ok(DirtyLevel::DrawList)
            }
            _ => Err(unknown_attr("layer", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.layer().ok_or_else(|| payload_mismatch("layer"))?;
        match attr {
            "priority" => Ok(json!(core.priority)),
            "enabled" => Ok(json!(core.enabled)),
            _ => Err(unknown_attr("layer", attr)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StageParams {
    priority: i64,
    pickable: bool,
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            priority: 0,
            pickable: true,
        }
    }
}

/// `stage {priority, pickable}`.
pub struct StageType;

impl NodeType for StageType {
    fn type_name(&self) -> &str {
        "stage"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Stage)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: StageParams = config.parse_params()?;
        Ok(CorePayload::Stage(StageCore {
            priority: p.priority,
            pickable: p.pickable,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.stage_mut().ok_or_else(|| payload_mismatch("stage"))?;
        match attr {
            "priority" => {
                core.priority = values::integer(value, "stage.priority")?;
                Ok(DirtyLevel::StateOrder)
            }
            "pickable" => {
                core.pickable = values::boolean(value, "stage.pickable")?;
                Ok(DirtyLevel::DrawList)
            }
            _ => Err(unknown_attr("stage", attr)),
        }
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.stage().ok_or_else(|| payload_mismatch("stage"))?;
        match attr {
            "priority" => Ok(json!(core.priority)),
            "pickable" => Ok(json!(core.pickable)),
            _ => Err(unknown_attr("stage", attr)),
        }
    }
}

// ============================================================================
// tag / name
// ============================================================================

fn string_param(config: &NodeConfig, name: &str) -> Result<String> {
    config
        .parse_param::<String>(name)?
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{}: '{name}' is required", config.node_type)))
}

fn string_value(value: &Value, what: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{what}: expected a string, got {value}")))
}

/// `tag {tag}`, matched against the display's tag selector.
pub struct TagType;

impl NodeType for TagType {
    fn type_name(&self) -> &str {
        "tag"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Tag)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        Ok(CorePayload::Tag(TagCore {
            tag: string_param(config, "tag")?,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.tag_mut().ok_or_else(|| payload_mismatch("tag"))?;
        match attr {
            "tag" => core.tag = string_value(value, "tag.tag")?,
            _ => return Err(unknown_attr("tag", attr)),
        }
        Ok(DirtyLevel::DrawList)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.tag().ok_or_else(|| payload_mismatch("tag"))?;
        match attr {
            "tag" => Ok(json!(core.tag)),
            _ => Err(unknown_attr("tag", attr)),
        }
    }
}

/// `name {name}`; names from the root down form a pick hit's path.
pub struct NameType;

impl NodeType for NameType {
    fn type_name(&self) -> &str {
        "name"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Name)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        Ok(CorePayload::Name(NameCore {
            name: string_param(config, "name")?,
        }))
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        let core = core.name_mut().ok_or_else(|| payload_mismatch("name"))?;
        match attr {
            "name" => core.name = string_value(value, "name.name")?,
            _ => return Err(unknown_attr("name", attr)),
        }
        // Paths are captured per object at compile.
        Ok(DirtyLevel::Recompile)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let core = core.name().ok_or_else(|| payload_mismatch("name"))?;
        match attr {
            "name" => Ok(json!(core.name)),
            _ => Err(unknown_attr("name", attr)),
        }
    }
}

// ============================================================================
// colorTarget / depthTarget
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TargetParams {
    width: Option<u32>,
    height: Option<u32>,
}

/// `colorTarget` and `depthTarget`: objects below render off-screen into a
/// buffer that a texture layer can sample with `{target: "<node id>"}`.
pub struct RenderTargetType {
    name: &'static str,
    kind: TargetKind,
}

impl RenderTargetType {
    #[must_use]
    pub const fn new(name: &'static str, kind: TargetKind) -> Self {
        Self { name, kind }
    }
}

impl NodeType for RenderTargetType {
    fn type_name(&self) -> &str {
        self.name
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::RenderTarget)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        let p: TargetParams = config.parse_params()?;
        let size = match (p.width, p.height) {
            (Some(w), Some(h)) => Some((w, h)),
            (None, None) => None,
            _ => {
                return Err(PrismError::IllegalNodeConfig(format!(
                    "{}: width and height go together",
                    self.name
                )));
            }
        };
        Ok(CorePayload::RenderTarget(RenderTargetCore::new(self.kind, size)))
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let target = core.render_target().ok_or_else(|| payload_mismatch(self.name))?;
        match attr {
            "size" => Ok(target.size.map_or(Value::Null, |(w, h)| json!([w, h]))),
            _ => Err(unknown_attr(self.name, attr)),
        }
    }
}

// ============================================================================
// depthBuffer / colorBuffer / stencilBuffer
// ============================================================================

/// `depthBuffer`, `colorBuffer` and `stencilBuffer`. Their configs are the
/// serialized core itself; any field can be set by name.
pub struct BufferType {
    name: &'static str,
    kind: CoreKind,
}

impl BufferType {
    #[must_use]
    pub const fn new(name: &'static str, kind: CoreKind) -> Self {
        Self { name, kind }
    }
}

impl NodeType for BufferType {
    fn type_name(&self) -> &str {
        self.name
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(self.kind)
    }

    fn init_core(&self, config: &NodeConfig) -> Result<CorePayload> {
        match self.kind {
            CoreKind::DepthBuffer => Ok(CorePayload::DepthBuffer(config.parse_params()?)),
            CoreKind::ColorBuffer => Ok(CorePayload::ColorBuffer(config.parse_params()?)),
            CoreKind::StencilBuffer => Ok(CorePayload::StencilBuffer(config.parse_params()?)),
            _ => Err(payload_mismatch(self.name)),
        }
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> Result<DirtyLevel> {
        match core {
            CorePayload::DepthBuffer(d) => {
                *d = merge_patch::<DepthBufferCore>(d, "", attr, value, self.name)?;
            }
            CorePayload::ColorBuffer(c) => {
                *c = merge_patch::<ColorBufferCore>(c, "", attr, value, self.name)?;
            }
            CorePayload::StencilBuffer(s) => {
                *s = merge_patch::<StencilBufferCore>(s, "", attr, value, self.name)?;
            }
            _ => return Err(payload_mismatch(self.name)),
        }
        Ok(DirtyLevel::Image)
    }

    fn get(&self, core: &CorePayload, attr: &str) -> Result<Value> {
        let all = match core {
            CorePayload::DepthBuffer(d) => serde_json::to_value(d)?,
            CorePayload::ColorBuffer(c) => serde_json::to_value(c)?,
            CorePayload::StencilBuffer(s) => serde_json::to_value(s)?,
            _ => return Err(payload_mismatch(self.name)),
        };
        all.get(attr).cloned().ok_or_else(|| unknown_attr(self.name, attr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> NodeConfig {
        NodeConfig::from_json(&value).unwrap()
    }

    #[test]
    fn flag_changes_pick_their_dirty_tier() {
        let mut core = FlagsType
            .init_core(&config(json!({ "type": "flags", "flags": { "backfaces": false } })))
            .unwrap();
        assert!(!core.flags().unwrap().flags.backfaces);
        assert!(core.flags().unwrap().flags.enabled);

        assert_eq!(FlagsType.set(&mut core, "specular", &json!(false)).unwrap(), DirtyLevel::Image);
        assert_eq!(
            FlagsType.set(&mut core, "flags", &json!({ "enabled": false })).unwrap(),
            DirtyLevel::DrawList
        );
        assert_eq!(
            FlagsType.set(&mut core, "transparent", &json!(true)).unwrap(),
            DirtyLevel::StateOrder
        );
        assert!(FlagsType.set(&mut core, "sparkle", &json!(true)).is_err());
        assert_eq!(FlagsType.get(&core, "transparent").unwrap(), json!(true));
    }

    #[test]
    fn clip_count_change_recompiles() {
        let mut core = ClipsType
            .init_core(&config(json!({
                "type": "clips",
                "clips": [{ "mode": "inside", "normal": { "x": 1 }, "dist": 2 }],
            })))
            .unwrap();
        let level = ClipsType
            .set(&mut core, "clips", &json!({ "0": { "mode": "outside", "dist": 3 } }))
            .unwrap();
        assert_eq!(level, DirtyLevel::Image);
        let level = ClipsType.set(&mut core, "clips", &json!([])).unwrap();
        assert_eq!(level, DirtyLevel::Recompile);
    }

    #[test]
    fn buffer_fields_set_by_name() {
        let ty = BufferType::new("depthBuffer", CoreKind::DepthBuffer);
        let mut core = ty
            .init_core(&config(json!({ "type": "depthBuffer", "depthFunc": "lequal" })))
            .unwrap();
        ty.set(&mut core, "enabled", &json!(false)).unwrap();
        assert_eq!(ty.get(&core, "enabled").unwrap(), json!(false));
        assert_eq!(ty.get(&core, "depthFunc").unwrap(), json!("lequal"));
        assert!(ty.set(&mut core, "depth", &json!(1)).is_err());
    }

    #[test]
    fn layer_priority_resorts() {
        let mut core = LayerType
            .init_core(&config(json!({ "type": "layer", "priority": 1 })))
            .unwrap();
        assert_eq!(
            LayerType.set(&mut core, "priority", &json!(5)).unwrap(),
            DirtyLevel::StateOrder
        );
        assert_eq!(LayerType.get(&core, "priority").unwrap(), json!(5));
    }
}
