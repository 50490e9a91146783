//! Program Source Generation
//!
//! Composes the GLSL for one program shape from the templates under
//! `src/display/shaders` using minijinja. Each shape yields four stages: a
//! vertex and fragment stage for drawing, and a pair for picking.
//!
//! Custom shader cores contribute code and bind functions in it to hook
//! points. The templates call every bound hook at a fixed point of the
//! pipeline; unbound hooks leave the default path untouched. A stage whose
//! code binds no hooks replaces the generated draw stage outright, while
//! picking keeps the generated stages.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{PrismError, Result};
use crate::state::{CoreFactory, CoreHandle, ShaderStage, StageCode};

pub static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/display/shaders"]
struct ShaderAssets;

pub fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure template syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

        env.set_loader(shader_loader);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        env
    })
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("glsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.glsl"))
    };

    #[cfg(debug_assertions)]
    {
        let path = std::path::Path::new("src/display/shaders").join(filename.as_ref());
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(source) => return Ok(Some(source)),
                Err(e) => {
                    return Err(Error::new(
                        ErrorKind::TemplateNotFound,
                        format!("Failed to read file: {e}"),
                    ));
                }
            }
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

// ============================================================================
// Program Shape
// ============================================================================

/// The cores at a geometry leaf that decide which program it needs.
#[derive(Debug, Clone, Copy)]
pub struct ProgramInputs<'a> {
    pub geometry: CoreHandle,
    /// Shader stack, outermost first.
    pub shaders: &'a [CoreHandle],
    pub clips: CoreHandle,
    pub texture: CoreHandle,
    pub lights: CoreHandle,
    pub flags: CoreHandle,
    pub region_map: CoreHandle,
}

impl ProgramInputs<'_> {
    /// Program hash: the shape hash of each input, `;`-joined.
    #[must_use]
    pub fn hash(&self, cores: &CoreFactory) -> String {
        let shaders = self
            .shaders
            .iter()
            .filter(|h| !cores.is_default(**h))
            .map(|h| cores.state_id(*h).to_string())
            .collect::<Vec<_>>()
            .join(",");
        [
            cores.hash(self.geometry),
            shaders,
            cores.hash(self.clips),
            cores.hash(self.texture),
            cores.hash(self.lights),
            cores.hash(self.flags),
            cores.hash(self.region_map),
        ]
        .join(";")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightShape {
    pub mode: &'static str,
    pub space: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerShape {
    pub apply_to: &'static str,
    pub blend_mode: &'static str,
}

/// Merged custom code for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageHooks {
    pub code: String,
    pub hooks: BTreeMap<String, String>,
    /// Code without any hook bindings: it is the whole draw stage.
    pub custom: bool,
}

impl StageHooks {
    fn merge<'a>(stages: impl Iterator<Item = &'a StageCode>) -> Self {
        let mut merged = Self::default();
        let mut bound = false;
        for stage in stages {
            if !stage.code.is_empty() {
                if !merged.code.is_empty() {
                    merged.code.push('\n');
                }
                merged.code.push_str(&stage.code);
            }
            if let Some(hooks) = &stage.hooks {
                bound = true;
                merged.hooks.extend(hooks.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged.custom = !bound && !merged.code.trim().is_empty();
        merged
    }

    /// Every bound function must be defined by the merged code.
    fn check(&self, stage: ShaderStage) -> Result<()> {
        for (hook, function) in &self.hooks {
            let defined = self
                .code
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .any(|token| token == function);
            if !defined {
                return Err(PrismError::ShaderCompilation(format!(
                    "{stage:?} hook '{hook}' is bound to '{function}', which the shader code does not define"
                )));
            }
        }
        Ok(())
    }
}

/// Everything about a leaf's state that changes the generated GLSL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramShape {
    pub primitive: &'static str,
    pub normals: bool,
    pub uv: bool,
    pub uv2: bool,
    pub colors: bool,
    pub clips: usize,
    pub lights: Vec<LightShape>,
    pub layers: Vec<LayerShape>,
    pub region_map: bool,
    pub vertex: StageHooks,
    pub fragment: StageHooks,
}

impl ProgramShape {
    pub fn resolve(cores: &CoreFactory, inputs: &ProgramInputs<'_>) -> Result<Self> {
        let geometry = cores.payload(inputs.geometry).and_then(|p| p.geometry());
        let data = geometry.map(|g| g.data.as_ref());

        let shaders: Vec<_> = inputs
            .shaders
            .iter()
            .filter_map(|h| cores.payload(*h)?.shader())
            .collect();
        let vertex = StageHooks::merge(shaders.iter().map(|s| &s.vertex));
        let fragment = StageHooks::merge(shaders.iter().map(|s| &s.fragment));
        vertex.check(ShaderStage::Vertex)?;
        fragment.check(ShaderStage::Fragment)?;

        let lights = cores
            .payload(inputs.lights)
            .and_then(|p| p.lights())
            .map(|l| {
                l.lights
                    .iter()
                    .map(|light| LightShape {
                        mode: match light.mode {
                            crate::state::LightMode::Ambient => "ambient",
                            crate::state::LightMode::Dir => "dir",
                            crate::state::LightMode::Point => "point",
                        },
                        space: match light.space {
                            crate::state::LightSpace::View => "view",
                            crate::state::LightSpace::World => "world",
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        let layers = cores
            .payload(inputs.texture)
            .and_then(|p| p.texture())
            .map(|t| {
                t.layers
                    .iter()
                    .filter(|l| l.is_ready())
                    .map(|l| LayerShape {
                        apply_to: l.apply_to.as_str(),
                        blend_mode: l.blend_mode.as_str(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let uv = data.is_some_and(|d| d.uv.is_some());
        Ok(Self {
            primitive: data.map_or("triangles", |d| d.primitive.as_str()),
            normals: data.is_some_and(|d| d.normals.is_some()),
            uv,
            uv2: data.is_some_and(|d| d.uv2.is_some()),
            colors: data.is_some_and(|d| d.colors.is_some()),
            clips: cores
                .payload(inputs.clips)
                .and_then(|p| p.clips())
                .map_or(0, |c| c.clips.len()),
            lights,
            layers,
            region_map: uv
                && cores
                    .payload(inputs.region_map)
                    .and_then(|p| p.region_map())
                    .is_some_and(|r| r.image.is_some()),
            vertex,
            fragment,
        })
    }
}

// ============================================================================
// Program Source
// ============================================================================

/// Generated GLSL for one program shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub hash: String,
    pub draw_vertex: String,
    pub draw_fragment: String,
    pub pick_vertex: String,
    pub pick_fragment: String,
    /// xxh3 of all four stages.
    pub fingerprint: u64,
}

#[derive(Serialize)]
struct StagePair<'a, T: ?Sized> {
    vertex: &'a T,
    fragment: &'a T,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    shape: &'a ProgramShape,
    hooks: StagePair<'a, BTreeMap<String, String>>,
    code: StagePair<'a, str>,
    pick: bool,
}

impl ProgramSource {
    pub fn generate(hash: &str, shape: &ProgramShape) -> Result<Self> {
        let env = get_env();
        let empty = BTreeMap::new();
        let render = |template: &str, pick: bool| -> Result<String> {
            let ctx = TemplateContext {
                shape,
                hooks: StagePair {
                    vertex: if shape.vertex.custom { &empty } else { &shape.vertex.hooks },
                    fragment: if shape.fragment.custom {
                        &empty
                    } else {
                        &shape.fragment.hooks
                    },
                },
                code: StagePair {
                    vertex: composed_code(&shape.vertex),
                    fragment: composed_code(&shape.fragment),
                },
                pick,
            };
            Ok(env.get_template(template)?.render(&ctx)?)
        };

        let draw_vertex = if shape.vertex.custom {
            shape.vertex.code.clone()
        } else {
            render("draw.vert", false)?
        };
        let draw_fragment = if shape.fragment.custom {
            shape.fragment.code.clone()
        } else {
            render("draw.frag", false)?
        };
        let pick_vertex = render("pick.vert", true)?;
        let pick_fragment = render("pick.frag", true)?;

        let fingerprint = xxh3_64(
            [&draw_vertex, &draw_fragment, &pick_vertex, &pick_fragment]
                .map(String::as_str)
                .join("\n")
                .as_bytes(),
        );

        Ok(Self {
            hash: hash.to_string(),
            draw_vertex,
            draw_fragment,
            pick_vertex,
            pick_fragment,
            fingerprint,
        })
    }
}

/// A custom stage owns its own `main`, so it stays out of the stages that
/// are still generated.
fn composed_code(stage: &StageHooks) -> &str {
    if stage.custom { "" } else { stage.code.as_str() }
}

// ============================================================================
// Program Source Factory
// ============================================================================

struct CachedSource {
    source: Arc<ProgramSource>,
    use_count: u32,
}

/// Use-counted cache of generated sources, keyed by program hash.
#[derive(Default)]
pub struct ProgramSourceFactory {
    sources: FxHashMap<String, CachedSource>,
    dump_dir: Option<PathBuf>,
}

impl ProgramSourceFactory {
    #[must_use]
    pub fn new(dump_dir: Option<PathBuf>) -> Self {
        Self {
            sources: FxHashMap::default(),
            dump_dir,
        }
    }

    /// Returns the cached source for `hash`, generating it from the shape
    /// produced by `resolve` on a miss.
    pub fn get_source(
        &mut self,
        hash: &str,
        resolve: impl FnOnce() -> Result<ProgramShape>,
    ) -> Result<Arc<ProgramSource>> {
        if let Some(cached) = self.sources.get_mut(hash) {
            cached.use_count += 1;
            return Ok(cached.source.clone());
        }
        let shape = resolve()?;
        let source = Arc::new(ProgramSource::generate(hash, &shape)?);
        log::debug!("Generated program source {:016x} for '{hash}'", source.fingerprint);
        self.dump(&source);
        self.sources.insert(
            hash.to_string(),
            CachedSource {
                source: source.clone(),
                use_count: 1,
            },
        );
        Ok(source)
    }

    pub fn put_source(&mut self, hash: &str) {
        let Some(cached) = self.sources.get_mut(hash) else {
            return;
        };
        cached.use_count = cached.use_count.saturating_sub(1);
        if cached.use_count == 0 {
            self.sources.remove(hash);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn dump(&self, source: &ProgramSource) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let stages = [
            ("draw.vert", &source.draw_vertex),
            ("draw.frag", &source.draw_fragment),
            ("pick.vert", &source.pick_vertex),
            ("pick.frag", &source.pick_fragment),
        ];
        for (stage, text) in stages {
            let path = dir.join(format!("{:016x}.{stage}.glsl", source.fingerprint));
            if let Err(e) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, text)) {
                log::warn!("Could not dump shader to {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> ProgramShape {
        ProgramShape {
            primitive: "triangles",
            normals: true,
            uv: true,
            uv2: false,
            colors: false,
            clips: 2,
            lights: vec![
                LightShape {
                    mode: "ambient",
                    space: "view",
                },
                LightShape {
                    mode: "dir",
                    space: "view",
                },
            ],
            layers: vec![LayerShape {
                apply_to: "baseColor",
                blend_mode: "multiply",
            }],
            region_map: false,
            vertex: StageHooks::default(),
            fragment: StageHooks::default(),
        }
    }

    #[test]
    fn generated_stages_declare_what_the_shape_needs() {
        let source = ProgramSource::generate("h", &shape()).unwrap();
        assert!(source.draw_vertex.contains("attribute vec3 aNormal;"));
        assert!(source.draw_fragment.contains("uniform vec4 uClipNormalAndDist1;"));
        assert!(source.draw_fragment.contains("uniform vec3 uLightDir1;"));
        assert!(!source.draw_fragment.contains("uLightDir0"));
        assert!(source.draw_fragment.contains("uniform sampler2D uSampler0;"));
        assert!(source.pick_fragment.contains("uniform int uPickMode;"));
        assert!(!source.pick_vertex.contains("aNormal"));
        for stage in [&source.draw_vertex, &source.draw_fragment, &source.pick_vertex] {
            assert!(stage.contains("void main"));
        }
    }

    #[test]
    fn hooks_are_called_in_pipeline_order() {
        let mut shape = shape();
        shape.fragment = StageHooks {
            code: "void track(vec4 p) {}\nvec3 tint(vec3 c) { return c; }\nvec4 grade(vec4 c) { return c; }"
                .into(),
            hooks: [
                ("pixelColor".to_string(), "grade".to_string()),
                ("worldPos".to_string(), "track".to_string()),
                ("materialBaseColor".to_string(), "tint".to_string()),
            ]
            .into_iter()
            .collect(),
            custom: false,
        };
        let source = ProgramSource::generate("h", &shape).unwrap();
        let frag = &source.draw_fragment;
        let world = frag.find("track(vWorldPosition);").unwrap();
        let color = frag.find("color = tint(color);").unwrap();
        let pixel = frag.find("fragColor = grade(fragColor);").unwrap();
        assert!(world < color && color < pixel);
    }

    #[test]
    fn unbound_hook_functions_are_rejected() {
        let stage = StageHooks {
            code: "vec3 other(vec3 c) { return c; }".into(),
            hooks: [("materialBaseColor".to_string(), "tint".to_string())]
                .into_iter()
                .collect(),
            custom: false,
        };
        assert!(matches!(
            stage.check(ShaderStage::Fragment),
            Err(PrismError::ShaderCompilation(_))
        ));
    }

    #[test]
    fn code_without_hooks_replaces_the_draw_stage() {
        let stages = [StageCode {
            code: "void main(void) { gl_FragColor = vec4(1.0); }".into(),
            hooks: None,
        }];
        let merged = StageHooks::merge(stages.iter());
        assert!(merged.custom);

        let mut shape = shape();
        shape.fragment = merged;
        let source = ProgramSource::generate("h", &shape).unwrap();
        assert_eq!(source.draw_fragment, "void main(void) { gl_FragColor = vec4(1.0); }");
        assert!(source.pick_fragment.contains("uPickColor"));
    }

    #[test]
    fn sources_are_shared_by_hash_and_released_at_zero() {
        let mut factory = ProgramSourceFactory::new(None);
        let a = factory.get_source("h", || Ok(shape())).unwrap();
        let b = factory
            .get_source("h", || Err(PrismError::ShaderCompilation("unused".into())))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        factory.put_source("h");
        assert_eq!(factory.len(), 1);
        factory.put_source("h");
        assert!(factory.is_empty());
    }
}
