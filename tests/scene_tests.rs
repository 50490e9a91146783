//! Scene graph tests
//!
//! Tests for:
//! - Node construction, IDs and configuration errors
//! - Core sharing through explicit and derived core IDs
//! - World matrix composition with pre/post multiplication
//! - Chainable setters and generic attribute access
//! - Custom node types binding shader hooks

use std::sync::Arc;

use glam::{Mat4, Vec3};
use prism::gpu::UniformValue;
use prism::scene::CompileContext;
use prism::scene::types::ShaderType;
use prism::scene::{DirtyLevel, NodeConfig, NodeType};
use prism::state::CorePayload;
use prism::{CoreFactory, CoreKind, Engine, EngineConfig, PrismError, Scene};
use serde_json::{Value, json};

// ============================================================================
// Helpers
// ============================================================================

const EPSILON: f32 = 1e-5;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mat4_approx(a: Mat4, b: Mat4) -> bool {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array())
        .all(|(x, y)| (x - y).abs() < EPSILON)
}

fn engine_with(scene: Value) -> anyhow::Result<Engine<prism::HeadlessGpu>> {
    let mut engine = Engine::headless(EngineConfig::default())?;
    engine.set_scene(Scene::from_json(&scene)?);
    Ok(engine)
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn nested_configs_build_the_tree() -> anyhow::Result<()> {
    init_logs();
    let scene = Scene::from_json(&json!({
        "type": "scene",
        "nodes": [{
            "type": "material", "id": "red", "baseColor": { "r": 1, "g": 0, "b": 0 },
            "nodes": [{ "type": "geometry/box", "id": "box" }],
        }],
    }))?;
    let red = scene.node_by_id("red").expect("material node");
    let b = scene.node_by_id("box").expect("box node");
    assert_eq!(scene.parent(b), Some(red));
    assert_eq!(scene.children(red), &[b]);
    assert_eq!(scene.node_count(), 3);
    assert_eq!(scene.find_nodes_by_type("geometry/box"), vec![b]);
    Ok(())
}

#[test]
fn non_object_configs_are_rejected() {
    let mut scene = Scene::new();
    let root = scene.root();
    let err = scene.add_node(root, &json!([1, 2, 3])).unwrap_err();
    assert!(matches!(err, PrismError::NodeConfigExpected(_)));
    assert!(err.is_fatal());
}

#[test]
fn zero_rotation_axis_is_a_fatal_config_error() {
    let mut scene = Scene::new();
    let root = scene.root();
    let err = scene
        .add_node(root, &json!({ "type": "rotate", "angle": 30, "x": 0, "y": 0, "z": 0 }))
        .unwrap_err();
    assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
    assert!(err.is_fatal());
    assert_eq!(err.report().error_name, "ILLEGAL_NODE_CONFIG");
    assert!(scene.children(root).is_empty());
}

#[test]
fn popping_an_empty_stack_underflows() {
    let cores = CoreFactory::new();
    let mut ctx = CompileContext::new(&cores);
    let err = ctx.pop(CoreKind::Layer).unwrap_err();
    assert!(matches!(err, PrismError::StackUnderflow(_)));
    assert!(err.is_fatal());
}

// ============================================================================
// Core Sharing
// ============================================================================

#[test]
fn explicit_core_ids_share_one_geometry() -> anyhow::Result<()> {
    let triangle = json!({
        "type": "geometry",
        "coreId": "tri",
        "positions": [0, 0, 0, 1, 0, 0, 0, 1, 0],
        "indices": [0, 1, 2],
    });
    let mut scene = Scene::new();
    let root = scene.root();
    let a = scene.add_node(root, &triangle)?;
    let b = scene.add_node(root, &triangle)?;

    let (ca, cb) = (scene.core_of(a).expect("core"), scene.core_of(b).expect("core"));
    assert_eq!(ca, cb);
    assert!(scene.cores().has_core(CoreKind::Geometry, "tri"));
    assert_eq!(scene.cores().get(ca).map(|c| c.use_count), Some(2));

    let data = |h| match scene.cores().payload(h) {
        Some(CorePayload::Geometry(g)) => Some(Arc::clone(&g.data)),
        _ => None,
    };
    let (da, db) = (data(ca).expect("geometry"), data(cb).expect("geometry"));
    assert!(Arc::ptr_eq(&da, &db));
    Ok(())
}

#[test]
fn equal_boxes_share_a_core_and_build_two_objects() -> anyhow::Result<()> {
    init_logs();
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [
            { "type": "lookAt", "eye": { "z": 10 }, "nodes": [
                { "type": "geometry/box", "id": "a", "size": 2 },
                { "type": "geometry/box", "id": "b", "size": 2 },
                { "type": "geometry/box", "id": "wire", "size": 2, "wire": true },
            ]},
        ],
    }))?;
    engine.render()?;

    let cores = engine.scene().cores();
    assert!(cores.has_core(CoreKind::Geometry, "box_2_2_2_false"));
    assert!(cores.has_core(CoreKind::Geometry, "box_2_2_2_true"));
    assert_eq!(cores.count(CoreKind::Geometry), 2);

    let scene = engine.scene();
    let a = scene.node_by_id("a").expect("a");
    let b = scene.node_by_id("b").expect("b");
    let shared = scene.core_of(a).expect("core");
    assert_eq!(scene.core_of(b), Some(shared));

    assert_eq!(engine.display().object_count(), 3);
    let referencing = engine
        .display()
        .sorted_objects()
        .filter(|o| o.states.core(CoreKind::Geometry) == shared)
        .count();
    assert_eq!(referencing, 2);
    Ok(())
}

#[test]
fn shared_cores_are_freed_with_their_last_node() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [
            { "type": "material", "id": "m1", "coreId": "paint" },
            { "type": "material", "id": "m2", "coreId": "paint" },
        ],
    }))?;
    let m1 = engine.scene().node_by_id("m1").expect("m1");
    let m2 = engine.scene().node_by_id("m2").expect("m2");

    engine.remove_node(m1)?;
    assert!(engine.scene().cores().has_core(CoreKind::Material, "paint"));
    engine.remove_node(m2)?;
    assert!(!engine.scene().cores().has_core(CoreKind::Material, "paint"));
    assert_eq!(engine.scene().cores().count(CoreKind::Material), 0);
    Ok(())
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn world_matrix_is_the_product_of_ancestors() -> anyhow::Result<()> {
    init_logs();
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [{
            "type": "translate", "id": "t", "x": 1, "y": 2,
            "nodes": [{
                "type": "rotate", "id": "r", "angle": 90, "y": 1,
                "nodes": [{
                    "type": "scale", "id": "s", "x": 2, "y": 2, "z": 2, "multOrder": "pre",
                    "nodes": [{ "type": "geometry/box" }],
                }],
            }],
        }],
    }))?;
    engine.render()?;

    let t = Mat4::from_translation(Vec3::new(1.0, 2.0, 0.0));
    let r = Mat4::from_axis_angle(Vec3::Y, 90f32.to_radians());
    let s = Mat4::from_scale(Vec3::splat(2.0));

    let scene = engine.scene();
    let world = |id: &str| scene.node_by_id(id).and_then(|h| scene.world_matrix(h));
    assert!(mat4_approx(world("t").expect("t"), t));
    assert!(mat4_approx(world("r").expect("r"), t * r));
    assert!(mat4_approx(world("s").expect("s"), s * (t * r)));

    // Mutate, then compile again.
    let r_node = engine.scene().node_by_id("r").expect("r");
    engine.set(r_node, "angle", &json!(45))?;
    engine.render()?;
    let r45 = Mat4::from_axis_angle(Vec3::Y, 45f32.to_radians());
    let scene = engine.scene();
    let s_world = scene.node_by_id("s").and_then(|h| scene.world_matrix(h));
    assert!(mat4_approx(s_world.expect("s"), s * (t * r45)));
    Ok(())
}

#[test]
fn matrix_nodes_need_sixteen_elements() {
    let mut scene = Scene::new();
    let root = scene.root();
    let err = scene
        .add_node(root, &json!({ "type": "matrix", "elements": [1, 0, 0, 1] }))
        .unwrap_err();
    assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
}

// ============================================================================
// Attributes
// ============================================================================

#[test]
fn base_color_round_trips_with_partial_channels() -> anyhow::Result<()> {
    let mut scene = Scene::from_json(&json!({
        "type": "scene",
        "nodes": [{ "type": "material", "id": "m", "baseColor": { "r": 0.1, "g": 0.2, "b": 0.3 } }],
    }))?;
    let m = scene.node_by_id("m").expect("m");

    let color = Vec3::new(0.9, 0.8, 0.7);
    assert_eq!(scene.node(m).set_base_color(color).get_base_color(), Some(color));

    scene.set(m, "baseColor", &json!({ "g": 0.25 }))?;
    let back = scene.get(m, "baseColor")?;
    for (channel, expected) in [("r", 0.9), ("g", 0.25), ("b", 0.7)] {
        let got = back[channel].as_f64().expect("channel present") as f32;
        assert!((got - expected).abs() < EPSILON, "{channel}: {got}");
    }
    Ok(())
}

#[test]
fn unknown_attributes_are_config_errors() -> anyhow::Result<()> {
    let mut scene = Scene::from_json(&json!({
        "type": "scene",
        "nodes": [{ "type": "layer", "id": "l", "priority": 2 }],
    }))?;
    let l = scene.node_by_id("l").expect("l");
    assert_eq!(scene.get(l, "priority")?, json!(2));
    let err = scene.set(l, "baseColor", &json!({ "r": 1 })).unwrap_err();
    assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
    Ok(())
}

// ============================================================================
// Custom Node Types
// ============================================================================

const SNOW_FRAGMENT: &str = "
uniform float uAltitude;
float snowWorldY;
void snowCaptureWorld(vec4 worldPos) { snowWorldY = worldPos.y; }
vec3 snowCap(vec3 color) { return snowWorldY > uAltitude ? vec3(1.0) : color; }
";

/// Whitens everything above `altitude`.
struct SnowyPeaks;

impl SnowyPeaks {
    fn params(altitude: f32) -> Value {
        json!({ "uAltitude": altitude })
    }
}

impl NodeType for SnowyPeaks {
    fn type_name(&self) -> &str {
        "snowyPeaks"
    }

    fn core_kind(&self) -> Option<CoreKind> {
        Some(CoreKind::Shader)
    }

    fn init_core(&self, config: &NodeConfig) -> prism::Result<CorePayload> {
        let altitude = config
            .parse_param::<f32>("altitude")?
            .unwrap_or(10.0);
        let shader = NodeConfig::new("shader")
            .with_param(
                "shaders",
                json!([{
                    "stage": "fragment",
                    "code": SNOW_FRAGMENT,
                    "hooks": { "worldPos": "snowCaptureWorld", "materialBaseColor": "snowCap" },
                }]),
            )
            .with_param("params", Self::params(altitude));
        ShaderType.init_core(&shader)
    }

    fn set(&self, core: &mut CorePayload, attr: &str, value: &Value) -> prism::Result<DirtyLevel> {
        match attr {
            "altitude" => {
                let altitude = value.as_f64().ok_or_else(|| {
                    PrismError::IllegalNodeConfig(format!("snowyPeaks.altitude: {value}"))
                })?;
                ShaderType.set(core, "params", &Self::params(altitude as f32))
            }
            _ => ShaderType.set(core, attr, value),
        }
    }
}

fn position_of(source: &str, needle: &str) -> usize {
    source
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` missing from:\n{source}"))
}

#[test]
fn custom_shader_type_binds_hooks_and_params() -> anyhow::Result<()> {
    init_logs();
    let mut scene = Scene::new();
    scene.register_type(SnowyPeaks);
    let root = scene.root();
    scene.add_node(
        root,
        &json!({
            "type": "lookAt", "eye": { "z": 10 },
            "nodes": [{
                "type": "snowyPeaks", "id": "snow", "altitude": 10,
                "nodes": [{
                    "type": "material", "baseColor": { "r": 0.2, "g": 0.5, "b": 0.1 },
                    "nodes": [{ "type": "geometry/box" }],
                }],
            }],
        }),
    )?;
    let mut engine = Engine::headless(EngineConfig::default())?;
    engine.set_scene(scene);
    assert!(engine.render()?);

    let object = engine.display().sorted_objects().next().expect("one object");
    let program = engine
        .display()
        .programs()
        .get(object.program)
        .and_then(|p| p.draw)
        .expect("compiled program");
    let (_, fragment) = engine.gpu().program_source(program).expect("live program");
    // Hook functions are declared ahead of main, and main captures the world
    // position before it whitens the base colour.
    let main = position_of(fragment, "void main(");
    assert!(position_of(fragment, "uniform float uAltitude;") < main);
    assert!(position_of(fragment, "void snowCaptureWorld(vec4 worldPos)") < main);
    assert!(position_of(fragment, "vec3 snowCap(vec3 color)") < main);
    let capture = position_of(fragment, "snowCaptureWorld(vWorldPosition);");
    let base = position_of(fragment, "vec3 color = uMaterialBaseColor;");
    let cap = position_of(fragment, "color = snowCap(color);");
    assert!(main < capture && capture < cap);
    assert!(base < cap);
    assert_eq!(fragment.matches("snowCap(color)").count(), 1);
    assert_eq!(
        engine.gpu().uniform_value(program, "uAltitude"),
        Some(UniformValue::Float(10.0))
    );

    // Known params only need a redraw.
    let snow = engine.scene().node_by_id("snow").expect("snow");
    let builds = engine.display().stats().object_builds;
    engine.set(snow, "altitude", &json!(20))?;
    assert!(!engine.scene().needs_compile());
    assert!(engine.render()?);
    assert_eq!(engine.display().stats().object_builds, builds);
    assert_eq!(
        engine.gpu().uniform_value(program, "uAltitude"),
        Some(UniformValue::Float(20.0))
    );
    Ok(())
}

#[test]
fn hooks_bound_to_missing_functions_fail_compile() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [{
            "type": "shader",
            "shaders": [{
                "stage": "fragment",
                "code": "vec3 other(vec3 c) { return c; }",
                "hooks": { "materialBaseColor": "tint" },
            }],
            "nodes": [{ "type": "geometry/box" }],
        }],
    }))?;
    let err = engine.render().unwrap_err();
    assert!(matches!(err, PrismError::ShaderCompilation(_)));
    assert_eq!(err.report().error_name, "SHADER_COMPILATION_FAILURE");
    Ok(())
}
