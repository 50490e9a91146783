//! Display list tests
//!
//! Tests for:
//! - Draw list membership (enable, tag selection) without rebuilds
//! - Resorting on priority changes
//! - Idempotent recompiles
//! - Depth, colour and stencil buffer state at each draw
//! - Object, triangle and region picking

use prism::display::{ChunkHandle, SortKey};
use prism::gpu::{Capability, GpuCommand};
use prism::{
    Engine, EngineConfig, EngineEvent, HeadlessGpu, PickBufferPolicy, PickOptions, Scene,
};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// Helpers
// ============================================================================

const EPSILON: f32 = 1e-3;

fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_with(scene: Value) -> anyhow::Result<Engine<HeadlessGpu>> {
    init_logs();
    let mut engine = Engine::headless(EngineConfig::default())?;
    engine.set_scene(Scene::from_json(&scene)?);
    Ok(engine)
}

/// Wraps `nodes` in a view and a perspective camera looking down -Z from
/// `z = 10`.
fn viewed(nodes: Value) -> Value {
    json!({
        "type": "scene",
        "nodes": [{
            "type": "lookAt", "eye": { "z": 10 }, "look": { "z": 0 }, "up": { "y": 1 },
            "nodes": [{
                "type": "camera",
                "optics": { "type": "perspective", "fovy": 60, "near": 0.1, "far": 100 },
                "nodes": nodes,
            }],
        }],
    })
}

fn drawn_ids(engine: &Engine<HeadlessGpu>) -> Vec<String> {
    engine
        .display()
        .drawn_objects()
        .map(|o| o.meta.node_id.clone())
        .collect()
}

fn sorted_ids(engine: &Engine<HeadlessGpu>) -> Vec<String> {
    engine
        .display()
        .sorted_objects()
        .map(|o| o.meta.node_id.clone())
        .collect()
}

/// The value `capability` held at each draw call recorded since the last
/// `clear_commands`, paired with the drawn object's ID and sorted by ID.
fn capability_at_draws(engine: &Engine<HeadlessGpu>, capability: Capability) -> Vec<(String, Option<bool>)> {
    let mut current = None;
    let mut states = Vec::new();
    for command in engine.gpu().commands() {
        match command {
            GpuCommand::SetCapability { capability: c, enabled } if *c == capability => {
                current = Some(*enabled);
            }
            GpuCommand::DrawElements { .. } | GpuCommand::DrawArrays { .. } => states.push(current),
            _ => {}
        }
    }
    let mut drawn: Vec<_> = drawn_ids(engine).into_iter().zip(states).collect();
    drawn.sort();
    drawn
}

fn red_pixel() -> Value {
    json!({ "width": 1, "height": 1, "pixels": [255, 0, 0, 255] })
}

// ============================================================================
// Draw List Membership
// ============================================================================

#[test]
fn disabled_subtrees_leave_the_draw_list_but_keep_their_chunks() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        {
            "type": "enable", "id": "toggle", "enabled": false,
            "nodes": [{
                "type": "texture", "layers": [{ "image": red_pixel() }],
                "nodes": [{ "type": "geometry/box", "id": "cube" }],
            }],
        },
        { "type": "geometry/sphere", "id": "ball" },
    ])))?;
    assert!(engine.render()?);
    assert_eq!(engine.display().object_count(), 2);
    assert_eq!(drawn_ids(&engine), ["ball"]);

    let cube_chunks = |engine: &Engine<HeadlessGpu>| -> Vec<ChunkHandle> {
        engine
            .display()
            .sorted_objects()
            .find(|o| o.meta.node_id == "cube")
            .map(|o| o.chunk_handles().collect())
            .unwrap_or_default()
    };
    let chunks_before = cube_chunks(&engine);
    let programs_before = engine.display().program_handles();
    let stats_before = engine.display().stats();
    let gpu_programs = engine.gpu().program_count();

    let toggle = engine.scene().node_by_id("toggle").expect("toggle");
    engine.set(toggle, "enabled", &json!(true))?;
    assert!(!engine.scene().needs_compile());
    assert!(engine.render()?);

    assert_eq!(drawn_ids(&engine).len(), 2);
    assert!(drawn_ids(&engine).contains(&"cube".to_string()));
    let stats = engine.display().stats();
    assert_eq!(stats.object_builds, stats_before.object_builds);
    assert_eq!(stats.draw_list_builds, stats_before.draw_list_builds + 1);
    assert_eq!(cube_chunks(&engine), chunks_before);
    assert_eq!(engine.display().program_handles(), programs_before);
    assert_eq!(engine.gpu().program_count(), gpu_programs);
    Ok(())
}

#[test]
fn tag_selector_filters_drawing() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "tag", "tag": "red.box", "nodes": [{ "type": "geometry/box", "id": "red" }] },
        { "type": "tag", "tag": "blue.box", "nodes": [{ "type": "geometry/box", "id": "blue" }] },
        { "type": "geometry/quad", "id": "untagged" },
    ])))?;
    engine.set_tag_selector(Some("red*"));
    engine.render()?;
    let mut drawn = drawn_ids(&engine);
    drawn.sort();
    assert_eq!(drawn, ["red", "untagged"]);

    engine.set_tag_selector(None);
    engine.render()?;
    assert_eq!(drawn_ids(&engine).len(), 3);
    Ok(())
}

// ============================================================================
// Sorting
// ============================================================================

#[test]
fn layer_priority_change_resorts_without_recompiling() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "layer", "id": "a", "priority": 0, "nodes": [{ "type": "geometry/box", "id": "under_a" }] },
        { "type": "layer", "id": "b", "priority": 1, "nodes": [{ "type": "geometry/box", "id": "under_b" }] },
    ])))?;
    engine.render()?;
    assert_eq!(sorted_ids(&engine), ["under_a", "under_b"]);
    let before = engine.display().stats();

    let a = engine.scene().node_by_id("a").expect("layer a");
    engine.scene_mut().node(a).set_priority(5);
    assert!(!engine.scene().needs_compile());
    engine.render()?;

    assert_eq!(sorted_ids(&engine), ["under_b", "under_a"]);
    let after = engine.display().stats();
    assert_eq!(after.object_builds, before.object_builds);
    assert_eq!(after.sorts, before.sorts + 1);
    Ok(())
}

#[test]
fn transparent_objects_sort_after_opaque_ones() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        {
            "type": "flags", "flags": { "transparent": true },
            "nodes": [{ "type": "geometry/box", "id": "glass" }],
        },
        { "type": "geometry/box", "id": "stone" },
    ])))?;
    engine.render()?;
    assert_eq!(sorted_ids(&engine), ["stone", "glass"]);
    assert!(engine.display().transparent_index().is_some());
    Ok(())
}

#[test]
fn recompiling_an_unchanged_tree_is_idempotent() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "material", "baseColor": { "g": 0.5 }, "nodes": [{ "type": "geometry/box", "id": "a" }] },
        { "type": "layer", "priority": 2, "nodes": [{ "type": "geometry/sphere", "id": "b" }] },
        { "type": "geometry/quad", "id": "c" },
    ])))?;
    let snapshot = |engine: &Engine<HeadlessGpu>| -> Vec<(String, SortKey, Vec<ChunkHandle>)> {
        engine
            .display()
            .sorted_objects()
            .map(|o| (o.meta.node_id.clone(), o.sort_key, o.chunk_handles().collect()))
            .collect()
    };

    engine.compile()?;
    engine.render()?;
    let first = snapshot(&engine);
    let builds = engine.display().stats().object_builds;
    let chunk_count = engine.display().chunks().len();

    engine.compile()?;
    engine.render()?;
    assert_eq!(snapshot(&engine), first);
    assert_eq!(engine.display().object_count(), 3);
    assert_eq!(engine.display().stats().object_builds, builds);
    assert_eq!(engine.display().chunks().len(), chunk_count);
    Ok(())
}

#[test]
fn stage_priorities_in_the_millions_sort_in_order() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "stage", "id": "top", "priority": i64::MAX, "nodes": [{ "type": "geometry/box", "id": "last" }] },
        { "type": "stage", "priority": 10_000_000, "nodes": [{ "type": "geometry/box", "id": "late" }] },
        { "type": "stage", "priority": -10_000_000, "nodes": [{ "type": "geometry/box", "id": "early" }] },
        { "type": "geometry/box", "id": "plain" },
    ])))?;
    assert!(engine.render()?);
    assert_eq!(sorted_ids(&engine), ["early", "plain", "late", "last"]);

    let top = engine.scene().node_by_id("top").expect("top stage");
    engine.set(top, "priority", &json!(i64::MIN))?;
    engine.render()?;
    assert_eq!(sorted_ids(&engine), ["last", "early", "plain", "late"]);
    Ok(())
}

#[test]
fn texture_state_ids_past_a_thousand_keep_programs_grouped() -> anyhow::Result<()> {
    let textured = |id: &str| {
        json!({
            "type": "texture", "layers": [{ "image": red_pixel() }],
            "nodes": [{ "type": "geometry/box", "id": id }],
        })
    };
    let mut nodes: Vec<Value> = (0..1100)
        .map(|i| json!({ "type": "tag", "tag": format!("filler{i}") }))
        .collect();
    nodes.push(textured("textured"));
    nodes.push(json!({ "type": "geometry/box", "id": "plain" }));
    nodes.push(textured("textured_again"));
    let mut engine = engine_with(viewed(Value::Array(nodes)))?;
    engine.render()?;

    let keys: Vec<SortKey> = engine.display().sorted_objects().map(|o| o.sort_key).collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys.iter().filter(|k| k.texture > 1000).count(), 2);
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    assert!(keys.windows(2).all(|w| w[0].program <= w[1].program));

    // Both textured boxes share a program, so the plain box cannot sit between them.
    let ids = sorted_ids(&engine);
    assert_ne!(ids[1], "plain");
    Ok(())
}

// ============================================================================
// Buffer State
// ============================================================================

#[test]
fn stencil_test_is_scoped_to_the_stencil_buffer_subtree() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "stencilBuffer", "enabled": true, "nodes": [{ "type": "geometry/box", "id": "a" }] },
        { "type": "geometry/box", "id": "b" },
    ])))?;
    engine.gpu_mut().clear_commands();
    assert!(engine.render()?);
    assert_eq!(
        capability_at_draws(&engine, Capability::StencilTest),
        [("a".to_string(), Some(true)), ("b".to_string(), Some(false))]
    );
    Ok(())
}

#[test]
fn buffer_state_is_restored_between_objects_and_frames() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([
        { "type": "material", "id": "paint", "nodes": [{ "type": "geometry/box", "id": "a" }] },
        { "type": "stencilBuffer", "enabled": true, "nodes": [{ "type": "geometry/box", "id": "b" }] },
        { "type": "depthBuffer", "enabled": false, "nodes": [{ "type": "geometry/box", "id": "c" }] },
        { "type": "colorBuffer", "blendEnabled": true, "nodes": [{ "type": "geometry/box", "id": "d" }] },
    ])))?;
    let expect = |states: [bool; 4]| -> Vec<(String, Option<bool>)> {
        ["a", "b", "c", "d"]
            .into_iter()
            .zip(states)
            .map(|(id, on)| (id.to_string(), Some(on)))
            .collect()
    };

    for frame in 0..2 {
        if frame > 0 {
            let paint = engine.scene().node_by_id("paint").expect("material");
            engine.set(paint, "baseColor", &json!({ "r": 0.5 }))?;
        }
        engine.gpu_mut().clear_commands();
        assert!(engine.render()?, "frame {frame} was not drawn");
        assert_eq!(capability_at_draws(&engine, Capability::StencilTest), expect([false, true, false, false]));
        assert_eq!(capability_at_draws(&engine, Capability::DepthTest), expect([true, true, false, true]));
        assert_eq!(capability_at_draws(&engine, Capability::Blend), expect([false, false, false, true]));
    }
    Ok(())
}

// ============================================================================
// Picking
// ============================================================================

fn two_boxes() -> Value {
    viewed(json!([
        {
            "type": "name", "name": "left",
            "nodes": [{ "type": "translate", "x": -3, "nodes": [{ "type": "geometry/box", "id": "leftBox" }] }],
        },
        {
            "type": "name", "name": "right",
            "nodes": [{ "type": "translate", "x": 3, "nodes": [{ "type": "geometry/box", "id": "rightBox" }] }],
        },
    ]))
}

// At distance 9 with a 60 degree fovy on an 800x600 canvas, x = 3 lands
// near pixel 573.
const RIGHT_BOX_PX: (u32, u32) = (573, 300);
const LEFT_BOX_PX: (u32, u32) = (227, 300);

#[test]
fn object_pick_names_the_hit_and_its_path() -> anyhow::Result<()> {
    let mut engine = engine_with(two_boxes())?;
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    engine.events_mut().subscribe(move |e| {
        if matches!(e, EngineEvent::NodePicked(_) | EngineEvent::NothingPicked { .. }) {
            sink.borrow_mut().push(e.clone());
        }
    });

    let hit = engine
        .pick(RIGHT_BOX_PX.0, RIGHT_BOX_PX.1, PickOptions::default())?
        .expect("right box under the cursor");
    assert_eq!(hit.node_id, "rightBox");
    assert_eq!(hit.name.as_deref(), Some("right"));
    assert_eq!(hit.path, ["right"]);
    assert_eq!(hit.canvas_pos, RIGHT_BOX_PX);

    let hit = engine.pick(LEFT_BOX_PX.0, LEFT_BOX_PX.1, PickOptions::default())?;
    assert_eq!(hit.map(|h| h.node_id).as_deref(), Some("leftBox"));

    assert!(engine.pick(400, 300, PickOptions::default())?.is_none());
    assert_eq!(events.borrow().len(), 3);
    assert!(matches!(
        events.borrow()[2],
        EngineEvent::NothingPicked { x: 400, y: 300 }
    ));
    Ok(())
}

#[test]
fn unpickable_stages_are_skipped() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([{
        "type": "stage", "pickable": false,
        "nodes": [{ "type": "geometry/box", "id": "ghost", "size": 3 }],
    }])))?;
    assert!(engine.pick(400, 300, PickOptions::default())?.is_none());
    assert_eq!(engine.display().pickable_objects().count(), 0);
    assert_eq!(engine.display().object_count(), 1);
    Ok(())
}

#[test]
fn ray_pick_resolves_the_front_triangle() -> anyhow::Result<()> {
    let mut engine = engine_with(two_boxes())?;
    let options = PickOptions {
        ray: true,
        regions: false,
    };
    let hit = engine
        .pick(RIGHT_BOX_PX.0, RIGHT_BOX_PX.1, options)?
        .expect("right box under the cursor");
    let triangle = hit.triangle.expect("triangle hit");

    assert!(approx_eq(triangle.world_pos.z, 1.0), "{:?}", triangle.world_pos);
    assert!((triangle.world_pos.x - 3.0).abs() <= 1.0 + EPSILON);
    assert!(approx_eq(triangle.position.z, 1.0));
    let bary = triangle.barycentric;
    assert!(approx_eq(bary.x + bary.y + bary.z, 1.0));
    Ok(())
}

#[test]
fn region_pick_matches_the_region_colour() -> anyhow::Result<()> {
    let mut engine = engine_with(viewed(json!([{
        "type": "regionMap",
        "image": red_pixel(),
        "regionData": [
            { "color": { "r": 0, "g": 0, "b": 1 }, "data": { "country": "atlantis" } },
            { "color": { "r": 1, "g": 0, "b": 0 }, "data": { "country": "lemuria" } },
        ],
        "nodes": [{ "type": "geometry/box", "id": "globe" }],
    }])))?;
    let options = PickOptions {
        ray: false,
        regions: true,
    };
    let hit = engine.pick(400, 300, options)?.expect("globe under the cursor");
    let region = hit.region.expect("region hit");
    assert_eq!(region.data, json!({ "country": "lemuria" }));
    Ok(())
}

#[test]
fn pick_buffer_policy_controls_retention() -> anyhow::Result<()> {
    let mut keep = engine_with(two_boxes())?;
    keep.pick(0, 0, PickOptions::default())?;
    assert!(keep.display().pick_buffer().is_some());

    let config = EngineConfig {
        pick_buffer: PickBufferPolicy::Release,
        ..EngineConfig::default()
    };
    let mut release = Engine::headless(config)?;
    release.set_scene(Scene::from_json(&two_boxes())?);
    release.pick(0, 0, PickOptions::default())?;
    assert!(release.display().pick_buffer().is_none());
    Ok(())
}
