//! Engine tests
//!
//! Tests for:
//! - Context loss and restore
//! - Asynchronous loads: completion, failure, cancellation
//! - Render listeners and lifecycle events

use std::cell::RefCell;
use std::rc::Rc;

use prism::gpu::GpuRenderBuffer;
use prism::state::GeometryConfig;
use prism::{
    AssetLoader, CoreKind, Engine, EngineConfig, EngineEvent, GpuContext, HeadlessGpu,
    LoadRequest, LoadSender, LoadedAsset, PrismError, Scene, TextureImage,
};
use serde_json::{Value, json};

// ============================================================================
// Helpers
// ============================================================================

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_with(scene: Value) -> anyhow::Result<Engine<HeadlessGpu>> {
    init_logs();
    let mut engine = Engine::headless(EngineConfig::default())?;
    engine.set_scene(Scene::from_json(&scene)?);
    Ok(engine)
}

type EventLog = Rc<RefCell<Vec<EngineEvent>>>;

fn record_events(engine: &mut Engine<HeadlessGpu>) -> EventLog {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    engine
        .events_mut()
        .subscribe(move |e| sink.borrow_mut().push(e.clone()));
    log
}

fn count(log: &EventLog, wanted: impl Fn(&EngineEvent) -> bool) -> usize {
    log.borrow().iter().filter(|e| wanted(e)).count()
}

/// Records requests and hands them back to the test to answer.
#[derive(Clone, Default)]
struct ManualLoader {
    pending: Rc<RefCell<Vec<(LoadRequest, LoadSender)>>>,
}

impl ManualLoader {
    fn take(&self) -> Vec<(LoadRequest, LoadSender)> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl AssetLoader for ManualLoader {
    fn load(&mut self, request: LoadRequest, sender: LoadSender) {
        self.pending.borrow_mut().push((request, sender));
    }
}

fn triangle() -> GeometryConfig {
    GeometryConfig {
        positions: vec![-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0],
        indices: Some(vec![0, 1, 2]),
        ..GeometryConfig::default()
    }
}

// ============================================================================
// Context Loss
// ============================================================================

fn target_buffer(engine: &Engine<HeadlessGpu>, id: &str) -> Option<GpuRenderBuffer> {
    let scene = engine.scene();
    let core = scene.node_by_id(id).and_then(|h| scene.core_of(h))?;
    scene
        .cores()
        .payload(core)?
        .render_target()?
        .buffer()
        .map(|b| b.framebuffer)
}

#[test]
fn restore_rebuilds_programs_and_render_targets() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [{
            "type": "lookAt", "eye": { "z": 10 },
            "nodes": [
                { "type": "colorTarget", "id": "rt1", "nodes": [{ "type": "geometry/box" }] },
                {
                    "type": "depthTarget", "id": "rt2", "width": 64, "height": 64,
                    "nodes": [{ "type": "geometry/sphere" }],
                },
                {
                    "type": "texture", "layers": [{ "target": "rt1" }],
                    "nodes": [{ "type": "geometry/box" }],
                },
                {
                    "type": "lights",
                    "lights": [
                        { "mode": "ambient" },
                        { "mode": "dir", "dir": { "z": -1 } },
                        { "mode": "point", "pos": { "y": 5 } },
                    ],
                    "nodes": [{ "type": "geometry/quad" }],
                },
            ],
        }],
    }))?;
    let events = record_events(&mut engine);
    assert!(engine.render()?);

    let programs_before: Vec<(String, _)> = engine
        .display()
        .programs()
        .iter()
        .map(|(_, p)| (p.hash.clone(), p.draw.expect("compiled")))
        .collect();
    assert_eq!(programs_before.len(), 3);
    let rt1 = target_buffer(&engine, "rt1").expect("rt1 allocated");
    let rt2 = target_buffer(&engine, "rt2").expect("rt2 allocated");
    let mut ids_before = Vec::new();
    engine.scene().each_node(|_, n| ids_before.push(n.id().to_string()));

    engine.gpu_mut().lose_context();
    assert!(!engine.render()?);
    assert!(engine.is_context_lost());
    assert!(!engine.render()?);
    assert_eq!(count(&events, |e| *e == EngineEvent::ContextLost), 1);

    engine.gpu_mut().restore_context();
    engine.context_restored()?;
    assert_eq!(count(&events, |e| *e == EngineEvent::ContextRestored), 1);
    assert!(engine.render()?);

    for (hash, old) in &programs_before {
        let handle = engine.display().programs().by_hash(hash).expect("same hash");
        let program = engine.display().programs().get(handle).expect("program");
        let new = program.draw.expect("recompiled");
        assert_ne!(new, *old);
        assert!(engine.gpu().is_live_program(new));
    }
    assert_eq!(engine.display().programs().len(), 3);

    for (id, old) in [("rt1", rt1), ("rt2", rt2)] {
        let new = target_buffer(&engine, id).expect("reallocated");
        assert_ne!(new, old);
        assert!(engine.gpu().is_live_render_buffer(new));
    }

    let mut ids_after = Vec::new();
    engine.scene().each_node(|_, n| ids_after.push(n.id().to_string()));
    assert_eq!(ids_after, ids_before);
    Ok(())
}

#[test]
fn restore_while_still_lost_fails() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({ "type": "scene" }))?;
    engine.gpu_mut().lose_context();
    assert!(matches!(engine.context_restored(), Err(PrismError::ContextLost)));
    Ok(())
}

#[test]
fn lost_context_at_creation_is_unsupported() {
    let mut gpu = HeadlessGpu::new(32, 32);
    gpu.lose_context();
    let err = Engine::new(gpu, EngineConfig::default()).err();
    assert!(matches!(err, Some(PrismError::ContextNotSupported(_))));
}

// ============================================================================
// Asynchronous Loads
// ============================================================================

fn sourced_scene() -> Value {
    json!({
        "type": "scene",
        "nodes": [{
            "type": "lookAt", "eye": { "z": 10 },
            "nodes": [{ "type": "geometry", "id": "teapot", "source": "teapot.json" }],
        }],
    })
}

#[test]
fn completed_geometry_loads_recompile() -> anyhow::Result<()> {
    let mut engine = engine_with(sourced_scene())?;
    let loader = ManualLoader::default();
    engine.set_loader(loader.clone());
    let events = record_events(&mut engine);

    engine.render()?;
    assert_eq!(engine.display().object_count(), 0);
    assert_eq!(engine.status().busy(), 1);
    assert_eq!(engine.status().node_busy("teapot"), 1);

    let mut requests = loader.take();
    assert_eq!(requests.len(), 1);
    let (request, sender) = requests.remove(0);
    assert_eq!(request.uri, "teapot.json");
    assert!(sender.complete(request, LoadedAsset::Geometry(triangle())));

    assert!(engine.render()?);
    assert_eq!(engine.display().object_count(), 1);
    assert_eq!(engine.status().busy(), 0);
    assert_eq!(engine.status().finished(), 1);
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::TaskStarted { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::TaskFinished { .. })), 1);
    Ok(())
}

#[test]
fn failed_loads_leave_the_subtree_absent() -> anyhow::Result<()> {
    let mut engine = engine_with(sourced_scene())?;
    let loader = ManualLoader::default();
    engine.set_loader(loader.clone());
    let events = record_events(&mut engine);
    engine.render()?;

    for (request, sender) in loader.take() {
        sender.fail(request, "404 not found");
    }
    engine.render()?;
    assert_eq!(engine.display().object_count(), 0);
    assert_eq!(engine.status().failed(), 1);
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::TaskFailed { .. })), 1);
    // Load failures are not fatal.
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::Error(_))), 0);
    Ok(())
}

#[test]
fn loads_for_destroyed_nodes_are_dropped() -> anyhow::Result<()> {
    let mut engine = engine_with(sourced_scene())?;
    let loader = ManualLoader::default();
    engine.set_loader(loader.clone());
    engine.render()?;

    let teapot = engine.scene().node_by_id("teapot").expect("teapot");
    engine.destroy_node(teapot)?;
    engine.render()?;
    assert!(engine.scene().node_by_id("teapot").is_none());

    for (request, sender) in loader.take() {
        sender.complete(request, LoadedAsset::Geometry(triangle()));
    }
    assert_eq!(engine.poll_loads(), 0);
    assert_eq!(engine.display().object_count(), 0);
    assert_eq!(engine.status().busy(), 0);
    assert_eq!(engine.status().failed(), 1);
    Ok(())
}

#[test]
fn texture_layers_load_through_the_same_channel() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [{
            "type": "texture", "id": "brick", "layers": [{ "uri": "brick.png" }],
            "nodes": [{ "type": "geometry/box" }],
        }],
    }))?;
    let loader = ManualLoader::default();
    engine.set_loader(loader.clone());
    engine.render()?;
    let textures_before = engine.gpu().texture_count();

    for (request, sender) in loader.take() {
        sender.complete(request, LoadedAsset::Image(TextureImage::solid(2, 2, [200, 100, 50, 255])));
    }
    engine.render()?;
    assert_eq!(engine.gpu().texture_count(), textures_before + 1);
    assert_eq!(engine.scene().cores().count(CoreKind::Texture), 1);
    assert_eq!(engine.status().finished(), 1);
    Ok(())
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn render_listeners_fire_for_drawn_subtrees() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({
        "type": "scene",
        "nodes": [
            { "type": "node", "id": "shown", "nodes": [{ "type": "geometry/box" }] },
            {
                "type": "enable", "enabled": false,
                "nodes": [{ "type": "node", "id": "hidden", "nodes": [{ "type": "geometry/box" }] }],
            },
        ],
    }))?;
    for id in ["shown", "hidden"] {
        let node = engine.scene().node_by_id(id).expect("listener node");
        engine.listen_rendered(node)?;
    }
    let events = record_events(&mut engine);
    engine.render()?;

    let rendered: Vec<String> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            EngineEvent::NodeRendered(id) => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(rendered, ["shown"]);
    assert_eq!(count(&events, |e| *e == EngineEvent::SceneCompiling), 1);
    Ok(())
}

#[test]
fn fatal_errors_are_published_and_returned() -> anyhow::Result<()> {
    let mut engine = engine_with(json!({ "type": "scene" }))?;
    let events = record_events(&mut engine);
    let root = engine.scene().root();

    let err = engine.add_node(root, &json!({ "type": "teapot" })).unwrap_err();
    assert!(matches!(err, PrismError::UnknownNodeType(_)));
    engine.add_node(root, &json!({ "type": "node", "id": "x" }))?;
    let err = engine.add_node(root, &json!({ "type": "node", "id": "x" })).unwrap_err();
    assert!(matches!(err, PrismError::IdClash(_)));

    let names: Vec<&'static str> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Error(report) => Some(report.error_name),
            _ => None,
        })
        .collect();
    assert_eq!(names, ["NODE_TYPE_UNKNOWN", "ID_CLASH"]);
    Ok(())
}

#[test]
fn config_files_drive_engine_creation() -> anyhow::Result<()> {
    init_logs();
    let config = EngineConfig::from_json(r#"{ "width": 320, "height": 200, "transparent": true }"#)?;
    let engine = Engine::headless(config)?;
    assert_eq!(engine.gpu().drawing_buffer_size(), (320, 200));
    assert!(engine.config().transparent);
    Ok(())
}
