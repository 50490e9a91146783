//! Engine Core Module
//!
//! This module contains [`Engine`], the coordinator that owns a [`Scene`],
//! its [`Display`], and the graphics context they draw with. It has no
//! windowing of its own; a frontend calls [`Engine::render`] once per frame.
//!
//! # Architecture
//!
//! - **Scene**: the node tree and the cores it shares
//! - **Display**: display objects, programs and chunks, the draw and pick lists
//! - **`EventBus`**: lifecycle events, render listeners and fatal error reports
//! - **Status**: task bookkeeping for asynchronous loads
//!
//! # Frame
//!
//! 1. Apply finished loads and hand new load requests to the loader
//! 2. Apply the display work recorded by setters
//! 3. Re-run the compile traversal if the tree changed shape
//! 4. Draw, if anything is dirty
//!
//! # Example
//!
//! ```rust,ignore
//! use prism::{Engine, EngineConfig};
//! use serde_json::json;
//!
//! let mut engine = Engine::headless(EngineConfig::default())?;
//! let root = engine.scene().root();
//! engine.add_node(root, &json!({ "type": "geometry/box", "size": 2 }))?;
//! engine.render()?;
//! ```

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::display::{ChunkKind, Display, DisplayDirty, PickHit, PickOptions, ProgramSourceFactory};
use crate::errors::{PrismError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::gpu::{GpuContext, HeadlessGpu};
use crate::scene::loader::{self, AssetLoader, LoadResult, LoadSender, NullLoader};
use crate::scene::{NodeConfig, NodeHandle, Scene};
use crate::state::{CoreHandle, LoadTarget};
use crate::status::{Status, TaskId};

/// The engine instance.
///
/// # Lifecycle
///
/// 1. Create with [`Engine::new`] (or [`Engine::headless`])
/// 2. Build the scene through [`Engine::add_node`] or [`Engine::scene_mut`]
/// 3. Call [`Engine::render`] every frame
/// 4. After a context loss, call [`Engine::context_restored`] once the
///    context is back
pub struct Engine<G: GpuContext> {
    scene: Scene,
    display: Display,
    gpu: G,
    events: EventBus,
    status: Status,
    config: EngineConfig,

    loader: Box<dyn AssetLoader>,
    load_sender: LoadSender,
    load_results: flume::Receiver<LoadResult>,
    load_tasks: FxHashMap<(CoreHandle, LoadTarget), TaskId>,

    context_lost: bool,
    frame_count: u64,
}

impl Engine<HeadlessGpu> {
    /// An engine over a [`HeadlessGpu`] sized from the config.
    pub fn headless(config: EngineConfig) -> Result<Self> {
        let gpu = HeadlessGpu::new(config.width, config.height);
        Self::new(gpu, config)
    }
}

impl<G: GpuContext> Engine<G> {
    /// Creates an engine with an empty scene.
    ///
    /// # Errors
    ///
    /// - [`PrismError::CanvasNotFound`] if the drawing buffer has no area
    /// - [`PrismError::ContextNotSupported`] if the context is already lost
    pub fn new(gpu: G, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let (width, height) = gpu.drawing_buffer_size();
        if width == 0 || height == 0 {
            return Err(PrismError::CanvasNotFound(format!(
                "drawing buffer is {width}x{height}"
            )));
        }
        if gpu.is_context_lost() {
            return Err(PrismError::ContextNotSupported(
                "context is lost before first use".to_string(),
            ));
        }
        let sources = ProgramSourceFactory::new(config.shader_dump_dir.clone());
        let (load_sender, load_results) = loader::channel();
        log::info!("Engine created ({width}x{height})");
        Ok(Self {
            scene: Scene::new(),
            display: Display::new(sources, config.pick_buffer),
            gpu,
            events: EventBus::new(),
            status: Status::new(),
            config,
            loader: Box::new(NullLoader),
            load_sender,
            load_results,
            load_tasks: FxHashMap::default(),
            context_lost: false,
            frame_count: 0,
        })
    }

    /// Replaces the scene, releasing the old one's GPU state.
    pub fn set_scene(&mut self, scene: Scene) {
        let mut old = std::mem::replace(&mut self.scene, scene);
        for core in old.cores.gpu_backed() {
            old.cores.release_core_gpu(core, &mut self.gpu);
        }
        self.display.begin_compile();
        self.display.end_compile(&mut self.gpu);
        self.scene.invalidate();
    }

    /// Sets the loader that pending cores are fetched through.
    pub fn set_loader(&mut self, loader: impl AssetLoader + 'static) {
        self.loader = Box::new(loader);
    }

    /// A sender for reporting loads outside the registered loader.
    #[must_use]
    pub fn load_sender(&self) -> LoadSender {
        self.load_sender.clone()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[inline]
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    #[inline]
    #[must_use]
    pub fn display(&self) -> &Display {
        &self.display
    }

    #[inline]
    #[must_use]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    #[inline]
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> &Status {
        &self.status
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    /// Frames actually drawn.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    // ========================================================================
    // Scene Editing
    // ========================================================================

    pub fn create_node(&mut self, parent: NodeHandle, config: NodeConfig) -> Result<NodeHandle> {
        let created = self.scene.create_node(parent, config);
        created.map_err(|e| self.fail(e))
    }

    pub fn add_node(&mut self, parent: NodeHandle, value: &Value) -> Result<NodeHandle> {
        let created = self.scene.add_node(parent, value);
        created.map_err(|e| self.fail(e))
    }

    pub fn set(&mut self, node: NodeHandle, attr: &str, value: &Value) -> Result<()> {
        let set = self.scene.set(node, attr, value);
        set.map_err(|e| self.fail(e))
    }

    pub fn get(&self, node: NodeHandle, attr: &str) -> Result<Value> {
        self.scene.get(node, attr)
    }

    /// Removes a subtree now.
    pub fn remove_node(&mut self, node: NodeHandle) -> Result<()> {
        let removed = self.scene.remove_node(node, &mut self.gpu);
        removed.map_err(|e| self.fail(e))
    }

    /// Removes a subtree at the next compile.
    pub fn destroy_node(&mut self, node: NodeHandle) -> Result<()> {
        let destroyed = self.scene.destroy_node(node);
        destroyed.map_err(|e| self.fail(e))
    }

    /// Makes the node publish [`EngineEvent::NodeRendered`] when anything
    /// below it is drawn.
    pub fn listen_rendered(&mut self, node: NodeHandle) -> Result<()> {
        self.scene.listen_rendered(node)
    }

    /// Restricts drawing to objects whose tag matches the `|`-separated,
    /// `*`-wildcarded pattern; `None` draws everything.
    pub fn set_tag_selector(&mut self, pattern: Option<&str>) {
        self.display.select_tags(pattern);
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Brings the display up to date and draws it if anything changed.
    ///
    /// Returns whether a frame was drawn. While the context is lost this
    /// does nothing and returns `Ok(false)`.
    pub fn render(&mut self) -> Result<bool> {
        if !self.prepare()? {
            return Ok(false);
        }
        if !self.display.needs_redraw() {
            return Ok(false);
        }
        let rendered = self
            .display
            .render(&mut self.gpu, &self.scene.cores, self.config.transparent);
        match rendered {
            Ok(nodes) => {
                self.frame_count += 1;
                for id in nodes {
                    self.events.publish(&EngineEvent::NodeRendered(id));
                }
                Ok(true)
            }
            Err(PrismError::ContextLost) => {
                self.lose_context();
                Ok(false)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Picks at canvas pixel `(x, y)`, top-left origin.
    pub fn pick(&mut self, x: u32, y: u32, options: PickOptions) -> Result<Option<PickHit>> {
        if !self.prepare()? {
            return Ok(None);
        }
        let picked = self
            .display
            .pick(&mut self.gpu, &self.scene.cores, x, y, options);
        match picked {
            Ok(Some(hit)) => {
                log::debug!("Picked '{}' at ({x}, {y})", hit.node_id);
                self.events.publish(&EngineEvent::NodePicked(hit.clone()));
                Ok(Some(hit))
            }
            Ok(None) => {
                self.events.publish(&EngineEvent::NothingPicked { x, y });
                Ok(None)
            }
            Err(PrismError::ContextLost) => {
                self.lose_context();
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Runs everything a frame needs short of drawing. Returns `false` if
    /// the context is lost.
    fn prepare(&mut self) -> Result<bool> {
        if self.context_lost {
            return Ok(false);
        }
        if self.gpu.is_context_lost() {
            self.lose_context();
            return Ok(false);
        }
        self.poll_loads();
        self.dispatch_loads();
        self.apply_changes();
        if self.scene.needs_compile() {
            match self.compile() {
                Ok(()) => {}
                Err(PrismError::ContextLost) => {
                    self.lose_context();
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn apply_changes(&mut self) {
        let changes = self.scene.take_changes();
        if changes.uniforms {
            for kind in [ChunkKind::Shader, ChunkKind::ShaderParams] {
                self.display.rebuild_chunks(kind, &mut self.gpu, &self.scene.cores);
            }
        }
        self.display.mark(changes.display);
    }

    /// Re-runs the compile traversal now.
    pub fn compile(&mut self) -> Result<()> {
        self.events.publish(&EngineEvent::SceneCompiling);
        let compiled = self.scene.compile(&mut self.display, &mut self.gpu);
        match compiled {
            Ok(()) => Ok(()),
            Err(PrismError::ContextLost) => Err(PrismError::ContextLost),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Logs an error and, if fatal, publishes its report.
    fn fail(&mut self, err: PrismError) -> PrismError {
        let report = err.report();
        if report.fatal {
            log::error!("{}: {}", report.error_name, report.exception);
            self.events.publish(&EngineEvent::Error(report));
        } else {
            log::warn!("{}: {}", report.error_name, report.exception);
        }
        err
    }

    // ========================================================================
    // Loads
    // ========================================================================

    fn dispatch_loads(&mut self) {
        for request in self.scene.take_load_requests() {
            let node_id = self.scene.get_node(request.node).map(|n| n.id().to_string());
            let description = format!("load {}", request.uri);
            let task = self.status.task_started(description.clone(), node_id.as_deref());
            self.load_tasks.insert((request.core, request.target), task);
            self.events.publish(&EngineEvent::TaskStarted {
                task: task.as_u64(),
                description,
            });
            self.loader.load(request, self.load_sender.clone());
        }
    }

    /// Applies every load completed since the last call. Returns how many
    /// took effect.
    ///
    /// Completions for destroyed nodes are dropped; failures are logged and
    /// leave their subtree absent.
    pub fn poll_loads(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(result) = self.load_results.try_recv() {
            let task = self
                .load_tasks
                .remove(&(result.request.core, result.request.target));
            let outcome = self.scene.apply_load(result);
            let reason = match outcome {
                Ok(true) => {
                    applied += 1;
                    None
                }
                Ok(false) => Some("cancelled".to_string()),
                Err(err) => {
                    let reason = err.to_string();
                    self.fail(err);
                    Some(reason)
                }
            };
            let Some(task) = task else {
                continue;
            };
            match reason {
                None => {
                    self.status.task_finished(task);
                    self.events.publish(&EngineEvent::TaskFinished {
                        task: task.as_u64(),
                    });
                }
                Some(reason) => {
                    self.status.task_failed(task, reason.clone());
                    self.events.publish(&EngineEvent::TaskFailed {
                        task: task.as_u64(),
                        reason,
                    });
                }
            }
        }
        applied
    }

    // ========================================================================
    // Context Loss
    // ========================================================================

    fn lose_context(&mut self) {
        if self.context_lost {
            return;
        }
        log::warn!("Graphics context lost; rendering suspended");
        self.context_lost = true;
        self.scene.cores.forget_gpu();
        self.display.forget_gpu();
        self.events.publish(&EngineEvent::ContextLost);
    }

    /// Rebuilds every GPU resource from retained CPU state once the context
    /// is back. The scene is untouched.
    pub fn context_restored(&mut self) -> Result<()> {
        if self.gpu.is_context_lost() {
            return Err(PrismError::ContextLost);
        }
        // A loss nobody rendered through yet still invalidated every handle.
        if !self.context_lost {
            self.scene.cores.forget_gpu();
            self.display.forget_gpu();
        }
        let canvas = self.gpu.drawing_buffer_size();
        for core in self.scene.cores.gpu_backed() {
            let uploaded = self.scene.cores.ensure_gpu(core, &mut self.gpu, canvas);
            uploaded.map_err(|e| self.fail(e))?;
        }
        let restored = self.display.webgl_restored(&mut self.gpu, &self.scene.cores);
        restored.map_err(|e| self.fail(e))?;

        self.context_lost = false;
        self.display.mark(DisplayDirty::IMAGE);
        log::info!("Graphics context restored");
        self.events.publish(&EngineEvent::ContextRestored);
        Ok(())
    }
}
