//! The scene tree.
//!
//! [`Scene`] owns every node in an arena, indexes them by ID, and owns the
//! [`CoreFactory`] their cores live in. It builds nodes from [`NodeConfig`]
//! trees through the [`NodeTypeRegistry`], dispatches setters and getters
//! to node types, and runs the compile traversal that turns the tree into
//! display objects.
//!
//! Setters never touch the display directly. They record the cheapest
//! display work that covers the change, and the engine applies it before
//! the next frame; changes that alter a core's shape flag a recompile.

use std::sync::Arc;

use glam::Mat4;
use rustc_hash::FxHashMap;
use serde_json::Value;
use slotmap::SlotMap;

use super::compile::CompileContext;
use super::config::NodeConfig;
use super::loader::{LoadRequest, LoadResult, LoadedAsset};
use super::node::Node;
use super::node_type::{CompileMode, DirtyLevel, NodeType, NodeTypeRegistry};
use super::wrapper::SceneNode;
use super::NodeHandle;
use crate::display::{Display, DisplayDirty, ObjectKey, ObjectMeta};
use crate::errors::{PrismError, Result};
use crate::gpu::GpuContext;
use crate::state::{
    CoreFactory, CoreHandle, CoreKind, CorePayload, GeometryData, LayerSource, ListenersCore,
    LoadState, LoadTarget,
};

/// Display work recorded by setters since the engine last looked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChanges {
    pub display: DisplayDirty,
    /// Shader params gained names their chunks have not looked up.
    pub uniforms: bool,
}

impl Default for PendingChanges {
    fn default() -> Self {
        Self {
            display: DisplayDirty::empty(),
            uniforms: false,
        }
    }
}

pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,
    ids: FxHashMap<String, NodeHandle>,
    root: NodeHandle,
    pub(crate) cores: CoreFactory,
    registry: NodeTypeRegistry,

    /// Detached nodes released at the start of the next compile.
    destroy_queue: Vec<NodeHandle>,
    /// Cores whose GPU resources no longer match their CPU state.
    stale_gpu: Vec<CoreHandle>,
    loads: Vec<LoadRequest>,

    changes: PendingChanges,
    needs_compile: bool,
    next_auto_id: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// An empty scene with the built-in node types.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(NodeTypeRegistry::with_builtins())
    }

    /// An empty scene creating nodes from `registry`.
    ///
    /// The registry needs a `scene` type for the root; a plain group is
    /// used when it has none.
    #[must_use]
    pub fn with_registry(mut registry: NodeTypeRegistry) -> Self {
        if !registry.contains("scene") {
            registry.register(super::types::GroupType::new("scene"));
        }
        let root_type: Arc<dyn NodeType> = match registry.get("scene") {
            Ok(t) => t,
            Err(_) => Arc::new(super::types::GroupType::new("scene")),
        };
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(
            "scene".to_string(),
            root_type,
            None,
            serde_json::Map::new(),
        ));
        let mut ids = FxHashMap::default();
        ids.insert("scene".to_string(), root);
        Self {
            nodes,
            ids,
            root,
            cores: CoreFactory::new(),
            registry,
            destroy_queue: Vec::new(),
            stale_gpu: Vec::new(),
            loads: Vec::new(),
            changes: PendingChanges::default(),
            needs_compile: true,
            next_auto_id: 0,
        }
    }

    /// Builds a scene from a JSON tree whose root has type `scene`.
    ///
    /// The root's own `id` is ignored; its `nodes` become top-level nodes.
    pub fn from_json(value: &Value) -> Result<Self> {
        let config = NodeConfig::from_json(value)?;
        if config.node_type != "scene" {
            return Err(PrismError::IllegalNodeConfig(format!(
                "scene root must have type 'scene', got '{}'",
                config.node_type
            )));
        }
        let mut scene = Self::new();
        let root = scene.root;
        for child in config.nodes {
            scene.create_node(root, child)?;
        }
        Ok(scene)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Registers a node type, replacing any type of the same name.
    pub fn register_type(&mut self, node_type: impl NodeType + 'static) {
        if let Some(old) = self.registry.register(node_type) {
            log::warn!("Node type '{}' replaced", old.type_name());
        }
    }

    #[must_use]
    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Creates a node and its subtree under `parent`.
    ///
    /// On failure nothing of the new subtree stays in the scene.
    pub fn create_node(&mut self, parent: NodeHandle, config: NodeConfig) -> Result<NodeHandle> {
        self.live(parent)?;
        let handle = self.build_node(config)?;
        self.attach(parent, handle);
        self.needs_compile = true;
        Ok(handle)
    }

    /// Parses `value` as a node config and creates it under `parent`.
    pub fn add_node(&mut self, parent: NodeHandle, value: &Value) -> Result<NodeHandle> {
        let config = NodeConfig::from_json(value)?;
        self.create_node(parent, config)
    }

    fn build_node(&mut self, mut config: NodeConfig) -> Result<NodeHandle> {
        let node_type = self.registry.get(&config.node_type)?;
        let id = match config.id.take() {
            Some(id) if self.ids.contains_key(&id) => return Err(PrismError::IdClash(id)),
            Some(id) => id,
            None => self.auto_id(),
        };

        let constructed = node_type.construct(&config)?;
        let core = match node_type.core_kind() {
            Some(kind) => {
                let core_id = node_type.core_id(&config)?;
                let handle = self
                    .cores
                    .get_core(kind, core_id.as_deref(), || node_type.init_core(&config))?;
                Some(handle)
            }
            None => None,
        };

        let children = std::mem::take(&mut config.nodes);
        let params = std::mem::take(&mut config.params);
        let handle = self.nodes.insert(Node::new(id.clone(), node_type, core, params));
        self.ids.insert(id, handle);
        if let Some(core) = core {
            self.queue_loads(handle, core, true);
        }

        for child in constructed.into_iter().chain(children) {
            match self.build_node(child) {
                Ok(child) => self.attach(handle, child),
                Err(err) => {
                    self.discard(handle);
                    return Err(err);
                }
            }
        }
        Ok(handle)
    }

    fn auto_id(&mut self) -> String {
        loop {
            self.next_auto_id += 1;
            let id = format!("node-{}", self.next_auto_id);
            if !self.ids.contains_key(&id) {
                return id;
            }
        }
    }

    /// Queues the outstanding loads of a core. With `fresh_only`, a shared
    /// core already queued by its first node is skipped.
    fn queue_loads(&mut self, node: NodeHandle, core: CoreHandle, fresh_only: bool) {
        let Some(state) = self.cores.get(core) else {
            return;
        };
        if fresh_only && state.use_count > 1 {
            return;
        }
        for (target, uri) in state.payload.pending_loads() {
            self.loads.push(LoadRequest {
                node,
                core,
                target,
                uri,
            });
        }
    }

    /// Loads requested since the last call.
    pub fn take_load_requests(&mut self) -> Vec<LoadRequest> {
        std::mem::take(&mut self.loads)
    }

    fn attach(&mut self, parent: NodeHandle, child: NodeHandle) {
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
    }

    fn detach(&mut self, handle: NodeHandle) {
        let parent = self.nodes.get_mut(handle).and_then(|n| n.parent.take());
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| *c != handle);
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes a node and its subtree now, releasing their cores.
    pub fn remove_node(&mut self, handle: NodeHandle, gpu: &mut dyn GpuContext) -> Result<()> {
        self.removable(handle)?;
        self.detach(handle);
        for node in self.subtree(handle) {
            self.unregister(node);
            self.release(node, gpu);
        }
        self.needs_compile = true;
        Ok(())
    }

    /// Detaches a node and queues it for release at the next compile.
    ///
    /// The node's ID is free for reuse at once.
    pub fn destroy_node(&mut self, handle: NodeHandle) -> Result<()> {
        self.removable(handle)?;
        self.discard(handle);
        self.needs_compile = true;
        Ok(())
    }

    fn removable(&self, handle: NodeHandle) -> Result<()> {
        self.live(handle)?;
        if handle == self.root {
            return Err(PrismError::IllegalNodeConfig(
                "the scene root cannot be removed".to_string(),
            ));
        }
        Ok(())
    }

    fn discard(&mut self, handle: NodeHandle) {
        self.detach(handle);
        for node in self.subtree(handle) {
            self.unregister(node);
            if let Some(node) = self.nodes.get_mut(node) {
                node.destroyed = true;
            }
        }
        self.destroy_queue.push(handle);
    }

    fn unregister(&mut self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get(handle)
            && self.ids.get(&node.id) == Some(&handle)
        {
            self.ids.remove(&node.id);
        }
    }

    fn release(&mut self, handle: NodeHandle, gpu: &mut dyn GpuContext) {
        let Some(node) = self.nodes.remove(handle) else {
            return;
        };
        for core in node.core.into_iter().chain(node.listeners) {
            if self.cores.put_core(core, gpu) {
                self.stale_gpu.retain(|c| *c != core);
            }
        }
        log::debug!("Released node '{}'", node.id);
    }

    /// Releases nodes queued by [`destroy_node`](Self::destroy_node).
    pub fn flush_destroyed(&mut self, gpu: &mut dyn GpuContext) {
        for handle in std::mem::take(&mut self.destroy_queue) {
            for node in self.subtree(handle) {
                self.release(node, gpu);
            }
        }
    }

    /// `handle` and its descendants, parents first.
    fn subtree(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.get(h) {
                out.push(h);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    #[must_use]
    pub fn node_by_id(&self, id: &str) -> Option<NodeHandle> {
        self.ids.get(id).copied()
    }

    #[must_use]
    pub fn get_node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle).filter(|n| !n.destroyed)
    }

    fn live(&self, handle: NodeHandle) -> Result<&Node> {
        self.get_node(handle)
            .ok_or_else(|| PrismError::NodeNotFound(format!("{handle:?}")))
    }

    #[must_use]
    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.get_node(handle).and_then(Node::parent)
    }

    #[must_use]
    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.get_node(handle).map(Node::children).unwrap_or_default()
    }

    /// Visits live nodes depth-first from the root, in child order.
    pub fn each_node(&self, mut f: impl FnMut(NodeHandle, &Node)) {
        for handle in self.subtree(self.root) {
            if let Some(node) = self.nodes.get(handle) {
                f(handle, node);
            }
        }
    }

    #[must_use]
    pub fn find_nodes_by_type(&self, type_name: &str) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        self.each_node(|handle, node| {
            if node.type_name() == type_name {
                out.push(handle);
            }
        });
        out
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.destroyed).count()
    }

    /// Chainable setters for one node.
    #[inline]
    pub fn node(&mut self, handle: NodeHandle) -> SceneNode<'_> {
        SceneNode::new(self, handle)
    }

    #[must_use]
    pub fn cores(&self) -> &CoreFactory {
        &self.cores
    }

    /// The core a node carries; `None` for groups and instances.
    #[must_use]
    pub fn core_of(&self, handle: NodeHandle) -> Option<CoreHandle> {
        self.get_node(handle).and_then(Node::core)
    }

    /// Resolved world matrix of a transform node, as of the last compile
    /// or setter.
    #[must_use]
    pub fn world_matrix(&self, handle: NodeHandle) -> Option<Mat4> {
        let core = self.core_of(handle)?;
        self.cores.transform(core).map(|t| t.world_matrix)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Sets one attribute through the node's type.
    pub fn set(&mut self, handle: NodeHandle, attr: &str, value: &Value) -> Result<()> {
        let node = self.live(handle)?;
        let node_type = Arc::clone(&node.node_type);
        let core = node.core;
        let level = match core {
            Some(core) => self.set_core(handle, core, &*node_type, attr, value)?,
            None => {
                let params = &self.live(handle)?.params;
                let level = node_type.set_param(params, attr, value)?;
                if let Some(node) = self.nodes.get_mut(handle) {
                    node.params.insert(attr.to_string(), value.clone());
                }
                level
            }
        };
        self.note(level);
        Ok(())
    }

    fn set_core(
        &mut self,
        handle: NodeHandle,
        core: CoreHandle,
        node_type: &dyn NodeType,
        attr: &str,
        value: &Value,
    ) -> Result<DirtyLevel> {
        let state = self
            .cores
            .get_mut(core)
            .ok_or_else(|| PrismError::NodeNotFound(format!("core of {handle:?}")))?;
        let kind = state.kind;
        let mut level = node_type.set(&mut state.payload, attr, value)?;

        match kind {
            CoreKind::Transform if self.cores.has_placements(core) => {
                level = level.max(DirtyLevel::Recompile);
            }
            CoreKind::Transform => self.cores.propagate_world(core),
            CoreKind::Geometry | CoreKind::Texture | CoreKind::RegionMap
                if level == DirtyLevel::Recompile =>
            {
                if !self.stale_gpu.contains(&core) {
                    self.stale_gpu.push(core);
                }
                self.queue_loads(handle, core, false);
            }
            _ => {}
        }
        if level == DirtyLevel::Recompile && matches!(kind, CoreKind::Shader | CoreKind::Texture) {
            self.cores.renew_state_id(core);
        }
        Ok(level)
    }

    /// Reads one attribute through the node's type.
    pub fn get(&self, handle: NodeHandle, attr: &str) -> Result<Value> {
        let node = self.live(handle)?;
        match node.core.and_then(|c| self.cores.payload(c)) {
            Some(payload) => node.node_type.get(payload, attr),
            None => node.params.get(attr).cloned().ok_or_else(|| {
                PrismError::IllegalNodeConfig(format!("{}: no attribute '{attr}'", node.type_name()))
            }),
        }
    }

    fn note(&mut self, level: DirtyLevel) {
        let display = &mut self.changes.display;
        match level {
            DirtyLevel::None => {}
            DirtyLevel::Image => *display |= DisplayDirty::IMAGE,
            DirtyLevel::DrawList => *display |= DisplayDirty::DRAW_LIST,
            DirtyLevel::StateOrder => *display |= DisplayDirty::STATE_ORDER,
            DirtyLevel::Uniforms => {
                self.changes.uniforms = true;
                *display |= DisplayDirty::IMAGE;
            }
            DirtyLevel::Recompile => self.needs_compile = true,
        }
    }

    /// Display work recorded since the last call.
    pub fn take_changes(&mut self) -> PendingChanges {
        std::mem::take(&mut self.changes)
    }

    #[inline]
    #[must_use]
    pub fn needs_compile(&self) -> bool {
        self.needs_compile
    }

    /// Forces a compile before the next frame.
    pub fn invalidate(&mut self) {
        self.needs_compile = true;
    }

    // ========================================================================
    // Render Listeners
    // ========================================================================

    /// Makes the node report `NodeRendered` whenever anything below it is
    /// drawn.
    pub fn listen_rendered(&mut self, handle: NodeHandle) -> Result<()> {
        let node = self.live(handle)?;
        if node.listeners.is_some() {
            return Ok(());
        }
        let node_id = node.id.clone();
        let core = self.cores.get_core(CoreKind::Listeners, None, || {
            Ok(CorePayload::Listeners(ListenersCore { node_id }))
        })?;
        if let Some(node) = self.nodes.get_mut(handle) {
            node.listeners = Some(core);
        }
        self.needs_compile = true;
        Ok(())
    }

    /// Stops the node's `NodeRendered` reports.
    pub fn unlisten_rendered(&mut self, handle: NodeHandle, gpu: &mut dyn GpuContext) {
        if let Some(core) = self.nodes.get_mut(handle).and_then(|n| n.listeners.take()) {
            self.cores.put_core(core, gpu);
            self.needs_compile = true;
        }
    }

    // ========================================================================
    // Loads
    // ========================================================================

    /// Applies a finished load.
    ///
    /// Returns `Ok(false)` when the load no longer matches the node it was
    /// made for, which is then left untouched. A failed load marks its core
    /// failed and returns [`PrismError::LoadFailed`].
    pub fn apply_load(&mut self, result: LoadResult) -> Result<bool> {
        let LoadResult { request, outcome } = result;
        let Some(node) = self.get_node(request.node).filter(|n| n.core == Some(request.core))
        else {
            log::warn!("Dropping load of '{}': its node is gone", request.uri);
            return Ok(false);
        };
        let node_id = node.id.clone();
        let Some(payload) = self.cores.get_mut(request.core).map(|c| &mut c.payload) else {
            return Ok(false);
        };
        if !load_matches(payload, &request) {
            log::warn!("Dropping load of '{}': superseded", request.uri);
            return Ok(false);
        }

        let applied = match outcome {
            Ok(asset) => fill(payload, request.target, asset),
            Err(reason) => Err(reason),
        };
        match applied {
            Ok(()) => {
                log::debug!("Loaded '{}' for node '{node_id}'", request.uri);
                self.needs_compile = true;
                Ok(true)
            }
            Err(reason) => {
                mark_failed(payload, request.target);
                Err(PrismError::LoadFailed {
                    node: node_id,
                    reason,
                })
            }
        }
    }

    // ========================================================================
    // Compile
    // ========================================================================

    /// Runs the compile traversal, building a display object for every
    /// reachable geometry leaf and dropping the rest.
    pub fn compile(&mut self, display: &mut Display, gpu: &mut dyn GpuContext) -> Result<()> {
        self.flush_destroyed(gpu);
        for core in std::mem::take(&mut self.stale_gpu) {
            self.cores.release_core_gpu(core, gpu);
        }

        log::debug!("Compiling scene ({} nodes)", self.node_count());
        let mut ctx = CompileContext::new(&self.cores);
        display.begin_compile();
        self.compile_node(self.root, &mut ctx, display, gpu)?;
        display.end_compile(gpu);
        self.needs_compile = false;
        Ok(())
    }

    fn compile_node(
        &mut self,
        handle: NodeHandle,
        ctx: &mut CompileContext,
        display: &mut Display,
        gpu: &mut dyn GpuContext,
    ) -> Result<()> {
        let Some(node) = self.get_node(handle) else {
            return Ok(());
        };
        let node_type = Arc::clone(&node.node_type);
        let core = node.core;
        let listeners = node.listeners;
        let children = node.children.clone();

        if let Some(listeners) = listeners {
            ctx.push(CoreKind::Listeners, listeners);
        }
        match (node_type.compile_mode(), core) {
            (CompileMode::Push, Some(core)) => {
                self.compile_push(handle, core, &children, ctx, display, gpu)?;
            }
            (CompileMode::Geometry, Some(core)) => {
                let mut states = ctx.states();
                states.set_core(CoreKind::Geometry, core);
                let meta = ObjectMeta {
                    node_id: self.nodes.get(handle).map(|n| n.id.clone()).unwrap_or_default(),
                    path: ctx.path().to_vec(),
                };
                let key = ObjectKey::new(handle, ctx.placement());
                display.build_object(key, states, meta, gpu, &mut self.cores)?;
                self.compile_children(&children, ctx, display, gpu)?;
            }
            (CompileMode::Instance, _) => self.compile_instance(handle, ctx, display, gpu)?,
            _ => self.compile_children(&children, ctx, display, gpu)?,
        }
        if listeners.is_some() {
            ctx.pop(CoreKind::Listeners)?;
        }
        Ok(())
    }

    fn compile_children(
        &mut self,
        children: &[NodeHandle],
        ctx: &mut CompileContext,
        display: &mut Display,
        gpu: &mut dyn GpuContext,
    ) -> Result<()> {
        for &child in children {
            self.compile_node(child, ctx, display, gpu)?;
        }
        Ok(())
    }

    fn compile_push(
        &mut self,
        handle: NodeHandle,
        core: CoreHandle,
        children: &[NodeHandle],
        ctx: &mut CompileContext,
        display: &mut Display,
        gpu: &mut dyn GpuContext,
    ) -> Result<()> {
        let Some(kind) = self.cores.get(core).map(|c| c.kind) else {
            return self.compile_children(children, ctx, display, gpu);
        };
        let mut pushed = core;
        match kind {
            CoreKind::Transform => {
                pushed = self.cores.placement_core(core, ctx.placement());
                let parent = ctx.top(CoreKind::Transform);
                self.cores.link_transform(pushed, parent, ctx.instancing());
            }
            CoreKind::Texture => self.resolve_targets(core),
            _ => {}
        }
        let name = match self.cores.payload(core) {
            Some(CorePayload::Name(n)) => Some(n.name.clone()),
            _ => None,
        };

        ctx.push(kind, pushed);
        if let Some(name) = name.clone() {
            ctx.push_name(name);
        }
        log::trace!("push {} for {handle:?}", kind.as_str());
        self.compile_children(children, ctx, display, gpu)?;
        if name.is_some() {
            ctx.pop_name();
        }
        ctx.pop(kind)?;
        Ok(())
    }

    /// Points texture layers that read a render target at the target
    /// node's core.
    fn resolve_targets(&mut self, texture: CoreHandle) {
        let targets: Vec<(usize, Option<CoreHandle>)> = self
            .cores
            .payload(texture)
            .and_then(CorePayload::texture)
            .map(|t| {
                t.layers
                    .iter()
                    .enumerate()
                    .filter_map(|(i, layer)| match &layer.source {
                        LayerSource::Target(id) => Some((i, self.target_core(id))),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if targets.is_empty() {
            return;
        }
        if let Some(t) = self
            .cores
            .get_mut(texture)
            .and_then(|c| c.payload.texture_mut())
        {
            for (i, core) in targets {
                if let Some(layer) = t.layers.get_mut(i) {
                    layer.target_core = core;
                }
            }
        }
    }

    fn target_core(&self, id: &str) -> Option<CoreHandle> {
        let core = self.node_by_id(id).and_then(|h| self.core_of(h));
        let is_target = core
            .and_then(|c| self.cores.get(c))
            .is_some_and(|c| c.kind == CoreKind::RenderTarget);
        if !is_target {
            log::warn!("Texture layer target '{id}' is not a render target node");
            return None;
        }
        core
    }

    fn compile_instance(
        &mut self,
        handle: NodeHandle,
        ctx: &mut CompileContext,
        display: &mut Display,
        gpu: &mut dyn GpuContext,
    ) -> Result<()> {
        let Some(node) = self.get_node(handle) else {
            return Ok(());
        };
        let id = node.id.clone();
        let Some(target_id) = node.params.get("target").and_then(Value::as_str) else {
            log::warn!("Instance '{id}' has no target");
            return Ok(());
        };
        let Some(target) = self.node_by_id(target_id) else {
            log::warn!("Instance '{id}' targets unknown node '{target_id}'");
            return Ok(());
        };
        let children = node.children.clone();
        let previous = ctx.enter_instance(handle, &id)?;
        self.compile_node(target, ctx, display, gpu)?;
        ctx.exit_instance(previous);
        self.compile_children(&children, ctx, display, gpu)
    }
}

/// Whether a completion still answers what the core is waiting for.
fn load_matches(payload: &CorePayload, request: &LoadRequest) -> bool {
    match (payload, request.target) {
        (CorePayload::Geometry(g), LoadTarget::Geometry) => {
            g.state == LoadState::Pending && g.source.as_deref() == Some(request.uri.as_str())
        }
        (CorePayload::Texture(t), LoadTarget::TextureLayer(i)) => t.layers.get(i).is_some_and(|l| {
            l.state == LoadState::Pending
                && matches!(&l.source, LayerSource::Uri(uri) if *uri == request.uri)
        }),
        _ => false,
    }
}

fn fill(payload: &mut CorePayload, target: LoadTarget, asset: LoadedAsset) -> Result<(), String> {
    match (payload, target, asset) {
        (CorePayload::Geometry(g), LoadTarget::Geometry, LoadedAsset::Geometry(config)) => {
            let data = GeometryData::new(config).map_err(|e| e.to_string())?;
            g.data = Arc::new(data);
            g.state = LoadState::Ready;
            g.buffers = None;
            Ok(())
        }
        (CorePayload::Texture(t), LoadTarget::TextureLayer(i), LoadedAsset::Image(image)) => {
            let layer = t
                .layers
                .get_mut(i)
                .ok_or_else(|| format!("texture has no layer {i}"))?;
            layer.image = Some(Arc::new(image));
            layer.state = LoadState::Ready;
            layer.gpu = None;
            Ok(())
        }
        _ => Err("asset does not fit the load target".to_string()),
    }
}

fn mark_failed(payload: &mut CorePayload, target: LoadTarget) {
    match (payload, target) {
        (CorePayload::Geometry(g), LoadTarget::Geometry) => g.state = LoadState::Failed,
        (CorePayload::Texture(t), LoadTarget::TextureLayer(i)) => {
            if let Some(layer) = t.layers.get_mut(i) {
                layer.state = LoadState::Failed;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;
    use serde_json::json;

    fn scene(value: Value) -> Scene {
        Scene::from_json(&value).unwrap()
    }

    #[test]
    fn ids_clash_and_free_on_destroy() {
        let mut scene = scene(json!({
            "type": "scene",
            "nodes": [{ "type": "material", "id": "red" }],
        }));
        let root = scene.root();
        let err = scene
            .add_node(root, &json!({ "type": "material", "id": "red" }))
            .unwrap_err();
        assert!(matches!(err, PrismError::IdClash(id) if id == "red"));

        let red = scene.node_by_id("red").unwrap();
        scene.destroy_node(red).unwrap();
        assert!(scene.node_by_id("red").is_none());
        assert!(scene.add_node(root, &json!({ "type": "material", "id": "red" })).is_ok());
    }

    #[test]
    fn failed_children_roll_back_the_subtree() {
        let mut scene = Scene::new();
        let root = scene.root();
        let err = scene
            .add_node(
                root,
                &json!({
                    "type": "node",
                    "id": "group",
                    "nodes": [
                        { "type": "material", "id": "ok" },
                        { "type": "rotate", "x": 0, "y": 0, "z": 0 },
                    ],
                }),
            )
            .unwrap_err();
        assert!(matches!(err, PrismError::IllegalNodeConfig(_)));
        assert!(scene.node_by_id("group").is_none());
        assert!(scene.node_by_id("ok").is_none());
        assert!(scene.children(root).is_empty());

        let mut gpu = HeadlessGpu::new(8, 8);
        scene.flush_destroyed(&mut gpu);
        assert_eq!(scene.cores().count(CoreKind::Material), 0);
    }

    #[test]
    fn unknown_types_are_rejected() {
        let mut scene = Scene::new();
        let root = scene.root();
        let err = scene.add_node(root, &json!({ "type": "teapot" })).unwrap_err();
        assert!(matches!(err, PrismError::UnknownNodeType(_)));
    }

    #[test]
    fn setters_record_the_cheapest_display_work() {
        let mut scene = scene(json!({
            "type": "scene",
            "nodes": [
                { "type": "material", "id": "m" },
                { "type": "layer", "id": "l" },
                { "type": "enable", "id": "e" },
            ],
        }));
        let mut gpu = HeadlessGpu::new(8, 8);
        let mut display = Display::default();
        scene.compile(&mut display, &mut gpu).unwrap();

        let m = scene.node_by_id("m").unwrap();
        scene.set(m, "baseColor", &json!({ "r": 1.0 })).unwrap();
        let l = scene.node_by_id("l").unwrap();
        scene.set(l, "priority", &json!(3)).unwrap();
        let changes = scene.take_changes();
        assert!(changes.display.contains(DisplayDirty::IMAGE | DisplayDirty::STATE_ORDER));
        assert!(!changes.display.contains(DisplayDirty::DRAW_LIST));
        assert!(!scene.needs_compile());

        let e = scene.node_by_id("e").unwrap();
        scene.set(e, "enabled", &json!(false)).unwrap();
        assert_eq!(scene.take_changes().display, DisplayDirty::DRAW_LIST);
        assert_eq!(scene.take_changes(), PendingChanges::default());
    }

    #[test]
    fn instance_params_are_retained() {
        let mut scene = scene(json!({
            "type": "scene",
            "nodes": [
                { "type": "node", "id": "lib" },
                { "type": "instance", "id": "use", "target": "lib" },
            ],
        }));
        let inst = scene.node_by_id("use").unwrap();
        assert_eq!(scene.get(inst, "target").unwrap(), json!("lib"));
        scene.set(inst, "target", &json!("other")).unwrap();
        assert!(scene.needs_compile());
        assert!(scene.set(inst, "target", &json!(3)).is_err());
        assert_eq!(scene.get(inst, "target").unwrap(), json!("other"));
    }

    #[test]
    fn each_node_walks_depth_first() {
        let scene = scene(json!({
            "type": "scene",
            "nodes": [
                { "type": "node", "id": "a", "nodes": [{ "type": "node", "id": "a1" }] },
                { "type": "node", "id": "b" },
            ],
        }));
        let mut ids = Vec::new();
        scene.each_node(|_, node| ids.push(node.id().to_string()));
        assert_eq!(ids, ["scene", "a", "a1", "b"]);
        assert_eq!(scene.find_nodes_by_type("node").len(), 3);
    }
}
