//! Core arena with `coreId` sharing and use counts.

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::{
    CoreHandle, CoreKind, CorePayload, GeometryBuffers, LoadState, MemoLevel, StateCore,
    TransformCore,
};
use crate::errors::Result;
use crate::gpu::{GpuContext, TextureSampling};

/// Owns every core.
///
/// Each category has a default core (state ID 0) that is never released.
/// Cores created with an explicit `coreId` are registered so later nodes
/// asking for the same `(kind, coreId)` share them.
pub struct CoreFactory {
    cores: SlotMap<CoreHandle, StateCore>,
    by_id: FxHashMap<(CoreKind, String), CoreHandle>,
    defaults: [CoreHandle; CoreKind::COUNT],
    /// Transform cores derived for `instance` placements, keyed by base core
    /// and placement hash.
    placements: FxHashMap<(CoreHandle, u64), CoreHandle>,
    next_state_id: u64,
}

impl Default for CoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreFactory {
    #[must_use]
    pub fn new() -> Self {
        let mut cores = SlotMap::with_key();
        let defaults = CoreKind::ALL.map(|kind| {
            cores.insert(StateCore {
                kind,
                state_id: 0,
                core_id: None,
                use_count: 1,
                empty: kind.default_is_empty(),
                payload: CorePayload::default_for(kind),
            })
        });
        Self {
            cores,
            by_id: FxHashMap::default(),
            defaults,
            placements: FxHashMap::default(),
            next_state_id: 1,
        }
    }

    // ========================================================================
    // Acquire / Release
    // ========================================================================

    /// Returns the core registered under `(kind, core_id)` with its use count
    /// bumped, or creates one from `init`.
    pub fn get_core(
        &mut self,
        kind: CoreKind,
        core_id: Option<&str>,
        init: impl FnOnce() -> Result<CorePayload>,
    ) -> Result<CoreHandle> {
        if let Some(id) = core_id {
            if let Some(&handle) = self.by_id.get(&(kind, id.to_string())) {
                if let Some(core) = self.cores.get_mut(handle) {
                    core.use_count += 1;
                    log::debug!("Sharing {} core '{id}' (uses: {})", kind.as_str(), core.use_count);
                    return Ok(handle);
                }
            }
        }
        let payload = init()?;
        let handle = self.insert(kind, core_id.map(str::to_string), payload);
        if let Some(id) = core_id {
            self.by_id.insert((kind, id.to_string()), handle);
        }
        Ok(handle)
    }

    fn insert(
        &mut self,
        kind: CoreKind,
        core_id: Option<String>,
        payload: CorePayload,
    ) -> CoreHandle {
        let state_id = self.next_state_id;
        self.next_state_id += 1;
        self.cores.insert(StateCore {
            kind,
            state_id,
            core_id,
            use_count: 1,
            empty: false,
            payload,
        })
    }

    /// Gives a core a fresh state ID, so programs and chunks keyed on the
    /// old one are not reused after its shape changed in place.
    pub fn renew_state_id(&mut self, handle: CoreHandle) {
        if self.is_default(handle) {
            return;
        }
        let state_id = self.next_state_id;
        if let Some(core) = self.cores.get_mut(handle) {
            core.state_id = state_id;
            self.next_state_id += 1;
        }
    }

    #[must_use]
    pub fn has_core(&self, kind: CoreKind, core_id: &str) -> bool {
        self.by_id.contains_key(&(kind, core_id.to_string()))
    }

    /// Drops one use of a core. At zero the core and its GPU resources are
    /// released; returns whether that happened.
    pub fn put_core(&mut self, handle: CoreHandle, gpu: &mut dyn GpuContext) -> bool {
        if self.is_default(handle) {
            return false;
        }
        let Some(core) = self.cores.get_mut(handle) else {
            return false;
        };
        core.use_count = core.use_count.saturating_sub(1);
        if core.use_count > 0 {
            return false;
        }
        let Some(core) = self.cores.remove(handle) else {
            return false;
        };
        if let Some(id) = &core.core_id {
            self.by_id.remove(&(core.kind, id.clone()));
        }
        if let Some(parent) = core.payload.transform().and_then(TransformCore::parent) {
            self.unlink_child(parent, handle);
        }
        let derived: Vec<(u64, CoreHandle)> = self
            .placements
            .iter()
            .filter(|((base, _), _)| *base == handle)
            .map(|((_, placement), derived)| (*placement, *derived))
            .collect();
        for (placement, derived) in derived {
            self.placements.remove(&(handle, placement));
            if let Some(parent) = self.transform(derived).and_then(TransformCore::parent) {
                self.unlink_child(parent, derived);
            }
            self.cores.remove(derived);
        }
        release_gpu(core.payload, gpu);
        log::debug!("Released {} core #{}", core.kind.as_str(), core.state_id);
        true
    }

    // ========================================================================
    // Access
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn get(&self, handle: CoreHandle) -> Option<&StateCore> {
        self.cores.get(handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: CoreHandle) -> Option<&mut StateCore> {
        self.cores.get_mut(handle)
    }

    #[inline]
    #[must_use]
    pub fn payload(&self, handle: CoreHandle) -> Option<&CorePayload> {
        self.cores.get(handle).map(|c| &c.payload)
    }

    #[inline]
    #[must_use]
    pub fn default_core(&self, kind: CoreKind) -> CoreHandle {
        self.defaults[kind.index()]
    }

    #[inline]
    #[must_use]
    pub fn is_default(&self, handle: CoreHandle) -> bool {
        self.cores
            .get(handle)
            .is_some_and(|c| self.defaults[c.kind.index()] == handle)
    }

    #[must_use]
    pub fn state_id(&self, handle: CoreHandle) -> u64 {
        self.cores.get(handle).map_or(0, |c| c.state_id)
    }

    #[must_use]
    pub fn hash(&self, handle: CoreHandle) -> String {
        self.cores.get(handle).map(StateCore::hash).unwrap_or_default()
    }

    /// Number of live cores of a category, defaults excluded.
    #[must_use]
    pub fn count(&self, kind: CoreKind) -> usize {
        self.cores
            .iter()
            .filter(|(h, c)| c.kind == kind && !self.is_default(*h))
            .count()
    }

    pub fn handles(&self) -> impl Iterator<Item = CoreHandle> + '_ {
        self.cores.keys()
    }

    #[must_use]
    pub fn transform(&self, handle: CoreHandle) -> Option<&TransformCore> {
        self.payload(handle)?.transform()
    }

    pub fn transform_mut(&mut self, handle: CoreHandle) -> Option<&mut TransformCore> {
        self.cores.get_mut(handle)?.payload.transform_mut()
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// The transform core standing in for `base` inside an `instance`
    /// placement, created on first use.
    pub fn placement_core(&mut self, base: CoreHandle, placement: u64) -> CoreHandle {
        if placement == 0 {
            return base;
        }
        if let Some(&derived) = self.placements.get(&(base, placement)) {
            return derived;
        }
        let Some(base_core) = self.transform(base) else {
            return base;
        };
        let mut derived = TransformCore::new(base_core.local, base_core.mult_order);
        derived.placement_of = Some(base);
        let core_id = None;
        let handle = self.insert(CoreKind::Transform, core_id, CorePayload::Transform(derived));
        self.placements.insert((base, placement), handle);
        handle
    }

    #[must_use]
    pub fn has_placements(&self, base: CoreHandle) -> bool {
        self.placements.keys().any(|(b, _)| *b == base)
    }

    /// Composes a transform core against the transform enclosing it in the
    /// current traversal, honouring its memoization level.
    pub fn link_transform(&mut self, core: CoreHandle, parent: CoreHandle, instancing: bool) {
        let (parent_world, parent_fixed) = self
            .transform(parent)
            .map_or((Mat4::IDENTITY, true), |p| (p.world_matrix, p.fixed));

        let base = self.transform(core).and_then(|t| t.placement_of);
        let synced = base.and_then(|b| self.transform(b)).map(|b| (b.local, b.mult_order));

        let Some(t) = self.transform_mut(core) else {
            return;
        };
        if let Some((local, order)) = synced {
            if t.local != local || t.mult_order != order {
                t.set_local(local);
                t.set_mult_order(order);
            }
        }
        let old_parent = t.parent;
        if old_parent != Some(parent) {
            t.parent = Some(parent);
            t.memo = MemoLevel::Unmemoized;
        }
        let step = t.memo.advance(parent_fixed, instancing);
        if step.rebuild_local {
            t.local_matrix = t.local.matrix();
        }
        if step.rebuild_world {
            t.compose(parent_world);
        }
        t.memo = step.next;
        t.fixed = step.fixed;

        if old_parent != Some(parent) {
            if let Some(old) = old_parent {
                self.unlink_child(old, core);
            }
            if let Some(p) = self.transform_mut(parent) {
                if !p.children.contains(&core) {
                    p.children.push(core);
                }
            }
        }
    }

    fn unlink_child(&mut self, parent: CoreHandle, child: CoreHandle) {
        if let Some(p) = self.transform_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }

    /// Recomputes the world matrix of `root` and every transform linked
    /// below it, after a setter changed `root`'s local matrix.
    pub fn propagate_world(&mut self, root: CoreHandle) {
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            let parent_world = self
                .transform(handle)
                .and_then(TransformCore::parent)
                .and_then(|p| self.transform(p))
                .map_or(Mat4::IDENTITY, |p| p.world_matrix);
            if let Some(t) = self.transform_mut(handle) {
                t.compose(parent_world);
                stack.extend(t.children.iter().copied());
            }
        }
    }

    // ========================================================================
    // GPU Resources
    // ========================================================================

    /// Uploads whatever GPU resources the core needs and does not have yet.
    pub fn ensure_gpu(
        &mut self,
        handle: CoreHandle,
        gpu: &mut dyn GpuContext,
        canvas: (u32, u32),
    ) -> Result<()> {
        let Some(core) = self.cores.get_mut(handle) else {
            return Ok(());
        };
        if core.empty {
            return Ok(());
        }
        match &mut core.payload {
            CorePayload::Geometry(g) if g.state == LoadState::Ready && g.buffers.is_none() => {
                g.buffers = Some(GeometryBuffers::upload(gpu, &g.data)?);
            }
            CorePayload::Texture(t) => {
                for layer in &mut t.layers {
                    if layer.gpu.is_some() || !layer.is_ready() {
                        continue;
                    }
                    if let Some(image) = &layer.image {
                        layer.gpu = Some(gpu.create_texture(image, layer.sampling)?);
                    }
                }
            }
            CorePayload::RegionMap(r) if r.gpu.is_none() => {
                if let Some(image) = &r.image {
                    r.gpu = Some(gpu.create_texture(image, TextureSampling::default())?);
                }
            }
            CorePayload::RenderTarget(rt) if rt.buffer.is_none() => {
                let (w, h) = rt.size.unwrap_or(canvas);
                rt.buffer = Some(gpu.create_render_buffer(w.max(1), h.max(1))?);
            }
            _ => {}
        }
        Ok(())
    }

    /// Releases the GPU resources of one core, keeping its CPU state.
    pub fn release_core_gpu(&mut self, handle: CoreHandle, gpu: &mut dyn GpuContext) {
        if let Some(core) = self.cores.get_mut(handle) {
            let payload = core.payload.clone();
            forget_payload_gpu(&mut core.payload);
            release_gpu(payload, gpu);
        }
    }

    /// Drops every GPU handle without deleting it, after a context loss has
    /// invalidated them all.
    pub fn forget_gpu(&mut self) {
        for core in self.cores.values_mut() {
            forget_payload_gpu(&mut core.payload);
        }
    }

    /// Handles of cores that hold uploadable state, for a rebuild pass.
    #[must_use]
    pub fn gpu_backed(&self) -> Vec<CoreHandle> {
        self.cores
            .iter()
            .filter(|(_, c)| {
                matches!(
                    c.kind,
                    CoreKind::Geometry
                        | CoreKind::Texture
                        | CoreKind::RegionMap
                        | CoreKind::RenderTarget
                ) && !c.empty
            })
            .map(|(h, _)| h)
            .collect()
    }
}

fn forget_payload_gpu(payload: &mut CorePayload) {
    match payload {
        CorePayload::Geometry(g) => g.buffers = None,
        CorePayload::Texture(t) => {
            for layer in &mut t.layers {
                layer.gpu = None;
            }
        }
        CorePayload::RegionMap(r) => r.gpu = None,
        CorePayload::RenderTarget(rt) => rt.buffer = None,
        _ => {}
    }
}

fn release_gpu(payload: CorePayload, gpu: &mut dyn GpuContext) {
    match payload {
        CorePayload::Geometry(g) => {
            if let Some(buffers) = g.buffers {
                buffers.release(gpu);
            }
        }
        CorePayload::Texture(t) => {
            for texture in t.layers.iter().filter_map(|l| l.gpu) {
                gpu.delete_texture(texture);
            }
        }
        CorePayload::RegionMap(r) => {
            if let Some(texture) = r.gpu {
                gpu.delete_texture(texture);
            }
        }
        CorePayload::RenderTarget(rt) => {
            if let Some(buffer) = rt.buffer {
                gpu.delete_render_buffer(buffer);
            }
        }
        _ => {}
    }
}
