//! The Display
//!
//! Owns every display object along with the program and chunk factories
//! they draw from, and turns them into the draw and pick lists executed
//! each frame.
//!
//! Work is gated by a chain of dirty flags, each implying the ones after
//! it:
//!
//! ```text
//! OBJECT_LIST -> STATE_ORDER -> STATE_SORT -> DRAW_LIST -> IMAGE
//! ```
//!
//! Adding or removing objects marks the object list; a priority change only
//! needs the sort keys recomputed; an enable toggle only needs the draw list
//! rebuilt; a colour change only needs the image redrawn.

use bitflags::bitflags;
use glam::{Mat4, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::chunks::{ChunkEnv, ChunkFactory, ChunkHandle, ChunkKind, unbind_render_target};
use super::frame::{FrameContext, PickMode};
use super::object::{DisplayObject, ObjectHandle, ObjectKey, ObjectMeta, ObjectStates, SortKey};
use super::pick::{PickHit, PickOptions, RegionHit, TriangleHit, canvas_to_ndc, resolve_triangle};
use super::program::{ProgramFactory, ProgramHandle};
use super::program_source::{ProgramInputs, ProgramShape, ProgramSourceFactory};
use crate::errors::{PrismError, Result};
use crate::gpu::{
    Capability, ClearMask, CompareFunc, FrontFace, GpuContext, RenderBufferHandles, decode_index,
};
use crate::state::{CoreFactory, CoreHandle, CoreKind, LightsCore, TagSelector};

bitflags! {
    /// Pending display work, cheapest last.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisplayDirty: u8 {
        const OBJECT_LIST = 1 << 0;
        const STATE_ORDER = 1 << 1;
        const STATE_SORT = 1 << 2;
        const DRAW_LIST = 1 << 3;
        const IMAGE = 1 << 4;
    }
}

/// Counters of display work, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub object_builds: u64,
    pub object_removals: u64,
    pub sorts: u64,
    pub draw_list_builds: u64,
    pub frames: u64,
    pub picks: u64,
}

/// One entry of the draw list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStep {
    Chunk(ChunkHandle),
    /// Return to the default framebuffer after the render target bins.
    UnbindTarget,
}

/// Whether the pick buffer outlives a pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PickBufferPolicy {
    #[default]
    Keep,
    Release,
}

pub struct Display {
    objects: SlotMap<ObjectHandle, DisplayObject>,
    by_key: FxHashMap<ObjectKey, ObjectHandle>,
    programs: ProgramFactory,
    chunks: ChunkFactory,

    /// Objects in sort order.
    order: Vec<ObjectHandle>,
    draw_list: Vec<DrawStep>,
    /// Objects that made it into the draw list.
    drawn: Vec<ObjectHandle>,
    transparent_index: Option<usize>,
    pick_list: Vec<ChunkHandle>,
    pick_objects: Vec<ObjectHandle>,

    dirty: DisplayDirty,
    stats: DisplayStats,
    seq: u64,
    seen: FxHashSet<ObjectHandle>,
    tag_selector: Option<TagSelector>,
    ambient: Vec3,
    pick_buffer: Option<RenderBufferHandles>,
    pick_buffer_policy: PickBufferPolicy,
}

impl Default for Display {
    fn default() -> Self {
        Self::new(ProgramSourceFactory::default(), PickBufferPolicy::default())
    }
}

impl Display {
    #[must_use]
    pub fn new(sources: ProgramSourceFactory, pick_buffer_policy: PickBufferPolicy) -> Self {
        Self {
            objects: SlotMap::with_key(),
            by_key: FxHashMap::default(),
            programs: ProgramFactory::new(sources),
            chunks: ChunkFactory::new(),
            order: Vec::new(),
            draw_list: Vec::new(),
            drawn: Vec::new(),
            transparent_index: None,
            pick_list: Vec::new(),
            pick_objects: Vec::new(),
            dirty: DisplayDirty::all(),
            stats: DisplayStats::default(),
            seq: 0,
            seen: FxHashSet::default(),
            tag_selector: None,
            ambient: LightsCore::default().ambient(),
            pick_buffer: None,
            pick_buffer_policy,
        }
    }

    // ========================================================================
    // Object Building
    // ========================================================================

    /// Starts a compile; objects not rebuilt before [`end_compile`] are
    /// removed.
    ///
    /// [`end_compile`]: Self::end_compile
    pub fn begin_compile(&mut self) {
        self.seen.clear();
    }

    /// Removes objects whose leaves were not reached by the compile.
    pub fn end_compile(&mut self, gpu: &mut dyn GpuContext) {
        let stale: Vec<ObjectHandle> = self
            .objects
            .keys()
            .filter(|h| !self.seen.contains(h))
            .collect();
        for handle in stale {
            self.remove_handle(handle, gpu);
        }
        log::debug!(
            "Compile done: {} objects, {} programs, {} chunks",
            self.objects.len(),
            self.programs.len(),
            self.chunks.len()
        );
    }

    /// Builds, or refreshes, the object for one geometry leaf from the cores
    /// active there.
    ///
    /// An object whose states and program hash are unchanged is kept as is.
    /// A leaf whose geometry has not loaded yet gets no object.
    pub fn build_object(
        &mut self,
        key: ObjectKey,
        states: ObjectStates,
        meta: ObjectMeta,
        gpu: &mut dyn GpuContext,
        cores: &mut CoreFactory,
    ) -> Result<()> {
        self.seq += 1;
        let seq = self.seq;

        let geometry = states.core(CoreKind::Geometry);
        if !cores.get(geometry).is_some_and(|c| c.is_ready() && !c.empty) {
            return Ok(());
        }

        let canvas = gpu.drawing_buffer_size();
        for core in states.all_cores() {
            cores.ensure_gpu(core, gpu, canvas)?;
        }
        let targets: Vec<CoreHandle> = cores
            .payload(states.core(CoreKind::Texture))
            .and_then(|p| p.texture())
            .map(|t| t.layers.iter().filter_map(|l| l.target_core).collect())
            .unwrap_or_default();
        for target in targets {
            cores.ensure_gpu(target, gpu, canvas)?;
        }
        let cores: &CoreFactory = cores;

        let inputs = ProgramInputs {
            geometry,
            shaders: &states.shaders,
            clips: states.core(CoreKind::Clips),
            texture: states.core(CoreKind::Texture),
            lights: states.core(CoreKind::Lights),
            flags: states.core(CoreKind::Flags),
            region_map: states.core(CoreKind::RegionMap),
        };
        let hash = inputs.hash(cores);

        let existing = self.by_key.get(&key).copied();
        if let Some(handle) = existing
            && let Some(object) = self.objects.get_mut(handle)
            && object.states == states
            && object.program_hash == hash
        {
            object.seq = seq;
            object.meta = meta;
            self.seen.insert(handle);
            self.dirty |= DisplayDirty::OBJECT_LIST;
            return Ok(());
        }

        let program = self
            .programs
            .get_program(&hash, gpu, || ProgramShape::resolve(cores, &inputs))?;
        let program_id = self.programs.get(program).map_or(0, |p| p.id);

        let mut env = ChunkEnv {
            gpu,
            cores,
            programs: &self.programs,
        };
        let mut chunks = [None; ChunkKind::SLOTS];
        for kind in ChunkKind::SLOTTED {
            let handles = slot_cores(kind, &states, cores);
            if handles.is_empty() && kind != ChunkKind::Program {
                continue;
            }
            let state_ids: Vec<u64> = handles.iter().map(|h| cores.state_id(*h)).collect();
            let id = kind.chunk_id(program_id, &state_ids);
            chunks[kind.order()] =
                Some(self.chunks.get_chunk(id, kind, Some(program), handles, &mut env));
        }
        let target = states.core(CoreKind::RenderTarget);
        let render_target = (!is_empty_core(cores, target)).then(|| {
            let id = ChunkKind::RenderTarget.chunk_id(program_id, &[cores.state_id(target)]);
            let handles = SmallVec::from_slice(&[target]);
            self.chunks
                .get_chunk(id, ChunkKind::RenderTarget, None, handles, &mut env)
        });

        let object = DisplayObject {
            key,
            states,
            meta,
            program,
            program_hash: hash,
            chunks,
            render_target,
            sort_key: SortKey::default(),
            seq,
        };
        let handle = match existing.and_then(|h| self.objects.get_mut(h).map(|o| (h, o))) {
            Some((handle, slot)) => {
                let old = std::mem::replace(slot, object);
                self.release(&old, gpu);
                handle
            }
            None => {
                let handle = self.objects.insert(object);
                self.by_key.insert(key, handle);
                handle
            }
        };
        self.seen.insert(handle);
        self.stats.object_builds += 1;
        self.dirty |= DisplayDirty::OBJECT_LIST;
        log::debug!("Built display object for {key:?} with program #{program_id}");
        Ok(())
    }

    /// Removes the object for `key`, if any.
    pub fn remove_object(&mut self, key: ObjectKey, gpu: &mut dyn GpuContext) {
        if let Some(&handle) = self.by_key.get(&key) {
            self.remove_handle(handle, gpu);
        }
    }

    fn remove_handle(&mut self, handle: ObjectHandle, gpu: &mut dyn GpuContext) {
        let Some(object) = self.objects.remove(handle) else {
            return;
        };
        self.by_key.remove(&object.key);
        self.release(&object, gpu);
        self.stats.object_removals += 1;
        self.dirty |= DisplayDirty::OBJECT_LIST;
    }

    fn release(&mut self, object: &DisplayObject, gpu: &mut dyn GpuContext) {
        for chunk in object.chunk_handles().chain(object.render_target) {
            self.chunks.put_chunk(chunk);
        }
        self.programs.put_program(object.program, gpu);
    }

    /// Re-resolves the locations of one kind of chunk, after a core gained
    /// uniforms its chunks have not looked up.
    pub fn rebuild_chunks(
        &mut self,
        kind: ChunkKind,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
    ) {
        self.chunks.rebuild_kind(kind, gpu, cores, &self.programs);
        self.dirty |= DisplayDirty::IMAGE;
    }

    // ========================================================================
    // Dirty Flags
    // ========================================================================

    #[inline]
    pub fn mark(&mut self, dirty: DisplayDirty) {
        self.dirty |= dirty;
    }

    #[inline]
    #[must_use]
    pub fn dirty(&self) -> DisplayDirty {
        self.dirty
    }

    #[inline]
    #[must_use]
    pub fn needs_redraw(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Restricts drawing to objects whose tag matches; `None` draws all.
    pub fn select_tags(&mut self, pattern: Option<&str>) {
        self.tag_selector = pattern.map(TagSelector::new);
        self.dirty |= DisplayDirty::DRAW_LIST;
    }

    // ========================================================================
    // List Building
    // ========================================================================

    /// Brings the sorted order and the draw and pick lists up to date.
    pub fn update(&mut self, cores: &CoreFactory) {
        if self.dirty.contains(DisplayDirty::OBJECT_LIST) {
            self.order = self.objects.keys().collect();
            self.dirty |= DisplayDirty::STATE_ORDER;
        }
        if self.dirty.contains(DisplayDirty::STATE_ORDER) {
            for object in self.objects.values_mut() {
                object.sort_key = compute_sort_key(object, cores, &self.programs);
            }
            self.dirty |= DisplayDirty::STATE_SORT;
        }
        if self.dirty.contains(DisplayDirty::STATE_SORT) {
            let objects = &self.objects;
            self.order.sort_by_key(|h| objects.get(*h).map(|o| (o.sort_key, o.seq)));
            self.stats.sorts += 1;
            self.dirty |= DisplayDirty::DRAW_LIST;
        }
        if self.dirty.contains(DisplayDirty::DRAW_LIST) {
            self.build_draw_list(cores);
            self.stats.draw_list_builds += 1;
            self.dirty |= DisplayDirty::IMAGE;
        }
        self.dirty &= DisplayDirty::IMAGE;
    }

    fn build_draw_list(&mut self, cores: &CoreFactory) {
        self.draw_list.clear();
        self.drawn.clear();
        self.pick_list.clear();
        self.pick_objects.clear();
        self.transparent_index = None;

        let mut bins: Vec<(ChunkHandle, Vec<ObjectHandle>)> = Vec::new();
        let mut rest = Vec::new();
        for &handle in &self.order {
            let Some(object) = self.objects.get(handle) else {
                continue;
            };
            if !self.is_visible(object, cores) {
                continue;
            }
            match object.render_target {
                Some(target) => match bins.iter_mut().find(|(t, _)| *t == target) {
                    Some((_, members)) => members.push(handle),
                    None => bins.push((target, vec![handle])),
                },
                None => {
                    rest.push(handle);
                    if is_pickable(object, cores) {
                        self.pick_objects.push(handle);
                    }
                }
            }
        }

        let mut last = [None; ChunkKind::SLOTS];
        for (target, members) in &bins {
            self.draw_list.push(DrawStep::Chunk(*target));
            last = [None; ChunkKind::SLOTS];
            for &handle in members {
                self.append_object(handle, &mut last, cores);
            }
        }
        if !bins.is_empty() {
            self.draw_list.push(DrawStep::UnbindTarget);
            last = [None; ChunkKind::SLOTS];
        }
        for handle in rest {
            self.append_object(handle, &mut last, cores);
        }

        let mut last = [None; ChunkKind::SLOTS];
        for &handle in &self.pick_objects {
            let Some(object) = self.objects.get(handle) else {
                continue;
            };
            for kind in ChunkKind::SLOTTED.into_iter().filter(|k| k.picks()) {
                let slot = kind.order();
                let Some(chunk) = object.chunks[slot] else {
                    continue;
                };
                if kind.is_unique() || last[slot] != Some(chunk) {
                    self.pick_list.push(chunk);
                    last[slot] = Some(chunk);
                }
            }
        }
        log::debug!(
            "Draw list: {} steps for {} objects, {} pickable",
            self.draw_list.len(),
            self.drawn.len(),
            self.pick_objects.len()
        );
    }

    fn append_object(
        &mut self,
        handle: ObjectHandle,
        last: &mut [Option<ChunkHandle>; ChunkKind::SLOTS],
        cores: &CoreFactory,
    ) {
        let Some(object) = self.objects.get(handle) else {
            return;
        };
        let transparent = is_transparent(object, cores);
        let mut first = true;
        for kind in ChunkKind::SLOTTED {
            let slot = kind.order();
            let Some(chunk) = object.chunks[slot] else {
                continue;
            };
            if !kind.is_unique() && last[slot] == Some(chunk) {
                continue;
            }
            if first && transparent && self.transparent_index.is_none() {
                self.transparent_index = Some(self.draw_list.len());
            }
            first = false;
            self.draw_list.push(DrawStep::Chunk(chunk));
            last[slot] = Some(chunk);
        }
        self.drawn.push(handle);
    }

    fn is_visible(&self, object: &DisplayObject, cores: &CoreFactory) -> bool {
        let payload = |kind| cores.payload(object.states.core(kind));
        let enabled = payload(CoreKind::Enable)
            .and_then(|p| p.enable())
            .is_none_or(|e| e.enabled);
        let flags = payload(CoreKind::Flags)
            .and_then(|p| p.flags())
            .is_none_or(|f| f.flags.enabled);
        let layer = payload(CoreKind::Layer)
            .and_then(|p| p.layer())
            .is_none_or(|l| l.enabled);
        let tagged = match (&self.tag_selector, payload(CoreKind::Tag).and_then(|p| p.tag())) {
            (Some(selector), Some(tag)) if !tag.tag.is_empty() => selector.matches(&tag.tag),
            _ => true,
        };
        enabled && flags && layer && tagged
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    fn begin_frame(gpu: &mut dyn GpuContext, frame: &mut FrameContext, clear: [f32; 4]) {
        gpu.clear(clear, ClearMask::COLOR | ClearMask::DEPTH | ClearMask::STENCIL);
        gpu.set_front_face(FrontFace::Ccw);
        gpu.set_capability(Capability::CullFace, false);
        gpu.set_capability(Capability::Blend, false);
        gpu.set_capability(Capability::DepthTest, true);
        gpu.set_depth_func(CompareFunc::Less);
        gpu.set_depth_mask(true);
        gpu.set_capability(Capability::StencilTest, false);
        frame.backfaces = true;
        frame.front_face = FrontFace::Ccw;
        frame.blend_enabled = false;
        frame.depth_enabled = true;
        frame.depth_func = CompareFunc::Less;
        frame.stencil_enabled = false;
    }

    /// Draws the draw list. Returns the IDs of listener nodes reached.
    pub fn render(
        &mut self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        transparent_canvas: bool,
    ) -> Result<Vec<String>> {
        if gpu.is_context_lost() {
            return Err(PrismError::ContextLost);
        }
        self.update(cores);

        let (width, height) = gpu.drawing_buffer_size();
        let aspect = width as f32 / height.max(1) as f32;
        let mut frame = FrameContext::new(aspect, self.ambient, None);

        gpu.bind_render_buffer(None);
        gpu.set_viewport(width, height);
        let clear = if transparent_canvas {
            [0.0; 4]
        } else {
            self.ambient.extend(1.0).to_array()
        };
        Self::begin_frame(gpu, &mut frame, clear);

        let mut env = ChunkEnv {
            gpu,
            cores,
            programs: &self.programs,
        };
        for step in &self.draw_list {
            match step {
                DrawStep::Chunk(handle) => {
                    if let Some(chunk) = self.chunks.get(*handle) {
                        chunk.draw(&mut env, &mut frame)?;
                    }
                }
                DrawStep::UnbindTarget => unbind_render_target(&mut env, &mut frame)?,
            }
        }
        env.gpu.flush();
        env.gpu.bind_render_buffer(None);

        self.ambient = frame.ambient;
        self.dirty.remove(DisplayDirty::IMAGE);
        self.stats.frames += 1;
        Ok(frame.rendered_nodes)
    }

    // ========================================================================
    // Picking
    // ========================================================================

    /// Picks at canvas pixel `(x, y)`, top-left origin.
    pub fn pick(
        &mut self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        x: u32,
        y: u32,
        options: PickOptions,
    ) -> Result<Option<PickHit>> {
        if gpu.is_context_lost() {
            return Err(PrismError::ContextLost);
        }
        self.update(cores);
        self.stats.picks += 1;

        let size = gpu.drawing_buffer_size();
        let buffer = self.ensure_pick_buffer(gpu, size)?;
        gpu.bind_render_buffer(Some(buffer.framebuffer));
        gpu.set_viewport(buffer.width, buffer.height);
        let aspect = size.0 as f32 / size.1.max(1) as f32;

        let hit = self.pick_object(gpu, cores, x, y, aspect)?;
        let mut result = hit.map(|h| (h, None, None));

        if options.ray
            && let Some((handle, triangle, _)) = result.as_mut()
        {
            *triangle = self.pick_triangle(gpu, cores, *handle, x, y, size)?;
        }
        if options.regions {
            match result.as_mut() {
                Some((handle, _, region)) => {
                    *region = self.pick_region(gpu, cores, &[*handle], x, y, aspect)?.map(|(_, r)| r);
                }
                None => {
                    let all = self.pick_objects.clone();
                    result = self
                        .pick_region(gpu, cores, &all, x, y, aspect)?
                        .map(|(handle, region)| (handle, None, Some(region)));
                }
            }
        }

        gpu.bind_render_buffer(None);
        if self.pick_buffer_policy == PickBufferPolicy::Release
            && let Some(buffer) = self.pick_buffer.take()
        {
            gpu.delete_render_buffer(buffer);
        }

        Ok(result.and_then(|(handle, triangle, region)| {
            let object = self.objects.get(handle)?;
            Some(PickHit {
                name: object.meta.name().map(str::to_string),
                path: object.meta.path.clone(),
                node_id: object.meta.node_id.clone(),
                canvas_pos: (x, y),
                triangle,
                region,
            })
        }))
    }

    fn ensure_pick_buffer(
        &mut self,
        gpu: &mut dyn GpuContext,
        (width, height): (u32, u32),
    ) -> Result<RenderBufferHandles> {
        if let Some(buffer) = self.pick_buffer {
            if buffer.width == width && buffer.height == height {
                return Ok(buffer);
            }
            gpu.delete_render_buffer(buffer);
        }
        let buffer = gpu.create_render_buffer(width.max(1), height.max(1))?;
        self.pick_buffer = Some(buffer);
        Ok(buffer)
    }

    fn run_pick_pass(
        &self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        mode: PickMode,
        chunks: &[ChunkHandle],
        (x, y): (u32, u32),
        aspect: f32,
    ) -> Result<[u8; 4]> {
        let mut frame = FrameContext::new(aspect, self.ambient, Some(mode));
        Self::begin_frame(gpu, &mut frame, [0.0; 4]);
        let mut env = ChunkEnv {
            gpu,
            cores,
            programs: &self.programs,
        };
        for handle in chunks {
            if let Some(chunk) = self.chunks.get(*handle) {
                chunk.pick(&mut env, &mut frame)?;
            }
        }
        env.gpu.flush();
        Ok(env.gpu.read_pixel(x, y)?)
    }

    fn pick_object(
        &self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        x: u32,
        y: u32,
        aspect: f32,
    ) -> Result<Option<ObjectHandle>> {
        let pixel = self.run_pick_pass(gpu, cores, PickMode::Object, &self.pick_list, (x, y), aspect)?;
        let hit = decode_index(pixel)
            .and_then(|index| self.pick_objects.get(index as usize - 1))
            .copied();
        log::debug!("Object pick at ({x}, {y}): {pixel:?} -> {hit:?}");
        Ok(hit)
    }

    fn pick_triangle(
        &self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        handle: ObjectHandle,
        x: u32,
        y: u32,
        size: (u32, u32),
    ) -> Result<Option<TriangleHit>> {
        let Some(object) = self.objects.get(handle) else {
            return Ok(None);
        };
        let chunks: Vec<ChunkHandle> = object.chunk_handles().collect();
        let aspect = size.0 as f32 / size.1.max(1) as f32;
        let pixel = self.run_pick_pass(gpu, cores, PickMode::Triangle, &chunks, (x, y), aspect)?;
        let Some(primitive) = decode_index(pixel).map(|i| i - 1) else {
            return Ok(None);
        };

        let states = &object.states;
        let Some(geometry) = cores
            .payload(states.core(CoreKind::Geometry))
            .and_then(|p| p.geometry())
        else {
            return Ok(None);
        };
        let model = cores
            .transform(states.core(CoreKind::Transform))
            .map_or(Mat4::IDENTITY, |t| t.world_matrix);
        let view = cores
            .payload(states.core(CoreKind::ViewTransform))
            .and_then(|p| p.view())
            .map_or(Mat4::IDENTITY, |v| v.matrix);
        let projection = cores
            .payload(states.core(CoreKind::Projection))
            .and_then(|p| p.projection())
            .map_or(Mat4::IDENTITY, |p| p.optics.matrix(aspect));

        let ndc = canvas_to_ndc(x, y, size);
        Ok(resolve_triangle(&geometry.data, primitive, ndc, model, view, projection))
    }

    /// Renders region colours for `candidates` and matches the pixel against
    /// their region maps, first match wins.
    fn pick_region(
        &self,
        gpu: &mut dyn GpuContext,
        cores: &CoreFactory,
        candidates: &[ObjectHandle],
        x: u32,
        y: u32,
        aspect: f32,
    ) -> Result<Option<(ObjectHandle, RegionHit)>> {
        let mut chunks = Vec::new();
        let mut last = [None; ChunkKind::SLOTS];
        for object in candidates.iter().filter_map(|h| self.objects.get(*h)) {
            for (slot, chunk) in object.chunks.iter().enumerate() {
                let Some(chunk) = *chunk else {
                    continue;
                };
                if slot == ChunkKind::Draw.order() || last[slot] != Some(chunk) {
                    chunks.push(chunk);
                    last[slot] = Some(chunk);
                }
            }
        }
        let pixel = self.run_pick_pass(gpu, cores, PickMode::Region, &chunks, (x, y), aspect)?;

        for &handle in candidates {
            let Some(object) = self.objects.get(handle) else {
                continue;
            };
            let region = cores
                .payload(object.states.core(CoreKind::RegionMap))
                .and_then(|p| p.region_map())
                .and_then(|r| r.region_at(pixel));
            if let Some(region) = region {
                return Ok(Some((
                    handle,
                    RegionHit {
                        color: region.color,
                        data: region.data.clone(),
                    },
                )));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Context Loss
    // ========================================================================

    /// Forgets GPU handles invalidated by a context loss.
    pub fn forget_gpu(&mut self) {
        self.programs.forget_gpu();
        self.pick_buffer = None;
    }

    /// Recompiles programs and re-resolves chunk locations. Geometry and
    /// texture cores must already be re-uploaded.
    pub fn webgl_restored(&mut self, gpu: &mut dyn GpuContext, cores: &CoreFactory) -> Result<()> {
        self.programs.webgl_restored(gpu)?;
        self.chunks.webgl_restored(gpu, cores, &self.programs);
        self.dirty |= DisplayDirty::IMAGE;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    #[must_use]
    pub fn programs(&self) -> &ProgramFactory {
        &self.programs
    }

    #[must_use]
    pub fn chunks(&self) -> &ChunkFactory {
        &self.chunks
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn object(&self, key: ObjectKey) -> Option<&DisplayObject> {
        self.objects.get(*self.by_key.get(&key)?)
    }

    /// Objects in sort order, as of the last [`update`](Self::update).
    pub fn sorted_objects(&self) -> impl Iterator<Item = &DisplayObject> {
        self.order.iter().filter_map(|h| self.objects.get(*h))
    }

    /// Objects in the draw list, in draw order.
    pub fn drawn_objects(&self) -> impl Iterator<Item = &DisplayObject> {
        self.drawn.iter().filter_map(|h| self.objects.get(*h))
    }

    /// Objects taking part in object picks, in pick-index order.
    pub fn pickable_objects(&self) -> impl Iterator<Item = &DisplayObject> {
        self.pick_objects.iter().filter_map(|h| self.objects.get(*h))
    }

    #[must_use]
    pub fn draw_list(&self) -> &[DrawStep] {
        &self.draw_list
    }

    /// Draw-list index where the first transparent object starts.
    #[must_use]
    pub fn transparent_index(&self) -> Option<usize> {
        self.transparent_index
    }

    #[must_use]
    pub fn pick_buffer(&self) -> Option<RenderBufferHandles> {
        self.pick_buffer
    }

    /// Programs referenced by at least one object.
    #[must_use]
    pub fn program_handles(&self) -> Vec<ProgramHandle> {
        self.programs.iter().map(|(h, _)| h).collect()
    }
}

/// Cores feeding one chunk slot; empty for a no-op slot.
fn slot_cores(
    kind: ChunkKind,
    states: &ObjectStates,
    cores: &CoreFactory,
) -> SmallVec<[CoreHandle; 2]> {
    let stacked = |stack: &[CoreHandle]| {
        stack
            .iter()
            .copied()
            .filter(|h| !is_empty_core(cores, *h))
            .collect()
    };
    match kind {
        ChunkKind::Program => SmallVec::new(),
        ChunkKind::Shader => stacked(&states.shaders),
        ChunkKind::ShaderParams => stacked(&states.shader_params),
        other => match other.core_kind() {
            Some(core_kind) => {
                let core = states.core(core_kind);
                if is_empty_core(cores, core) {
                    SmallVec::new()
                } else {
                    SmallVec::from_slice(&[core])
                }
            }
            None => SmallVec::new(),
        },
    }
}

fn is_empty_core(cores: &CoreFactory, handle: CoreHandle) -> bool {
    cores.get(handle).is_none_or(|c| c.empty)
}

fn is_transparent(object: &DisplayObject, cores: &CoreFactory) -> bool {
    cores
        .payload(object.states.core(CoreKind::Flags))
        .and_then(|p| p.flags())
        .is_some_and(|f| f.flags.transparent)
}

fn is_pickable(object: &DisplayObject, cores: &CoreFactory) -> bool {
    let stage = cores
        .payload(object.states.core(CoreKind::Stage))
        .and_then(|p| p.stage())
        .is_none_or(|s| s.pickable);
    let flags = cores
        .payload(object.states.core(CoreKind::Flags))
        .and_then(|p| p.flags())
        .is_none_or(|f| f.flags.picking);
    stage && flags
}

fn compute_sort_key(object: &DisplayObject, cores: &CoreFactory, programs: &ProgramFactory) -> SortKey {
    let states = &object.states;
    let stage = cores
        .payload(states.core(CoreKind::Stage))
        .and_then(|p| p.stage())
        .map_or(0, |s| s.priority);
    let layer = cores
        .payload(states.core(CoreKind::Layer))
        .and_then(|p| p.layer())
        .map_or(0, |l| l.priority);
    let program = programs.get(object.program).map_or(0, |p| p.id);
    let texture = states.core(CoreKind::Texture);
    let texture_state = if is_empty_core(cores, texture) {
        0
    } else {
        cores.state_id(texture)
    };
    SortKey::new(stage, is_transparent(object, cores), layer, program, texture_state)
}
