//! Headless GPU Backend
//!
//! A [`GpuContext`] that keeps every resource on the CPU and records each
//! call as a [`GpuCommand`]. It is what the test suite renders against, and
//! is usable anywhere a real context is unavailable.
//!
//! Programs are "compiled" by scanning their sources for `uniform` and
//! `attribute` declarations, so location lookups behave like the real API:
//! a uniform the generated source does not declare has no location.
//!
//! Readback works by keeping, per framebuffer, a record of every triangle
//! draw since the last clear and hit-testing them at the requested pixel. The
//! colour of a read-back fragment is derived from the uniforms the pick and
//! draw templates declare:
//!
//! | Program state                  | Fragment colour                     |
//! |--------------------------------|-------------------------------------|
//! | `uPickMode == 0`               | `uPickColor`                        |
//! | `uPickMode == 1`               | primitive index + 1, RGB encoded    |
//! | `uPickMode == 2`               | region map texel at interpolated UV |
//! | no `uPickMode` uniform         | `uMaterialBaseColor`, `uMaterialAlpha` |

use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use super::{
    AttributeLocation, BufferData, Capability, ClearMask, CompareFunc, FrontFace, GpuBuffer,
    GpuContext, GpuError, GpuProgram, GpuRenderBuffer, GpuResult, GpuTexture, Primitive,
    RenderBufferHandles, StencilState, TextureImage, TextureSampling, UniformLocation,
    UniformValue, encode_index, names,
};

/// One recorded API call.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateProgram(GpuProgram),
    DeleteProgram(GpuProgram),
    UseProgram(GpuProgram),
    SetUniform { name: String, value: UniformValue },
    CreateBuffer(GpuBuffer),
    DeleteBuffer(GpuBuffer),
    BindAttribute { name: String, buffer: GpuBuffer },
    CreateTexture(GpuTexture),
    DeleteTexture(GpuTexture),
    BindTexture { unit: u32, texture: Option<GpuTexture> },
    CreateRenderBuffer(GpuRenderBuffer),
    DeleteRenderBuffer(GpuRenderBuffer),
    BindRenderBuffer(Option<GpuRenderBuffer>),
    Viewport(u32, u32),
    Clear(ClearMask),
    SetCapability { capability: Capability, enabled: bool },
    FrontFace(FrontFace),
    DepthFunc(CompareFunc),
    DepthMask(bool),
    ClearDepth(f32),
    ColorMask([bool; 4]),
    Stencil(StencilState),
    LineWidth(f32),
    DrawElements { primitive: Primitive, count: u32 },
    DrawArrays { primitive: Primitive, count: u32 },
    ReadPixel { x: u32, y: u32 },
    Flush,
    Finish,
}

struct ProgramRecord {
    vertex: String,
    fragment: String,
    uniforms: FxHashMap<String, u32>,
    attributes: FxHashMap<String, u32>,
}

enum BufferStore {
    Vertex(Vec<f32>),
    Index(Vec<u32>),
}

enum Shade {
    Solid([u8; 4]),
    PrimitiveIndex,
    Sampled(TextureImage),
}

struct DrawRecord {
    positions: Vec<Vec3>,
    uvs: Option<Vec<Vec2>>,
    triangles: Vec<[u32; 3]>,
    mvp: Mat4,
    shade: Shade,
    depth_test: bool,
    cull_back: bool,
    front_face: FrontFace,
}

#[derive(Default)]
struct Surface {
    clear_color: [u8; 4],
    draws: Vec<DrawRecord>,
}

/// CPU-only recording implementation of [`GpuContext`].
pub struct HeadlessGpu {
    width: u32,
    height: u32,
    lost: bool,
    allocation_limit: Option<usize>,

    programs: SlotMap<GpuProgram, ProgramRecord>,
    buffers: SlotMap<GpuBuffer, BufferStore>,
    textures: SlotMap<GpuTexture, TextureImage>,
    render_buffers: SlotMap<GpuRenderBuffer, RenderBufferHandles>,

    next_location: u32,
    uniform_names: FxHashMap<u32, String>,
    attribute_names: FxHashMap<u32, String>,
    uniform_values: FxHashMap<u32, UniformValue>,

    current_program: Option<GpuProgram>,
    attribute_bindings: FxHashMap<u32, GpuBuffer>,
    texture_units: FxHashMap<u32, GpuTexture>,
    bound_target: Option<GpuRenderBuffer>,
    surfaces: FxHashMap<Option<GpuRenderBuffer>, Surface>,
    capabilities: FxHashSet<Capability>,
    front_face: FrontFace,

    commands: Vec<GpuCommand>,
}

impl HeadlessGpu {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let mut capabilities = FxHashSet::default();
        capabilities.insert(Capability::DepthTest);
        Self {
            width,
            height,
            lost: false,
            allocation_limit: None,
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            render_buffers: SlotMap::with_key(),
            next_location: 0,
            uniform_names: FxHashMap::default(),
            attribute_names: FxHashMap::default(),
            uniform_values: FxHashMap::default(),
            current_program: None,
            attribute_bindings: FxHashMap::default(),
            texture_units: FxHashMap::default(),
            bound_target: None,
            surfaces: FxHashMap::default(),
            capabilities,
            front_face: FrontFace::Ccw,
            commands: Vec::new(),
        }
    }

    // ========================================================================
    // Context Loss Simulation
    // ========================================================================

    /// Simulates losing the context. Every live handle becomes invalid.
    pub fn lose_context(&mut self) {
        log::debug!("HeadlessGpu: context lost");
        self.lost = true;
    }

    /// Simulates the context coming back empty.
    ///
    /// All resources are dropped; handles created afterwards never compare
    /// equal to handles from before the loss.
    pub fn restore_context(&mut self) {
        log::debug!("HeadlessGpu: context restored");
        self.lost = false;
        self.programs.clear();
        self.buffers.clear();
        self.textures.clear();
        self.render_buffers.clear();
        self.uniform_names.clear();
        self.attribute_names.clear();
        self.uniform_values.clear();
        self.current_program = None;
        self.attribute_bindings.clear();
        self.texture_units.clear();
        self.bound_target = None;
        self.surfaces.clear();
    }

    /// Caps the number of live buffers, textures and render buffers.
    pub fn set_allocation_limit(&mut self, limit: Option<usize>) {
        self.allocation_limit = limit;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_live_program(&self, program: GpuProgram) -> bool {
        self.programs.contains_key(program)
    }

    #[must_use]
    pub fn is_live_render_buffer(&self, buffer: GpuRenderBuffer) -> bool {
        self.render_buffers.contains_key(buffer)
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Vertex and fragment source of a live program.
    #[must_use]
    pub fn program_source(&self, program: GpuProgram) -> Option<(&str, &str)> {
        self.programs
            .get(program)
            .map(|p| (p.vertex.as_str(), p.fragment.as_str()))
    }

    /// Last value assigned to a uniform of the given program.
    #[must_use]
    pub fn uniform_value(&self, program: GpuProgram, name: &str) -> Option<UniformValue> {
        let record = self.programs.get(program)?;
        let location = record.uniforms.get(name)?;
        self.uniform_values.get(location).copied()
    }

    fn check_allocation(&self, what: &str) -> GpuResult<()> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        if let Some(limit) = self.allocation_limit {
            let live = self.buffers.len() + self.textures.len() + self.render_buffers.len();
            if live >= limit {
                return Err(GpuError::OutOfMemory(format!(
                    "{what}: {live} allocations reached the limit of {limit}"
                )));
            }
        }
        Ok(())
    }

    fn current_uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniform_value(self.current_program?, name)
    }

    fn current_attribute(&self, name: &str) -> Option<&[f32]> {
        let record = self.programs.get(self.current_program?)?;
        let location = record.attributes.get(name)?;
        match self.buffers.get(*self.attribute_bindings.get(location)?)? {
            BufferStore::Vertex(data) => Some(data),
            BufferStore::Index(_) => None,
        }
    }

    fn current_mat4(&self, name: &str) -> Mat4 {
        match self.current_uniform(name) {
            Some(UniformValue::Mat4(m)) => m,
            _ => Mat4::IDENTITY,
        }
    }

    fn current_shade(&self) -> Shade {
        match self.current_uniform(names::PICK_MODE) {
            Some(UniformValue::Int(0)) => {
                let color = match self.current_uniform(names::PICK_COLOR) {
                    Some(UniformValue::Vec3(c)) => c,
                    _ => Vec3::ZERO,
                };
                Shade::Solid(to_rgba8(color.extend(1.0)))
            }
            Some(UniformValue::Int(1)) => Shade::PrimitiveIndex,
            Some(UniformValue::Int(_)) => {
                let texture = match self.current_uniform(names::REGION_MAP_SAMPLER) {
                    Some(UniformValue::Sampler(unit)) => self
                        .texture_units
                        .get(&unit)
                        .and_then(|t| self.textures.get(*t)),
                    _ => None,
                };
                texture.map_or(Shade::Solid([0; 4]), |t| Shade::Sampled(t.clone()))
            }
            _ => {
                let base = match self.current_uniform(names::MATERIAL_BASE_COLOR) {
                    Some(UniformValue::Vec3(c)) => c,
                    _ => Vec3::ONE,
                };
                let alpha = self
                    .current_uniform(names::MATERIAL_ALPHA)
                    .and_then(|v| v.as_float())
                    .unwrap_or(1.0);
                Shade::Solid(to_rgba8(base.extend(alpha)))
            }
        }
    }

    fn capture_draw(&mut self, primitive: Primitive, indices: Option<Vec<u32>>, count: u32) {
        let Some(raw) = self.current_attribute(names::POSITION) else {
            return;
        };
        let positions: Vec<Vec3> = raw.chunks_exact(3).map(Vec3::from_slice).collect();
        let uvs = self
            .current_attribute(names::UV)
            .map(|raw| raw.chunks_exact(2).map(Vec2::from_slice).collect());
        let order: Vec<u32> = indices.unwrap_or_else(|| (0..count).collect());
        let order = &order[..(count as usize).min(order.len())];
        let triangles = assemble_triangles(primitive, order);
        if triangles.is_empty() {
            return;
        }
        let mvp = self.current_mat4(names::PROJ_MATRIX)
            * self.current_mat4(names::VIEW_MATRIX)
            * self.current_mat4(names::MODEL_MATRIX);
        let record = DrawRecord {
            positions,
            uvs,
            triangles,
            mvp,
            shade: self.current_shade(),
            depth_test: self.capabilities.contains(&Capability::DepthTest),
            cull_back: self.capabilities.contains(&Capability::CullFace),
            front_face: self.front_face,
        };
        self.surfaces
            .entry(self.bound_target)
            .or_default()
            .draws
            .push(record);
    }

    fn read_fragment(&self, x: u32, y: u32) -> [u8; 4] {
        let Some(surface) = self.surfaces.get(&self.bound_target) else {
            return [0; 4];
        };
        let (w, h) = self.target_size();
        let p = Vec2::new(
            (x as f32 + 0.5) / w as f32 * 2.0 - 1.0,
            1.0 - (y as f32 + 0.5) / h as f32 * 2.0,
        );
        let mut best: Option<(f32, [u8; 4])> = None;
        for draw in &surface.draws {
            for (index, tri) in draw.triangles.iter().enumerate() {
                let Some(hit) = hit_triangle(draw, *tri, p) else {
                    continue;
                };
                let color = match &draw.shade {
                    Shade::Solid(c) => *c,
                    Shade::PrimitiveIndex => {
                        let rgb = encode_index(index as u32 + 1);
                        [rgb[0], rgb[1], rgb[2], 255]
                    }
                    Shade::Sampled(image) => {
                        let uv = draw.uvs.as_ref().map_or(Vec2::ZERO, |uvs| {
                            let at = |i: u32| uvs.get(i as usize).copied().unwrap_or(Vec2::ZERO);
                            at(tri[0]) * hit.bary.x + at(tri[1]) * hit.bary.y + at(tri[2]) * hit.bary.z
                        });
                        image.sample(uv)
                    }
                };
                let closer = best.is_none_or(|(depth, _)| hit.depth < depth);
                if !draw.depth_test || closer {
                    best = Some((hit.depth, color));
                }
            }
        }
        best.map_or(surface.clear_color, |(_, c)| c)
    }

    fn target_size(&self) -> (u32, u32) {
        self.bound_target
            .and_then(|t| self.render_buffers.get(t))
            .map_or((self.width, self.height), |rb| (rb.width, rb.height))
    }
}

struct FragmentHit {
    depth: f32,
    bary: Vec3,
}

fn hit_triangle(draw: &DrawRecord, tri: [u32; 3], p: Vec2) -> Option<FragmentHit> {
    let mut ndc = [Vec3::ZERO; 3];
    for (slot, index) in ndc.iter_mut().zip(tri) {
        let v = draw.positions.get(index as usize)?;
        let clip = draw.mvp * Vec4::new(v.x, v.y, v.z, 1.0);
        if clip.w <= 1e-6 {
            return None;
        }
        *slot = clip.truncate() / clip.w;
    }
    let [a, b, c] = ndc;
    let area = edge(a.truncate(), b.truncate(), c.truncate());
    if area.abs() < 1e-9 {
        return None;
    }
    if draw.cull_back {
        let front = match draw.front_face {
            FrontFace::Ccw => area > 0.0,
            FrontFace::Cw => area < 0.0,
        };
        if !front {
            return None;
        }
    }
    let w0 = edge(b.truncate(), c.truncate(), p) / area;
    let w1 = edge(c.truncate(), a.truncate(), p) / area;
    let w2 = 1.0 - w0 - w1;
    const EPS: f32 = -1e-6;
    if w0 < EPS || w1 < EPS || w2 < EPS {
        return None;
    }
    let depth = a.z * w0 + b.z * w1 + c.z * w2;
    if !(-1.0..=1.0).contains(&depth) {
        return None;
    }
    Some(FragmentHit {
        depth,
        bary: Vec3::new(w0, w1, w2),
    })
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn assemble_triangles(primitive: Primitive, order: &[u32]) -> Vec<[u32; 3]> {
    match primitive {
        Primitive::Triangles => order
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect(),
        Primitive::TriangleStrip => order
            .windows(3)
            .enumerate()
            .map(|(i, t)| {
                if i % 2 == 0 {
                    [t[0], t[1], t[2]]
                } else {
                    [t[1], t[0], t[2]]
                }
            })
            .collect(),
        Primitive::TriangleFan => match order.split_first() {
            Some((&hub, rest)) => rest.windows(2).map(|t| [hub, t[0], t[1]]).collect(),
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn to_rgba8(c: Vec4) -> [u8; 4] {
    let c = c.clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
    [
        c.x.round() as u8,
        c.y.round() as u8,
        c.z.round() as u8,
        c.w.round() as u8,
    ]
}

/// Collects declared names per qualifier, e.g. every `uniform` name.
fn declared_names(source: &str, qualifiers: &[&str]) -> Vec<String> {
    source
        .split([';', '\n'])
        .filter_map(|statement| {
            let mut tokens = statement.split_whitespace();
            let first = tokens.next()?;
            if !qualifiers.contains(&first) {
                return None;
            }
            let last = tokens.next_back()?;
            let name = last.split('[').next().unwrap_or(last);
            Some(name.to_string())
        })
        .collect()
}

impl GpuContext for HeadlessGpu {
    fn is_context_lost(&self) -> bool {
        self.lost
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> GpuResult<GpuProgram> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        for (stage, source) in [("vertex", vertex), ("fragment", fragment)] {
            if let Some(line) = source.lines().find(|l| l.trim_start().starts_with("#error")) {
                return Err(GpuError::Compile {
                    stage,
                    log: line.trim().to_string(),
                });
            }
            if !source.contains("void main") {
                return Err(GpuError::Link(format!("{stage} stage has no main()")));
            }
        }

        let mut uniforms = FxHashMap::default();
        for name in declared_names(vertex, &["uniform"])
            .into_iter()
            .chain(declared_names(fragment, &["uniform"]))
        {
            if !uniforms.contains_key(&name) {
                let location = self.next_location;
                self.next_location += 1;
                self.uniform_names.insert(location, name.clone());
                uniforms.insert(name, location);
            }
        }
        let mut attributes = FxHashMap::default();
        for name in declared_names(vertex, &["attribute"]) {
            let location = self.next_location;
            self.next_location += 1;
            self.attribute_names.insert(location, name.clone());
            attributes.insert(name, location);
        }

        let program = self.programs.insert(ProgramRecord {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
            uniforms,
            attributes,
        });
        self.commands.push(GpuCommand::CreateProgram(program));
        Ok(program)
    }

    fn delete_program(&mut self, program: GpuProgram) {
        if self.programs.remove(program).is_some() {
            self.commands.push(GpuCommand::DeleteProgram(program));
            if self.current_program == Some(program) {
                self.current_program = None;
            }
        }
    }

    fn uniform_location(&mut self, program: GpuProgram, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(program)?
            .uniforms
            .get(name)
            .map(|l| UniformLocation(*l))
    }

    fn attribute_location(
        &mut self,
        program: GpuProgram,
        name: &str,
    ) -> Option<AttributeLocation> {
        self.programs
            .get(program)?
            .attributes
            .get(name)
            .map(|l| AttributeLocation(*l))
    }

    fn use_program(&mut self, program: GpuProgram) -> GpuResult<()> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        if !self.programs.contains_key(program) {
            return Err(GpuError::InvalidHandle(format!("{program:?}")));
        }
        self.current_program = Some(program);
        self.commands.push(GpuCommand::UseProgram(program));
        Ok(())
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if self.lost {
            return;
        }
        self.uniform_values.insert(location.0, value);
        let name = self
            .uniform_names
            .get(&location.0)
            .cloned()
            .unwrap_or_default();
        self.commands.push(GpuCommand::SetUniform { name, value });
    }

    fn create_buffer(&mut self, data: BufferData<'_>) -> GpuResult<GpuBuffer> {
        self.check_allocation("buffer")?;
        let store = match data {
            BufferData::Vertex(v) => BufferStore::Vertex(v.to_vec()),
            BufferData::Index(i) => BufferStore::Index(i.to_vec()),
        };
        let buffer = self.buffers.insert(store);
        self.commands.push(GpuCommand::CreateBuffer(buffer));
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: GpuBuffer) {
        if self.buffers.remove(buffer).is_some() {
            self.commands.push(GpuCommand::DeleteBuffer(buffer));
        }
    }

    fn bind_attribute(&mut self, location: AttributeLocation, buffer: GpuBuffer, _components: u8) {
        if self.lost {
            return;
        }
        self.attribute_bindings.insert(location.0, buffer);
        let name = self
            .attribute_names
            .get(&location.0)
            .cloned()
            .unwrap_or_default();
        self.commands.push(GpuCommand::BindAttribute { name, buffer });
    }

    fn create_texture(
        &mut self,
        image: &TextureImage,
        _sampling: TextureSampling,
    ) -> GpuResult<GpuTexture> {
        self.check_allocation("texture")?;
        let texture = self.textures.insert(image.clone());
        self.commands.push(GpuCommand::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: GpuTexture) {
        if self.textures.remove(texture).is_some() {
            self.commands.push(GpuCommand::DeleteTexture(texture));
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<GpuTexture>) {
        if self.lost {
            return;
        }
        match texture {
            Some(t) => self.texture_units.insert(unit, t),
            None => self.texture_units.remove(&unit),
        };
        self.commands.push(GpuCommand::BindTexture { unit, texture });
    }

    fn create_render_buffer(&mut self, width: u32, height: u32) -> GpuResult<RenderBufferHandles> {
        self.check_allocation("render buffer")?;
        let texture = self
            .textures
            .insert(TextureImage::solid(width, height, [0; 4]));
        let framebuffer = self.render_buffers.insert(RenderBufferHandles {
            framebuffer: GpuRenderBuffer::default(),
            texture,
            width,
            height,
        });
        let handles = RenderBufferHandles {
            framebuffer,
            texture,
            width,
            height,
        };
        self.render_buffers[framebuffer] = handles;
        self.commands.push(GpuCommand::CreateRenderBuffer(framebuffer));
        Ok(handles)
    }

    fn delete_render_buffer(&mut self, buffer: RenderBufferHandles) {
        if self.render_buffers.remove(buffer.framebuffer).is_some() {
            self.textures.remove(buffer.texture);
            self.surfaces.remove(&Some(buffer.framebuffer));
            if self.bound_target == Some(buffer.framebuffer) {
                self.bound_target = None;
            }
            self.commands
                .push(GpuCommand::DeleteRenderBuffer(buffer.framebuffer));
        }
    }

    fn bind_render_buffer(&mut self, buffer: Option<GpuRenderBuffer>) {
        if self.lost {
            return;
        }
        self.bound_target = buffer.filter(|b| self.render_buffers.contains_key(*b));
        self.commands.push(GpuCommand::BindRenderBuffer(buffer));
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.commands.push(GpuCommand::Viewport(width, height));
    }

    fn clear(&mut self, color: [f32; 4], mask: ClearMask) {
        if self.lost {
            return;
        }
        let surface = self.surfaces.entry(self.bound_target).or_default();
        if mask.contains(ClearMask::COLOR) {
            surface.clear_color = to_rgba8(Vec4::from_array(color));
            surface.draws.clear();
        }
        self.commands.push(GpuCommand::Clear(mask));
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.capabilities.insert(capability);
        } else {
            self.capabilities.remove(&capability);
        }
        self.commands.push(GpuCommand::SetCapability {
            capability,
            enabled,
        });
    }

    fn set_front_face(&mut self, face: FrontFace) {
        self.front_face = face;
        self.commands.push(GpuCommand::FrontFace(face));
    }

    fn set_depth_func(&mut self, func: CompareFunc) {
        self.commands.push(GpuCommand::DepthFunc(func));
    }

    fn set_depth_mask(&mut self, enabled: bool) {
        self.commands.push(GpuCommand::DepthMask(enabled));
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.commands.push(GpuCommand::ClearDepth(depth));
    }

    fn set_color_mask(&mut self, mask: [bool; 4]) {
        self.commands.push(GpuCommand::ColorMask(mask));
    }

    fn set_stencil(&mut self, state: StencilState) {
        self.commands.push(GpuCommand::Stencil(state));
    }

    fn set_line_width(&mut self, width: f32) {
        self.commands.push(GpuCommand::LineWidth(width));
    }

    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: GpuBuffer,
        count: u32,
    ) -> GpuResult<()> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        let order = match self.buffers.get(indices) {
            Some(BufferStore::Index(data)) => data.clone(),
            _ => return Err(GpuError::InvalidHandle(format!("{indices:?}"))),
        };
        self.commands
            .push(GpuCommand::DrawElements { primitive, count });
        self.capture_draw(primitive, Some(order), count);
        Ok(())
    }

    fn draw_arrays(&mut self, primitive: Primitive, count: u32) -> GpuResult<()> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        self.commands.push(GpuCommand::DrawArrays { primitive, count });
        self.capture_draw(primitive, None, count);
        Ok(())
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> GpuResult<[u8; 4]> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        self.commands.push(GpuCommand::ReadPixel { x, y });
        Ok(self.read_fragment(x, y))
    }

    fn flush(&mut self) {
        self.commands.push(GpuCommand::Flush);
    }

    fn finish(&mut self) {
        self.commands.push(GpuCommand::Finish);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "attribute vec3 aPosition;\nuniform mat4 uModelMatrix;\nuniform mat4 uViewMatrix;\nuniform mat4 uProjMatrix;\nvoid main(void) {}";
    const FS: &str = "uniform int uPickMode;\nuniform vec3 uPickColor;\nvoid main(void) {}";

    fn quad(gpu: &mut HeadlessGpu) -> (GpuBuffer, GpuBuffer) {
        let positions = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0];
        let vertices = gpu.create_buffer(BufferData::Vertex(&positions)).unwrap();
        let indices = gpu
            .create_buffer(BufferData::Index(&[0, 1, 2, 0, 2, 3]))
            .unwrap();
        (vertices, indices)
    }

    #[test]
    fn undeclared_uniforms_have_no_location() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let program = gpu.create_program(VS, FS).unwrap();
        assert!(gpu.uniform_location(program, "uModelMatrix").is_some());
        assert!(gpu.uniform_location(program, "uMaterialAlpha").is_none());
        assert!(gpu.attribute_location(program, "aPosition").is_some());
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let err = gpu
            .create_program(VS, "#error broken\nvoid main(void) {}")
            .unwrap_err();
        assert!(matches!(err, GpuError::Compile { stage: "fragment", .. }));
    }

    #[test]
    fn pick_colour_is_read_back_where_triangles_cover() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let program = gpu.create_program(VS, FS).unwrap();
        let (vertices, indices) = quad(&mut gpu);
        gpu.use_program(program).unwrap();
        let pos = gpu.attribute_location(program, "aPosition").unwrap();
        gpu.bind_attribute(pos, vertices, 3);
        let mode = gpu.uniform_location(program, "uPickMode").unwrap();
        gpu.set_uniform(mode, UniformValue::Int(0));
        let color = gpu.uniform_location(program, "uPickColor").unwrap();
        gpu.set_uniform(color, UniformValue::Vec3(Vec3::new(1.0, 0.0, 0.0)));
        gpu.clear([0.0; 4], ClearMask::COLOR | ClearMask::DEPTH);
        gpu.draw_elements(Primitive::Triangles, indices, 6).unwrap();
        assert_eq!(gpu.read_pixel(1, 1).unwrap(), [255, 0, 0, 255]);

        gpu.set_uniform(mode, UniformValue::Int(1));
        gpu.clear([0.0; 4], ClearMask::COLOR);
        gpu.draw_elements(Primitive::Triangles, indices, 6).unwrap();
        // Upper-left pixel lies in the second triangle (0, 2, 3).
        assert_eq!(gpu.read_pixel(0, 0).unwrap(), [2, 0, 0, 255]);
    }

    #[test]
    fn restore_invalidates_old_handles() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let before = gpu.create_program(VS, FS).unwrap();
        gpu.lose_context();
        assert_eq!(gpu.create_program(VS, FS), Err(GpuError::ContextLost));
        gpu.restore_context();
        let after = gpu.create_program(VS, FS).unwrap();
        assert_ne!(before, after);
        assert!(!gpu.is_live_program(before));
    }

    #[test]
    fn allocation_limit_reports_out_of_memory() {
        let mut gpu = HeadlessGpu::new(4, 4);
        gpu.set_allocation_limit(Some(1));
        gpu.create_buffer(BufferData::Vertex(&[0.0])).unwrap();
        let err = gpu.create_buffer(BufferData::Vertex(&[0.0])).unwrap_err();
        assert!(matches!(err, GpuError::OutOfMemory(_)));
    }
}
