//! Compiled programs, shared by hash.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use super::program_source::{ProgramShape, ProgramSource, ProgramSourceFactory};
use crate::errors::{PrismError, Result};
use crate::gpu::{GpuContext, GpuError, GpuProgram};

new_key_type! {
    /// Handle to a [`Program`] in the [`ProgramFactory`].
    pub struct ProgramHandle;
}

/// A draw and a pick program compiled from one [`ProgramSource`].
#[derive(Debug)]
pub struct Program {
    /// Small sequential ID used in sort keys and chunk IDs.
    pub id: u32,
    pub hash: String,
    pub source: Arc<ProgramSource>,
    pub draw: Option<GpuProgram>,
    pub pick: Option<GpuProgram>,
    pub use_count: u32,
}

impl Program {
    #[inline]
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.draw.is_some() && self.pick.is_some()
    }
}

/// Owns every live program.
#[derive(Default)]
pub struct ProgramFactory {
    programs: SlotMap<ProgramHandle, Program>,
    by_hash: FxHashMap<String, ProgramHandle>,
    sources: ProgramSourceFactory,
    next_id: u32,
}

impl ProgramFactory {
    #[must_use]
    pub fn new(sources: ProgramSourceFactory) -> Self {
        Self {
            programs: SlotMap::with_key(),
            by_hash: FxHashMap::default(),
            sources,
            next_id: 0,
        }
    }

    /// Returns the program for `hash` with its use count bumped, compiling
    /// it on a miss.
    pub fn get_program(
        &mut self,
        hash: &str,
        gpu: &mut dyn GpuContext,
        resolve: impl FnOnce() -> Result<ProgramShape>,
    ) -> Result<ProgramHandle> {
        if let Some(&handle) = self.by_hash.get(hash)
            && let Some(program) = self.programs.get_mut(handle)
        {
            program.use_count += 1;
            return Ok(handle);
        }

        let source = self.sources.get_source(hash, resolve)?;
        let compiled = compile(gpu, &source);
        let (draw, pick) = match compiled {
            Ok(pair) => pair,
            Err(e) => {
                self.sources.put_source(hash);
                return Err(e);
            }
        };
        let id = self.next_id;
        self.next_id += 1;
        log::info!("Compiled program #{id} for '{hash}'");
        let handle = self.programs.insert(Program {
            id,
            hash: hash.to_string(),
            source,
            draw: Some(draw),
            pick: Some(pick),
            use_count: 1,
        });
        self.by_hash.insert(hash.to_string(), handle);
        Ok(handle)
    }

    /// Drops one use. At zero the GPU programs are deleted and the source
    /// released.
    pub fn put_program(&mut self, handle: ProgramHandle, gpu: &mut dyn GpuContext) {
        let Some(program) = self.programs.get_mut(handle) else {
            return;
        };
        program.use_count = program.use_count.saturating_sub(1);
        if program.use_count > 0 {
            return;
        }
        let Some(program) = self.programs.remove(handle) else {
            return;
        };
        for gpu_program in [program.draw, program.pick].into_iter().flatten() {
            gpu.delete_program(gpu_program);
        }
        self.by_hash.remove(&program.hash);
        self.sources.put_source(&program.hash);
        log::debug!("Destroyed program #{}", program.id);
    }

    /// Recompiles every live program after a context loss. Hashes, IDs and
    /// sources are kept; only the GPU objects are new.
    pub fn webgl_restored(&mut self, gpu: &mut dyn GpuContext) -> Result<()> {
        for program in self.programs.values_mut() {
            let (draw, pick) = compile(gpu, &program.source)?;
            program.draw = Some(draw);
            program.pick = Some(pick);
        }
        log::info!("Rebuilt {} programs", self.programs.len());
        Ok(())
    }

    /// Forgets GPU handles invalidated by a context loss.
    pub fn forget_gpu(&mut self) {
        for program in self.programs.values_mut() {
            program.draw = None;
            program.pick = None;
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: ProgramHandle) -> Option<&Program> {
        self.programs.get(handle)
    }

    #[must_use]
    pub fn by_hash(&self, hash: &str) -> Option<ProgramHandle> {
        self.by_hash.get(hash).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProgramHandle, &Program)> {
        self.programs.iter()
    }
}

fn compile(gpu: &mut dyn GpuContext, source: &ProgramSource) -> Result<(GpuProgram, GpuProgram)> {
    let draw = gpu
        .create_program(&source.draw_vertex, &source.draw_fragment)
        .map_err(|e| program_error(e, &source.hash, "draw"))?;
    let pick = match gpu.create_program(&source.pick_vertex, &source.pick_fragment) {
        Ok(pick) => pick,
        Err(e) => {
            gpu.delete_program(draw);
            return Err(program_error(e, &source.hash, "pick"));
        }
    };
    Ok((draw, pick))
}

fn program_error(e: GpuError, hash: &str, variant: &str) -> PrismError {
    match e {
        GpuError::Compile { stage, log } => {
            PrismError::ShaderCompilation(format!("{variant} {stage} stage of '{hash}': {log}"))
        }
        GpuError::Link(log) => PrismError::ShaderLink(format!("{variant} program '{hash}': {log}")),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::program_source::StageHooks;
    use crate::gpu::HeadlessGpu;

    fn shape() -> Result<ProgramShape> {
        Ok(ProgramShape {
            primitive: "triangles",
            normals: false,
            uv: false,
            uv2: false,
            colors: false,
            clips: 0,
            lights: Vec::new(),
            layers: Vec::new(),
            region_map: false,
            vertex: StageHooks::default(),
            fragment: StageHooks::default(),
        })
    }

    #[test]
    fn programs_are_shared_and_released_by_use_count() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let mut factory = ProgramFactory::default();
        let a = factory.get_program("h", &mut gpu, shape).unwrap();
        let b = factory.get_program("h", &mut gpu, shape).unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.program_count(), 2);

        factory.put_program(a, &mut gpu);
        assert_eq!(factory.len(), 1);
        factory.put_program(b, &mut gpu);
        assert!(factory.is_empty());
        assert_eq!(gpu.program_count(), 0);
    }

    #[test]
    fn restore_recompiles_with_new_handles() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let mut factory = ProgramFactory::default();
        let handle = factory.get_program("h", &mut gpu, shape).unwrap();
        let before = factory.get(handle).and_then(|p| p.draw).unwrap();

        gpu.lose_context();
        factory.forget_gpu();
        gpu.restore_context();
        factory.webgl_restored(&mut gpu).unwrap();

        let program = factory.get(handle).unwrap();
        assert_eq!(program.hash, "h");
        assert!(program.is_compiled());
        assert!(gpu.is_live_program(program.draw.unwrap()));
        assert_ne!(program.draw, Some(before));
    }

    #[test]
    fn compile_failures_are_shader_errors() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let mut factory = ProgramFactory::default();
        let broken = || {
            let mut s = shape()?;
            s.fragment = StageHooks {
                code: "#error broken\nvoid main(void) {}".into(),
                hooks: Default::default(),
                custom: true,
            };
            Ok(s)
        };
        let err = factory.get_program("bad", &mut gpu, broken).unwrap_err();
        assert!(matches!(err, PrismError::ShaderCompilation(_)));
        assert!(factory.is_empty());
    }
}
