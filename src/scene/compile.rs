//! Per-traversal compile state.
//!
//! One [`CompileContext`] lives for one compile of the scene. It holds a
//! stack of active cores per category; nodes push on entry and pop on exit,
//! and geometry leaves read the top of every stack. An empty stack reads as
//! the category's default core.

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use super::NodeHandle;
use crate::display::ObjectStates;
use crate::errors::{PrismError, Result};
use crate::state::{CoreFactory, CoreHandle, CoreKind};

pub struct CompileContext {
    stacks: [Vec<CoreHandle>; CoreKind::COUNT],
    defaults: [CoreHandle; CoreKind::COUNT],
    names: Vec<String>,
    /// Instance nodes entered, outermost first.
    instances: SmallVec<[NodeHandle; 4]>,
    /// Hash of the instance path; 0 outside any instance.
    placement: u64,
}

impl CompileContext {
    #[must_use]
    pub fn new(cores: &CoreFactory) -> Self {
        Self {
            stacks: std::array::from_fn(|_| Vec::new()),
            defaults: CoreKind::ALL.map(|kind| cores.default_core(kind)),
            names: Vec::new(),
            instances: SmallVec::new(),
            placement: 0,
        }
    }

    /// Back to the state at the start of a compile.
    pub fn reset(&mut self) {
        for stack in &mut self.stacks {
            stack.clear();
        }
        self.names.clear();
        self.instances.clear();
        self.placement = 0;
    }

    // ========================================================================
    // Stacks
    // ========================================================================

    pub fn push(&mut self, kind: CoreKind, core: CoreHandle) {
        self.stacks[kind.index()].push(core);
    }

    /// Restores the previously active core.
    ///
    /// Popping an empty stack means pushes and pops did not nest.
    pub fn pop(&mut self, kind: CoreKind) -> Result<CoreHandle> {
        self.stacks[kind.index()]
            .pop()
            .ok_or(PrismError::StackUnderflow(kind.as_str()))
    }

    #[must_use]
    pub fn top(&self, kind: CoreKind) -> CoreHandle {
        self.stacks[kind.index()]
            .last()
            .copied()
            .unwrap_or(self.defaults[kind.index()])
    }

    #[must_use]
    pub fn depth(&self, kind: CoreKind) -> usize {
        self.stacks[kind.index()].len()
    }

    #[must_use]
    pub fn stack(&self, kind: CoreKind) -> &[CoreHandle] {
        &self.stacks[kind.index()]
    }

    /// The cores a geometry leaf here would render with.
    #[must_use]
    pub fn states(&self) -> ObjectStates {
        let mut states = ObjectStates::new(CoreKind::ALL.map(|kind| self.top(kind)));
        states.shaders = SmallVec::from_slice(self.stack(CoreKind::Shader));
        states.shader_params = SmallVec::from_slice(self.stack(CoreKind::ShaderParams));
        states
    }

    /// Whether every push has been popped.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.stacks.iter().all(Vec::is_empty) && self.names.is_empty() && self.instances.is_empty()
    }

    // ========================================================================
    // Names
    // ========================================================================

    pub fn push_name(&mut self, name: String) {
        self.names.push(name);
    }

    pub fn pop_name(&mut self) {
        self.names.pop();
    }

    /// Names from the root down.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.names
    }

    // ========================================================================
    // Instancing
    // ========================================================================

    /// Enters an `instance` node. Returns the placement to restore on exit.
    ///
    /// Entering an instance node already on the path means its target
    /// contains it: a cycle.
    pub fn enter_instance(&mut self, instance: NodeHandle, id: &str) -> Result<u64> {
        if self.instances.contains(&instance) {
            return Err(PrismError::IllegalNodeConfig(format!(
                "instance '{id}' targets a subtree containing itself"
            )));
        }
        let previous = self.placement;
        let key = slotmap::Key::data(&instance).as_ffi();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&previous.to_le_bytes());
        bytes[8..].copy_from_slice(&key.to_le_bytes());
        self.placement = xxh3_64(&bytes).max(1);
        self.instances.push(instance);
        Ok(previous)
    }

    pub fn exit_instance(&mut self, previous: u64) {
        self.instances.pop();
        self.placement = previous;
    }

    #[inline]
    #[must_use]
    pub fn placement(&self) -> u64 {
        self.placement
    }

    /// Whether the traversal is inside an instance placement.
    #[inline]
    #[must_use]
    pub fn instancing(&self) -> bool {
        !self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CorePayload, MaterialCore};
    use slotmap::SlotMap;

    #[test]
    fn pops_restore_and_underflow_fails() {
        let mut cores = CoreFactory::new();
        let red = cores
            .get_core(CoreKind::Material, None, || Ok(CorePayload::Material(MaterialCore::default())))
            .unwrap();
        let mut ctx = CompileContext::new(&cores);
        let default = cores.default_core(CoreKind::Material);

        assert_eq!(ctx.top(CoreKind::Material), default);
        ctx.push(CoreKind::Material, red);
        assert_eq!(ctx.top(CoreKind::Material), red);
        assert_eq!(ctx.pop(CoreKind::Material).unwrap(), red);
        assert_eq!(ctx.top(CoreKind::Material), default);

        let err = ctx.pop(CoreKind::Material).unwrap_err();
        assert!(matches!(err, PrismError::StackUnderflow("material")));
        assert!(ctx.is_balanced());
    }

    #[test]
    fn placements_differ_per_path_and_cycles_fail() {
        let cores = CoreFactory::new();
        let mut nodes: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let mut ctx = CompileContext::new(&cores);

        let outer = ctx.enter_instance(a, "a").unwrap();
        let via_a = ctx.placement();
        assert_ne!(via_a, 0);
        assert!(ctx.instancing());
        let inner = ctx.enter_instance(b, "b").unwrap();
        let via_ab = ctx.placement();
        assert_ne!(via_ab, via_a);
        assert!(ctx.enter_instance(a, "a").is_err());
        ctx.exit_instance(inner);
        ctx.exit_instance(outer);
        assert_eq!(ctx.placement(), 0);
        assert!(!ctx.instancing());
    }
}
