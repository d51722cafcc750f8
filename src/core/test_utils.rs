//! Shared helpers for unit tests: unconstrained machines, batches of named
//! values, and module compilation inside a scratch arena.

#[cfg(test)]
pub mod test {
    use crate::core::config::BackendConfig;
    use crate::core::ir::{Function, Module, VReg};
    use crate::core::register_file::{PhysReg, RegSet, RegisterFile};
    use crate::core::session::CompilationSession;
    use crate::pipeline::{Backend, ModuleOutput};
    use crate::target::{CCInfo, DescriptorTable, Target};
    use bumpalo::Bump;

    const REG_NAMES: [&str; 8] = ["R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7"];

    /// A machine with `count` interchangeable registers and no descriptors.
    ///
    /// R0 returns values and R1 takes the first argument; every register is
    /// caller-saved.
    pub fn plain_target(name: &'static str, count: usize) -> Target {
        assert!((2..=REG_NAMES.len()).contains(&count));
        Target::new(
            name,
            RegisterFile::new(&REG_NAMES[..count], PhysReg(0)),
            CCInfo {
                arg_regs: vec![PhysReg(1)],
                ret_reg: PhysReg(0),
                caller_saved: RegSet::first(count),
                callee_saved: RegSet::new(),
            },
            DescriptorTable::new(Vec::new()),
        )
    }

    /// `count` fresh values named `prefix0`, `prefix1`, ...
    pub fn named_values(func: &mut Function, prefix: &str, count: usize) -> Vec<VReg> {
        (0..count).map(|i| func.named_vreg(format!("{prefix}{i}"))).collect()
    }

    /// Compile `module` into a fresh arena and hand the output, the session
    /// and the arena's footprint to `check`.
    pub fn compile_in_arena<F, R>(module: &Module, target: &Target, check: F) -> R
    where
        F: FnOnce(&ModuleOutput<'_>, &CompilationSession<'_>, usize) -> R,
    {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let output = Backend::new(target, BackendConfig::default()).compile_module(module, &session);
        check(&output, &session, arena.allocated_bytes())
    }
}
