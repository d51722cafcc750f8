// This module ties the backend phases together. Backend::compile_function runs the
// per-function pipeline on a private copy of the function: join deconstruction when the
// function has joins, call-boundary and fixed-register lowering, iterated register
// allocation, instruction selection and the move peephole. Each stage either succeeds
// completely or returns the CompileError that aborts the function. compile_module walks
// a module's functions callees first, keeps going after a failing function, turns every
// failure into a Diagnostic, and copies the code of successful functions into the
// compilation session's arena together with statistics. Compiling a function touches
// nothing but its own data and the read-only target, so callers may compile the
// functions of a module on separate threads with compile_function.

//! Backend pipeline and module driver.

use crate::core::config::BackendConfig;
use crate::core::diagnostics::Diagnostics;
use crate::core::error::CompileResult;
use crate::core::ir::{Function, Module, Opcode, VReg};
use crate::core::register_file::RegSet;
use crate::core::session::CompilationSession;
use crate::isel::{peephole, select_function, MachineInst};
use crate::lowering::{lower_constraints, lower_joins, JoinStats};
use crate::regalloc::{Allocation, Placement, RegisterAllocator};
use crate::target::Target;
use hashbrown::HashMap;

/// Everything the backend produced for one function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub code: Vec<MachineInst>,
    /// Register assignment together with the final CFG and liveness.
    pub allocation: Allocation,
    /// The function as allocated: joins removed, boundaries lowered, spill code inserted.
    pub lowered: Function,
    /// Spill slots the frame must reserve.
    pub spill_slots: u32,
    /// Callee-saved registers the function writes.
    pub callee_saved_used: RegSet,
    pub joins: JoinStats,
    pub bridging_moves: usize,
    pub peephole_removed: usize,
}

impl CompiledFunction {
    /// Machine instructions, labels excluded.
    pub fn instruction_count(&self) -> usize {
        self.code.iter().filter(|i| i.as_op().is_some()).count()
    }
}

/// The backend for one target and configuration.
pub struct Backend<'t> {
    target: &'t Target,
    config: BackendConfig,
}

impl<'t> Backend<'t> {
    pub fn new(target: &'t Target, config: BackendConfig) -> Self {
        Self { target, config }
    }

    pub fn target(&self) -> &'t Target {
        self.target
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Run the whole pipeline on one function.
    pub fn compile_function(&self, func: &Function) -> CompileResult<CompiledFunction> {
        log::debug!("compiling `{}` for {}", func.name, self.target.name);
        let mut lowered = func.clone();

        let joins = if lowered.has_joins() {
            lower_joins(&mut lowered)?
        } else {
            JoinStats::default()
        };
        let precoloring = lower_constraints(&mut lowered, self.target)?;
        log::debug!("`{}`: {} pre-colored temporaries", func.name, precoloring.len());

        let allocation = RegisterAllocator::new(self.target, &self.config).allocate(&mut lowered, &precoloring)?;
        let selection = select_function(
            self.target,
            &lowered,
            &allocation.assignment,
            &allocation.cfg,
            &allocation.liveness,
        )?;

        let mut code = selection.code;
        let peephole_removed = if self.config.peephole {
            peephole(&mut code, self.target)
        } else {
            0
        };
        let callee_saved_used = allocation
            .assignment
            .used_regs()
            .intersect(self.target.cc.callee_saved);

        Ok(CompiledFunction {
            name: func.name.clone(),
            code,
            spill_slots: lowered.spill_slot_count(),
            callee_saved_used,
            joins,
            bridging_moves: selection.bridging_moves,
            peephole_removed,
            allocation,
            lowered,
        })
    }

    /// Compile every function of `module`, callees first.
    ///
    /// A failing function produces a diagnostic and no code; the others are
    /// still compiled.
    pub fn compile_module<'a>(&self, module: &Module, session: &CompilationSession<'a>) -> ModuleOutput<'a> {
        let mut output = ModuleOutput {
            functions: Vec::new(),
            diagnostics: Diagnostics::new(),
        };

        for idx in leaves_first(module) {
            let func = &module.functions[idx];
            match self.compile_function(func) {
                Ok(compiled) => output.functions.push(self.emit(&compiled, session)),
                Err(err) => {
                    log::warn!("`{}` failed: {}", func.name, err);
                    session.record_function_failed();
                    output.diagnostics.push(err.to_diagnostic(&module.source));
                }
            }
        }
        output
    }

    /// Copy the results of one function into the session arena.
    fn emit<'a>(&self, compiled: &CompiledFunction, session: &CompilationSession<'a>) -> EmittedFunction<'a> {
        let count = compiled.instruction_count();
        session.record_function_compiled(&compiled.name, count);
        session.record_allocation(
            compiled.allocation.rounds,
            compiled.allocation.spilled.len(),
            compiled.allocation.coalesced_moves,
        );
        for op in compiled.code.iter().filter_map(MachineInst::as_op) {
            session.record_instruction_selected(self.target.descs.get(op.desc).mnemonic);
        }

        let assignment: Vec<(VReg, Placement)> = compiled.allocation.assignment.iter().collect();
        EmittedFunction {
            name: session.intern_str(&compiled.name),
            code: session.alloc_slice(&compiled.code),
            assignment: session.alloc_slice(&assignment),
            spill_slots: compiled.spill_slots,
            callee_saved_used: compiled.callee_saved_used,
        }
    }
}

/// Arena-backed code of one successfully compiled function.
#[derive(Debug, Clone, Copy)]
pub struct EmittedFunction<'a> {
    pub name: &'a str,
    pub code: &'a [MachineInst],
    pub assignment: &'a [(VReg, Placement)],
    pub spill_slots: u32,
    pub callee_saved_used: RegSet,
}

/// Result of compiling a module.
#[derive(Debug)]
pub struct ModuleOutput<'a> {
    /// Successfully compiled functions, in compilation order.
    pub functions: Vec<EmittedFunction<'a>>,
    pub diagnostics: Diagnostics,
}

impl<'a> ModuleOutput<'a> {
    /// True when no function failed.
    pub fn succeeded(&self) -> bool {
        !self.diagnostics.has_errors()
    }

    pub fn function(&self, name: &str) -> Option<&EmittedFunction<'a>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Function indices in call-graph post-order, so callees precede callers.
/// Calls to functions outside the module are ignored.
pub fn leaves_first(module: &Module) -> Vec<usize> {
    let by_name: HashMap<&str, usize> = module
        .functions
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i))
        .collect();
    let callees: Vec<Vec<usize>> = module
        .functions
        .iter()
        .map(|f| {
            let mut out = Vec::new();
            for inst in &f.insts {
                if let Opcode::Call(sym) = inst.opcode {
                    if let Some(&i) = by_name.get(module.symbols.name(sym)) {
                        if !out.contains(&i) {
                            out.push(i);
                        }
                    }
                }
            }
            out
        })
        .collect();

    let mut visited = vec![false; module.functions.len()];
    let mut order = Vec::with_capacity(module.functions.len());
    for root in 0..module.functions.len() {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&succ) = callees[node].get(top.1) {
                top.1 += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }
    }
    order
}
