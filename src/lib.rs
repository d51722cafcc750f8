//! acc8 - backend for an 8-bit accumulator CPU.
//!
//! The backend takes the linear IR of a module, builds a control-flow graph
//! per function, solves liveness, colors an interference graph with
//! iterated coalescing and spilling, and selects machine instructions from
//! a static descriptor table.
//!
//! # Primary Usage
//!
//! ```ignore
//! use acc8::arch8::a8;
//! use acc8::core::{BackendConfig, CompilationSession};
//! use acc8::pipeline::Backend;
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let output = Backend::new(a8(), BackendConfig::default()).compile_module(&module, &session);
//! for diag in output.diagnostics.iter() {
//!     eprintln!("{diag}");
//! }
//! ```
//!
//! # Architecture
//!
//! - [`core`] - IR, registers, errors, diagnostics, configuration, session
//! - [`analysis`] - CFG, dominators, loops and liveness
//! - [`target`] - target description: descriptors and calling convention
//! - [`arch8`] - the accumulator machine itself
//! - [`lowering`] - join deconstruction and constraint lowering
//! - [`regalloc`] - interference graph, coloring and spilling
//! - [`isel`] - instruction selection and the move peephole
//! - [`pipeline`] - per-function pipeline and module driver
//! - [`test_ir`] - textual IR, dumps and FileCheck-style tests

pub mod analysis;
pub mod arch8;
pub mod core;
pub mod isel;
pub mod lowering;
pub mod pipeline;
pub mod regalloc;
pub mod target;
pub mod test_ir;

pub use crate::core::{
    BackendConfig, CoalescingStrategy, CompilationSession, CompileError, CompileResult, Diagnostic,
    Diagnostics, Function, Module,
};
pub use pipeline::{Backend, CompiledFunction, ModuleOutput};
