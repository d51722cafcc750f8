// This module serves as the central hub for acc8's core infrastructure, the pieces every
// backend phase shares regardless of target: the linear IR data model, the register
// file description with its bit-set register sets, the error type each phase reports,
// the diagnostic records handed to the front end, the backend configuration, and the
// arena-backed compilation session that owns emitted code and statistics for one
// module run. Nothing here knows about a particular instruction set; targets are built
// from these parts in the target and arch8 modules.

//! Core acc8 Infrastructure
//!
//! # Key Components
//!
//! ## IR (`ir`)
//! - Virtual registers, labels, spill slots and symbols
//! - Instructions with typed operands and source locations
//! - Functions and modules as produced by semantic analysis
//!
//! ## Registers (`register_file`)
//! - Physical register names and the allocatable subset
//! - `RegSet` bit sets used by clobbers, constraints and coloring
//!
//! ## Session Management (`session`)
//! - Arena allocation of emitted code using `bumpalo`
//! - Compilation statistics

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ir;
pub mod register_file;
pub mod session;
pub mod test_utils;

pub use config::{BackendConfig, CoalescingStrategy};
pub use diagnostics::{Diagnostic, Diagnostics, Phase, Severity};
pub use error::{CompileError, CompileResult};
pub use ir::{Function, Inst, Module, Operand, VReg};
pub use register_file::{PhysReg, RegSet, RegisterFile};
pub use session::{CompilationSession, SessionStats};
