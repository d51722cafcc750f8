// This module defines error types for the acc8 backend using the thiserror crate for
// idiomatic Rust error handling. CompileError is the main error enum covering the
// failures a backend phase can report for one function: malformed control flow found
// while building the CFG or deconstructing joins, register constraints that no
// assignment can satisfy, IR shapes the descriptor table cannot match, and a spill loop
// that does not converge. Each variant carries the function name, a reason and the
// source location of the offending instruction so it can be turned into a Diagnostic
// record. The module also provides CompileResult<T> as a convenience alias.

//! Error types for the acc8 backend.

use super::diagnostics::{Diagnostic, Phase, Severity};
use super::ir::Location;
use thiserror::Error;

/// Main error type for backend compilation of one function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("malformed control flow in `{function}` at {loc}: {reason}")]
    MalformedControlFlow {
        function: String,
        reason: String,
        loc: Location,
    },

    #[error("unallocatable register constraint in `{function}` at {loc}: {reason}")]
    UnallocatableConstraint {
        function: String,
        reason: String,
        loc: Location,
    },

    #[error("no machine instruction matches `{shape}` in `{function}` at {loc}")]
    NoMatchingInstruction {
        function: String,
        shape: String,
        loc: Location,
    },

    #[error("register allocation for `{function}` did not converge after {rounds} rounds")]
    AllocationDiverged { function: String, rounds: usize },
}

impl CompileError {
    /// Backend phase that raised this error.
    pub fn phase(&self) -> Phase {
        match self {
            CompileError::MalformedControlFlow { .. } => Phase::ControlFlow,
            CompileError::UnallocatableConstraint { .. } | CompileError::AllocationDiverged { .. } => {
                Phase::RegisterAllocation
            }
            CompileError::NoMatchingInstruction { .. } => Phase::InstructionSelection,
        }
    }

    pub fn location(&self) -> Location {
        match self {
            CompileError::MalformedControlFlow { loc, .. }
            | CompileError::UnallocatableConstraint { loc, .. }
            | CompileError::NoMatchingInstruction { loc, .. } => *loc,
            CompileError::AllocationDiverged { .. } => Location::default(),
        }
    }

    pub fn function(&self) -> &str {
        match self {
            CompileError::MalformedControlFlow { function, .. }
            | CompileError::UnallocatableConstraint { function, .. }
            | CompileError::NoMatchingInstruction { function, .. }
            | CompileError::AllocationDiverged { function, .. } => function,
        }
    }

    /// Convert into a diagnostic record for the external renderer.
    pub fn to_diagnostic(&self, source: &str) -> Diagnostic {
        Diagnostic {
            source: source.to_string(),
            message: self.to_string(),
            location: self.location(),
            phase: self.phase(),
            severity: Severity::Error,
        }
    }

    pub(crate) fn malformed(function: &str, loc: Location, reason: impl Into<String>) -> Self {
        CompileError::MalformedControlFlow {
            function: function.to_string(),
            reason: reason.into(),
            loc,
        }
    }

    pub(crate) fn unallocatable(function: &str, loc: Location, reason: impl Into<String>) -> Self {
        CompileError::UnallocatableConstraint {
            function: function.to_string(),
            reason: reason.into(),
            loc,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_phase_and_diagnostic() {
        let err = CompileError::malformed("main", Location::new(3, 5), "undefined label `L9`");
        assert_eq!(err.phase(), Phase::ControlFlow);
        let diag = err.to_diagnostic("prog.c");
        assert_eq!(diag.source, "prog.c");
        assert_eq!(diag.location, Location::new(3, 5));
        assert_eq!(diag.severity, Severity::Error);
        assert!(diag.message.contains("undefined label"));
        assert!(diag.message.contains("main"));
    }

    #[test]
    fn test_diverged_has_no_location() {
        let err = CompileError::AllocationDiverged {
            function: "f".into(),
            rounds: 32,
        };
        assert_eq!(err.phase(), Phase::RegisterAllocation);
        assert_eq!(err.location(), Location::default());
        assert_eq!(err.function(), "f");
    }
}
