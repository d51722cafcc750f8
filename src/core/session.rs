// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns a reference to the arena that backs everything a module run
// hands back to the caller: selected machine instructions, function names and the
// register assignment tables are copied into the arena once a function compiles, so the
// per-function working state (CFG, liveness, interference graph) can be dropped eagerly.
// Strings are interned so repeated names share storage. SessionStats records what the
// run did: functions compiled and failed, machine instructions selected per mnemonic,
// allocation rounds, spilled values and coalesced moves. The session is single-threaded
// (RefCell interior mutability); independent functions compiled on other threads use the
// session-free Backend::compile_function entry point instead.

//! Arena-based compilation session management.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
///
/// All output of a module run is allocated in the arena and shares the
/// session lifetime.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Session statistics for debugging and tuning.
    stats: RefCell<SessionStats>,

    /// String interning for efficient storage.
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate an object in the session arena.
    pub fn alloc<T>(&self, value: T) -> &'arena mut T {
        self.arena.alloc(value)
    }

    /// Allocate a slice of `Copy` values in the session arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Record that a function was compiled.
    pub fn record_function_compiled(&self, name: &str, inst_count: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.machine_instructions += inst_count;

        if stats.largest_function_size < inst_count {
            stats.largest_function_size = inst_count;
            stats.largest_function_name = name.to_string();
        }
    }

    pub fn record_function_failed(&self) {
        self.stats.borrow_mut().functions_failed += 1;
    }

    /// Record a selected machine instruction by mnemonic.
    pub fn record_instruction_selected(&self, mnemonic: &str) {
        let mut stats = self.stats.borrow_mut();
        *stats
            .instruction_counts
            .entry(mnemonic.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_allocation(&self, rounds: usize, spilled: usize, coalesced: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.alloc_rounds += rounds;
        stats.spills_generated += spilled;
        stats.moves_coalesced += coalesced;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_compiled: usize,
    pub functions_failed: usize,

    /// Machine instructions emitted, labels excluded.
    pub machine_instructions: usize,

    /// Count of each selected mnemonic.
    pub instruction_counts: HashMap<String, usize>,

    pub largest_function_size: usize,
    pub largest_function_name: String,

    /// Build/color rounds summed over all functions.
    pub alloc_rounds: usize,
    pub spills_generated: usize,
    pub moves_coalesced: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Functions failed: {}", self.functions_failed)?;
        writeln!(f, "  Machine instructions: {}", self.machine_instructions)?;
        writeln!(f, "  Allocation rounds: {}", self.alloc_rounds)?;
        writeln!(f, "  Spilled values: {}", self.spills_generated)?;
        writeln!(f, "  Coalesced moves: {}", self.moves_coalesced)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} instructions)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let value = session.alloc(42);
        assert_eq!(*value, 42);

        let slice = session.alloc_slice(&[1u8, 2, 3]);
        assert_eq!(slice, &[1, 2, 3]);
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("main");
        let s2 = session.intern_str("main");
        let s3 = session.intern_str("helper");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_function_compiled("small", 4);
        session.record_function_compiled("big", 12);
        session.record_function_failed();
        session.record_instruction_selected("MOV");
        session.record_instruction_selected("ADD");
        session.record_instruction_selected("MOV");
        session.record_allocation(2, 1, 3);

        let stats = session.stats();
        assert_eq!(stats.functions_compiled, 2);
        assert_eq!(stats.functions_failed, 1);
        assert_eq!(stats.machine_instructions, 16);
        assert_eq!(stats.instruction_counts["MOV"], 2);
        assert_eq!(stats.largest_function_name, "big");
        assert_eq!(stats.spills_generated, 1);

        let output = format!("{}", stats);
        assert!(output.contains("Functions compiled: 2"));
        assert!(output.contains("big (12 instructions)"));
        assert!(output.contains("MOV: 2"));
    }
}
