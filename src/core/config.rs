//! Backend configuration.

use strum::{Display, EnumString};

/// Conservative coalescing test used by the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CoalescingStrategy {
    /// Merge when the combined node has fewer than K neighbours of significant degree.
    #[default]
    Briggs,
    /// Merge when every neighbour of one side is low-degree or already adjacent to the other.
    George,
}

/// Knobs shared by all phases of a backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub coalescing: CoalescingStrategy,
    /// Upper bound on build/color/spill rounds per function.
    pub max_alloc_rounds: usize,
    /// Run the self-move and redundant-pair peephole after selection.
    pub peephole: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            coalescing: CoalescingStrategy::Briggs,
            max_alloc_rounds: 32,
            peephole: true,
        }
    }
}

impl BackendConfig {
    pub fn with_coalescing(mut self, strategy: CoalescingStrategy) -> Self {
        self.coalescing = strategy;
        self
    }

    pub fn with_max_alloc_rounds(mut self, rounds: usize) -> Self {
        self.max_alloc_rounds = rounds.max(1);
        self
    }

    pub fn with_peephole(mut self, enabled: bool) -> Self {
        self.peephole = enabled;
        self
    }
}
