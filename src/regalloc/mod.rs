// This module drives register allocation for one function. Each round takes a fresh
// snapshot of the IR: it builds the CFG, solves liveness, builds the interference graph
// and colors it. When coloring leaves actual spills, the spilled variables are rewritten
// to live in spill slots, the IR revision is bumped and the next round starts over from
// the new IR; coalescing decisions are not carried across rounds. The number of rounds
// is bounded by the backend configuration, and running out is reported as an internal
// error rather than looping forever. The final round's snapshots are returned with the
// assignment so that later phases (instruction selection, tracing tools, tests) see
// exactly the CFG and liveness the colors were computed from.

//! Iterated register allocation with spilling and restart.

pub mod coloring;
pub mod interference;
pub mod spill;

pub use coloring::{color_graph, Coloring};
pub use interference::{InterferenceGraph, Move, Node};
pub use spill::rewrite_spills;

use crate::analysis::{Cfg, Liveness};
use crate::core::config::BackendConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, SpillSlot, VReg};
use crate::core::register_file::{PhysReg, RegSet};
use crate::lowering::Precoloring;
use crate::target::Target;
use hashbrown::HashSet;
use std::collections::BTreeMap;
use std::fmt;

/// Where a virtual register lives after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Reg(PhysReg),
    Spilled(SpillSlot),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Reg(r) => write!(f, "r{}", r.0),
            Placement::Spilled(slot) => write!(f, "[{slot}]"),
        }
    }
}

/// Final placement of every virtual register of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    map: BTreeMap<VReg, Placement>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, v: VReg, placement: Placement) {
        self.map.insert(v, placement);
    }

    pub fn get(&self, v: VReg) -> Option<Placement> {
        self.map.get(&v).copied()
    }

    /// Register of `v`, if it was colored.
    pub fn reg(&self, v: VReg) -> Option<PhysReg> {
        match self.get(v) {
            Some(Placement::Reg(r)) => Some(r),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (VReg, Placement)> + '_ {
        self.map.iter().map(|(&v, &p)| (v, p))
    }

    /// Every register holding at least one value.
    pub fn used_regs(&self) -> RegSet {
        self.map
            .values()
            .filter_map(|p| match p {
                Placement::Reg(r) => Some(*r),
                Placement::Spilled(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Result of allocating one function.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub assignment: Assignment,
    /// Build/color rounds, the final one included.
    pub rounds: usize,
    pub coalesced_moves: usize,
    /// Variables moved to memory, with their slots, in spill order.
    pub spilled: Vec<(VReg, SpillSlot)>,
    pub cfg: Cfg,
    pub liveness: Liveness,
    pub graph: InterferenceGraph,
}

/// Register allocator bound to a target and a configuration.
pub struct RegisterAllocator<'a> {
    target: &'a Target,
    config: &'a BackendConfig,
}

impl<'a> RegisterAllocator<'a> {
    pub fn new(target: &'a Target, config: &'a BackendConfig) -> Self {
        Self { target, config }
    }

    /// Allocate registers for `func`, rewriting it with spill code as needed.
    pub fn allocate(&self, func: &mut Function, precoloring: &Precoloring) -> CompileResult<Allocation> {
        let mut revision = 0;
        let mut no_spill: HashSet<VReg> = HashSet::new();
        let mut spilled: Vec<(VReg, SpillSlot)> = Vec::new();

        for round in 1..=self.config.max_alloc_rounds {
            let cfg = Cfg::build(func, revision)?;
            let liveness = Liveness::compute(func, &cfg);
            let graph = InterferenceGraph::build(func, &cfg, &liveness, self.target, precoloring)?;
            let coloring = color_graph(
                &graph,
                &self.target.regs,
                self.config.coalescing,
                &no_spill,
                &func.name,
            )?;

            if coloring.spilled.is_empty() {
                let mut assignment = Assignment::new();
                for &(v, slot) in &spilled {
                    assignment.insert(v, Placement::Spilled(slot));
                }
                for (&v, &r) in &coloring.colors {
                    assignment.insert(v, Placement::Reg(r));
                }
                log::debug!(
                    "allocated `{}` in {} rounds: {} values, {} spilled, {} moves coalesced",
                    func.name,
                    round,
                    assignment.len(),
                    spilled.len(),
                    coloring.coalesced_moves
                );
                return Ok(Allocation {
                    assignment,
                    rounds: round,
                    coalesced_moves: coloring.coalesced_moves,
                    spilled,
                    cfg,
                    liveness,
                    graph,
                });
            }

            log::debug!(
                "round {} of `{}` spills {} values, restarting",
                round,
                func.name,
                coloring.spilled.len()
            );
            spilled.extend(rewrite_spills(func, &coloring.spilled, &mut no_spill));
            revision += 1;
        }

        Err(CompileError::AllocationDiverged {
            function: func.name.clone(),
            rounds: self.config.max_alloc_rounds,
        })
    }
}
