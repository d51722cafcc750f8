//! Block-level liveness.
//!
//! Each block gets local `use` (read before any write) and `def` (written
//! before any read) sets. The global equations
//!
//! ```text
//! live_out(B) = ⋃ live_in(S)   for successors S
//! live_in(B)  = use(B) ∪ (live_out(B) − def(B))
//! ```
//!
//! are solved backward in post-order until a full pass changes nothing. Sets
//! are ordered so that everything derived from them (interference edges,
//! allocation order) is deterministic.

use super::cfg::Cfg;
use crate::core::ir::{Function, VReg};
use std::collections::BTreeSet;

pub type VRegSet = BTreeSet<VReg>;

/// Liveness snapshot for one CFG revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    revision: u64,
    uses: Vec<VRegSet>,
    defs: Vec<VRegSet>,
    live_in: Vec<VRegSet>,
    live_out: Vec<VRegSet>,
    iterations: usize,
}

impl Liveness {
    pub fn compute(func: &Function, cfg: &Cfg) -> Self {
        let mut uses = Vec::with_capacity(cfg.len());
        let mut defs = Vec::with_capacity(cfg.len());
        for block in cfg.blocks() {
            let mut u = VRegSet::new();
            let mut d = VRegSet::new();
            for inst in block.insts(func) {
                for v in inst.uses() {
                    if !d.contains(&v) {
                        u.insert(v);
                    }
                }
                if let Some(v) = inst.def() {
                    if !u.contains(&v) {
                        d.insert(v);
                    }
                }
            }
            uses.push(u);
            defs.push(d);
        }

        let mut liveness = Self {
            revision: cfg.revision(),
            live_in: vec![VRegSet::new(); cfg.len()],
            live_out: vec![VRegSet::new(); cfg.len()],
            uses,
            defs,
            iterations: 0,
        };
        while liveness.recompute_pass(cfg) {}

        log::debug!(
            "liveness `{}` r{}: fixed point after {} passes",
            func.name,
            cfg.revision(),
            liveness.iterations
        );
        liveness
    }

    /// Apply the data-flow equations once over every block.
    /// Returns whether any set changed.
    pub fn recompute_pass(&mut self, cfg: &Cfg) -> bool {
        self.iterations += 1;
        let mut changed = false;
        for b in cfg.postorder_all() {
            let mut out = VRegSet::new();
            for &s in &cfg.block(b).succs {
                out.extend(self.live_in[s].iter().copied());
            }
            let mut inn = self.uses[b].clone();
            inn.extend(out.difference(&self.defs[b]).copied());

            if out != self.live_out[b] || inn != self.live_in[b] {
                changed = true;
                self.live_out[b] = out;
                self.live_in[b] = inn;
            }
        }
        changed
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn live_in(&self, block: usize) -> &VRegSet {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: usize) -> &VRegSet {
        &self.live_out[block]
    }

    pub fn uses(&self, block: usize) -> &VRegSet {
        &self.uses[block]
    }

    pub fn defs(&self, block: usize) -> &VRegSet {
        &self.defs[block]
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Live-after set of every instruction of `block`, in block order.
    pub fn block_live_after(&self, func: &Function, cfg: &Cfg, block: usize) -> Vec<VRegSet> {
        let insts = cfg.block(block).insts(func);
        let mut result = vec![VRegSet::new(); insts.len()];
        let mut live = self.live_out[block].clone();
        for (i, inst) in insts.iter().enumerate().rev() {
            result[i] = live.clone();
            if let Some(d) = inst.def() {
                live.remove(&d);
            }
            live.extend(inst.uses());
        }
        result
    }

    /// Variables live right after instruction `inst` of the function.
    pub fn live_after(&self, func: &Function, cfg: &Cfg, inst: usize) -> VRegSet {
        let block = cfg.block_of_inst(inst);
        let offset = inst - cfg.block(block).range.start;
        self.block_live_after(func, cfg, block).swap_remove(offset)
    }

    /// Variables live right before instruction `inst` of the function.
    pub fn live_before(&self, func: &Function, cfg: &Cfg, inst: usize) -> VRegSet {
        let mut live = self.live_after(func, cfg, inst);
        let i = &func.insts[inst];
        if let Some(d) = i.def() {
            live.remove(&d);
        }
        live.extend(i.uses());
        live
    }
}
