// This module builds the interference graph of one function revision. Nodes are tagged:
// one Physical node per machine register (numbered first, in register order) and one
// Virtual node per virtual register of the function. Physical nodes interfere pairwise.
// A virtual register defined by an instruction interferes with everything live right
// after that instruction except itself and, for a register copy, the copy's source; copies
// between two virtual registers that end up not interfering form the move list the
// coalescer works from. Register constraints from the target become edges to Physical
// nodes: a pre-colored temporary is adjacent to every register but its own, a variable
// an instruction hard-requires in register r gets the same treatment for r, and a
// register an instruction overwrites as scratch (bridging through the accumulator, call
// clobbers) is adjacent to every variable that survives the instruction and to every
// source not routed through it. Each virtual node also carries a spill weight, the
// number of its definitions and uses scaled by 10^loop-depth.

//! Interference graph construction.

use crate::analysis::{Cfg, Liveness};
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, Inst, Operand, VReg};
use crate::core::register_file::PhysReg;
use crate::lowering::Precoloring;
use crate::target::Target;
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeSet;
use std::fmt;

/// A node of the interference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Physical(PhysReg),
    Virtual(VReg),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Physical(r) => write!(f, "r{}", r.0),
            Node::Virtual(v) => write!(f, "{v}"),
        }
    }
}

/// A register copy `dst = src` between two non-interfering virtual registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub dst: VReg,
    pub src: VReg,
}

#[derive(Debug, Clone)]
pub struct InterferenceGraph {
    revision: u64,
    nodes: Vec<Node>,
    index: HashMap<Node, usize>,
    adj_list: Vec<BTreeSet<usize>>,
    adj_set: HashSet<(usize, usize)>,
    moves: Vec<Move>,
    weights: Vec<f64>,
    precolor: Vec<Option<PhysReg>>,
    physical_count: usize,
}

impl InterferenceGraph {
    /// Build the graph from a CFG and liveness snapshot of `func`.
    pub fn build(
        func: &Function,
        cfg: &Cfg,
        liveness: &Liveness,
        target: &Target,
        precoloring: &Precoloring,
    ) -> CompileResult<Self> {
        let mut vregs: BTreeSet<VReg> = func.params.iter().copied().collect();
        for inst in &func.insts {
            vregs.extend(inst.def());
            vregs.extend(inst.uses());
        }
        vregs.extend(precoloring.iter().map(|(v, _)| v));

        let mut graph = Self {
            revision: cfg.revision(),
            nodes: Vec::new(),
            index: HashMap::new(),
            adj_list: Vec::new(),
            adj_set: HashSet::new(),
            moves: Vec::new(),
            weights: Vec::new(),
            precolor: Vec::new(),
            physical_count: target.regs.len(),
        };
        for r in target.regs.regs() {
            graph.add_node(Node::Physical(r), Some(r), f64::INFINITY);
        }
        for &v in &vregs {
            graph.add_node(Node::Virtual(v), precoloring.get(v), 0.0);
        }

        for a in 0..graph.physical_count {
            for b in a + 1..graph.physical_count {
                graph.add_edge(a, b);
            }
        }
        for (v, r) in precoloring.iter() {
            let node = graph.index[&Node::Virtual(v)];
            if r.index() >= graph.physical_count {
                return Err(CompileError::unallocatable(
                    &func.name,
                    func.loc,
                    format!("`{}` is pinned to a register outside the register file", func.vreg_name(v)),
                ));
            }
            graph.pin(node, r);
        }

        let mut candidates = Vec::new();
        for block in cfg.blocks() {
            let weight = 10f64.powi(cfg.loop_depth(block.index) as i32);
            let live_after = liveness.block_live_after(func, cfg, block.index);
            for (inst, live) in block.insts(func).iter().zip(&live_after) {
                let def = inst.def();
                let copy_src = inst.as_move().map(|(_, src)| src);

                if let Some(d) = def {
                    graph.weights[graph.index[&Node::Virtual(d)]] += weight;
                    for &v in live {
                        if v != d && Some(v) != copy_src {
                            graph.add_virtual_edge(d, v);
                        }
                    }
                }
                for v in inst.uses() {
                    graph.weights[graph.index[&Node::Virtual(v)]] += weight;
                }
                if let Some((dst, src)) = inst.as_move() {
                    if dst != src {
                        candidates.push(Move { dst, src });
                    }
                }

                graph.apply_requirements(func, target, inst, live)?;
            }
        }

        graph.check_pinned_conflicts(func, target)?;

        let mut seen = HashSet::new();
        for mv in candidates {
            if !graph.interferes(Node::Virtual(mv.dst), Node::Virtual(mv.src)) && seen.insert(mv) {
                graph.moves.push(mv);
            }
        }

        log::debug!(
            "interference `{}` r{}: {} nodes, {} edges, {} moves",
            func.name,
            graph.revision,
            graph.nodes.len(),
            graph.adj_set.len(),
            graph.moves.len()
        );
        Ok(graph)
    }

    fn add_node(&mut self, node: Node, precolor: Option<PhysReg>, weight: f64) {
        self.index.insert(node, self.nodes.len());
        self.nodes.push(node);
        self.adj_list.push(BTreeSet::new());
        self.weights.push(weight);
        self.precolor.push(precolor);
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let key = (a.min(b), a.max(b));
        if self.adj_set.insert(key) {
            self.adj_list[a].insert(b);
            self.adj_list[b].insert(a);
        }
    }

    fn add_virtual_edge(&mut self, a: VReg, b: VReg) {
        let (a, b) = (self.index[&Node::Virtual(a)], self.index[&Node::Virtual(b)]);
        self.add_edge(a, b);
    }

    fn add_physical_edge(&mut self, v: VReg, r: PhysReg) {
        if r.index() < self.physical_count {
            let a = self.index[&Node::Virtual(v)];
            self.add_edge(a, r.index());
        }
    }

    /// Make `node` adjacent to every register except `r`.
    fn pin(&mut self, node: usize, r: PhysReg) {
        for other in 0..self.physical_count {
            if other != r.index() {
                self.add_edge(node, other);
            }
        }
    }

    fn apply_requirements(
        &mut self,
        func: &Function,
        target: &Target,
        inst: &Inst,
        live: &BTreeSet<VReg>,
    ) -> CompileResult<()> {
        let req = target.requirements(inst);
        let def = inst.def();

        if let (Some(r), Some(d)) = (req.result, def) {
            self.require(func, target, inst, d, r, &mut Vec::new())?;
        }
        let mut pinned = Vec::new();
        for (pos, operand) in inst.operands.iter().enumerate() {
            if let (Some(r), Operand::Reg(v)) = (req.operands[pos], operand) {
                self.require(func, target, inst, *v, r, &mut pinned)?;
            }
        }

        for r in req.early_clobbers.iter() {
            for &v in live {
                if Some(v) != def {
                    self.add_physical_edge(v, r);
                }
            }
            for (pos, operand) in inst.operands.iter().enumerate() {
                if let Operand::Reg(v) = operand {
                    if !req.routed[pos].contains(r) {
                        self.add_physical_edge(*v, r);
                    }
                }
            }
        }
        for r in req.late_clobbers.iter() {
            for &v in live {
                if Some(v) != def {
                    self.add_physical_edge(v, r);
                }
            }
        }
        Ok(())
    }

    /// Record that `inst` needs `v` in register `r`.
    fn require(
        &mut self,
        func: &Function,
        target: &Target,
        inst: &Inst,
        v: VReg,
        r: PhysReg,
        pinned: &mut Vec<(VReg, PhysReg)>,
    ) -> CompileResult<()> {
        let fail = |reason: String| Err(CompileError::unallocatable(&func.name, inst.loc, reason));
        if !target.regs.all().contains(r) {
            return fail(format!("register r{} is not part of the {} register file", r.0, target.name));
        }
        if let Some(&(other, _)) = pinned.iter().find(|&&(w, s)| s == r && w != v) {
            return fail(format!(
                "`{}` and `{}` both require register {}",
                func.vreg_name(other),
                func.vreg_name(v),
                target.regs.name(r)
            ));
        }
        if let Some(&(_, s)) = pinned.iter().find(|&&(w, s)| w == v && s != r) {
            return fail(format!(
                "`{}` is required in both {} and {}",
                func.vreg_name(v),
                target.regs.name(s),
                target.regs.name(r)
            ));
        }
        pinned.push((v, r));

        let node = self.index[&Node::Virtual(v)];
        match self.precolor[node] {
            Some(s) if s != r => fail(format!(
                "`{}` is pinned to {} but required in {}",
                func.vreg_name(v),
                target.regs.name(s),
                target.regs.name(r)
            )),
            Some(_) => Ok(()),
            None if !target.regs.allocatable().contains(r) => fail(format!(
                "`{}` is required in reserved register {}",
                func.vreg_name(v),
                target.regs.name(r)
            )),
            None => {
                self.pin(node, r);
                Ok(())
            }
        }
    }

    /// Two values pinned to one register must never be live at the same time.
    fn check_pinned_conflicts(&self, func: &Function, target: &Target) -> CompileResult<()> {
        for node in self.physical_count..self.nodes.len() {
            let Some(r) = self.precolor[node] else {
                continue;
            };
            let Node::Virtual(v) = self.nodes[node] else {
                continue;
            };
            let clash = self.adj_list[node]
                .iter()
                .copied()
                .find(|&other| self.precolor[other] == Some(r));
            let Some(other) = clash else {
                continue;
            };
            let loc = func
                .insts
                .iter()
                .find(|i| i.def() == Some(v))
                .map(|i| i.loc)
                .unwrap_or(func.loc);
            let reason = match self.nodes[other] {
                Node::Physical(_) => format!(
                    "`{}` is pinned to {} but {} is overwritten while it is live",
                    func.vreg_name(v),
                    target.regs.name(r),
                    target.regs.name(r)
                ),
                Node::Virtual(w) => format!(
                    "`{}` and `{}` are both pinned to {} and live at the same time",
                    func.vreg_name(v),
                    func.vreg_name(w),
                    target.regs.name(r)
                ),
            };
            return Err(CompileError::unallocatable(&func.name, loc, reason));
        }
        Ok(())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn physical_count(&self) -> usize {
        self.physical_count
    }

    pub fn node_index(&self, node: Node) -> Option<usize> {
        self.index.get(&node).copied()
    }

    pub fn node(&self, idx: usize) -> Node {
        self.nodes[idx]
    }

    /// Virtual registers of the graph in ascending order.
    pub fn virtuals(&self) -> impl Iterator<Item = VReg> + '_ {
        self.nodes[self.physical_count..].iter().filter_map(|n| match n {
            Node::Virtual(v) => Some(*v),
            Node::Physical(_) => None,
        })
    }

    pub fn interferes(&self, a: Node, b: Node) -> bool {
        match (self.node_index(a), self.node_index(b)) {
            (Some(a), Some(b)) => self.interferes_idx(a, b),
            _ => false,
        }
    }

    pub(crate) fn interferes_idx(&self, a: usize, b: usize) -> bool {
        self.adj_set.contains(&(a.min(b), a.max(b)))
    }

    pub fn neighbors(&self, node: Node) -> Vec<Node> {
        self.node_index(node)
            .map(|i| self.adj_list[i].iter().map(|&j| self.nodes[j]).collect())
            .unwrap_or_default()
    }

    pub(crate) fn adjacency(&self, idx: usize) -> &BTreeSet<usize> {
        &self.adj_list[idx]
    }

    pub fn degree(&self, node: Node) -> usize {
        self.node_index(node).map_or(0, |i| self.adj_list[i].len())
    }

    pub fn edge_count(&self) -> usize {
        self.adj_set.len()
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Weighted count of definitions and uses of `v`.
    pub fn spill_weight(&self, v: VReg) -> f64 {
        self.node_index(Node::Virtual(v))
            .map_or(0.0, |i| self.weights[i])
    }

    pub(crate) fn weight_idx(&self, idx: usize) -> f64 {
        self.weights[idx]
    }

    /// Register a node is fixed to: its own register for physical nodes,
    /// the pre-coloring for pinned temporaries.
    pub fn precolor(&self, node: Node) -> Option<PhysReg> {
        self.node_index(node).and_then(|i| self.precolor[i])
    }

    pub(crate) fn precolor_idx(&self, idx: usize) -> Option<PhysReg> {
        self.precolor[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch8::{self, a8};
    use crate::core::ir::{BinOp, Inst, StorageClass, SymbolTable, Type};
    use crate::lowering::lower_constraints;

    fn graph_of(func: &Function, pre: &Precoloring) -> InterferenceGraph {
        let cfg = Cfg::build(func, 0).unwrap();
        let liveness = Liveness::compute(func, &cfg);
        InterferenceGraph::build(func, &cfg, &liveness, a8(), pre).unwrap()
    }

    #[test]
    fn test_simultaneously_live_values_interfere() {
        let mut f = Function::new("f");
        let (a, b, c) = (f.named_vreg("a"), f.named_vreg("b"), f.named_vreg("c"));
        f.push(Inst::mov_imm(a, 1));
        f.push(Inst::mov_imm(b, 2));
        f.push(Inst::binary(BinOp::Add, c, a.into(), b.into()));
        f.push(Inst::ret(None));

        let g = graph_of(&f, &Precoloring::new());
        assert!(g.interferes(Node::Virtual(a), Node::Virtual(b)));
        assert!(!g.interferes(Node::Virtual(a), Node::Virtual(c)));
        assert!(g.interferes(Node::Physical(arch8::A), Node::Physical(arch8::L)));
        // 7 physical + 3 virtual
        assert_eq!(g.len(), 10);
        assert_eq!(g.spill_weight(a), 2.0);
    }

    #[test]
    fn test_move_source_does_not_interfere() {
        let mut f = Function::new("f");
        let (a, b) = (f.named_vreg("a"), f.named_vreg("b"));
        f.push(Inst::mov_imm(a, 1));
        f.push(Inst::mov(b, a));
        f.push(Inst::store(crate::core::ir::MemLoc::Local(0), a.into()));
        f.push(Inst::store(crate::core::ir::MemLoc::Local(1), b.into()));
        f.push(Inst::ret(None));

        let g = graph_of(&f, &Precoloring::new());
        assert!(!g.interferes(Node::Virtual(a), Node::Virtual(b)));
        assert_eq!(g.moves(), &[Move { dst: b, src: a }]);
    }

    #[test]
    fn test_values_live_across_a_call_avoid_caller_saved() {
        let mut syms = SymbolTable::new();
        let g_sym = syms.insert("g", StorageClass::Function, Type::U8);
        let mut f = Function::new("f");
        let (x, r, s) = (f.named_vreg("x"), f.named_vreg("r"), f.named_vreg("s"));
        f.push(Inst::mov_imm(x, 1));
        f.push(Inst::call(g_sym, Some(r), Vec::new()));
        f.push(Inst::binary(BinOp::Add, s, x.into(), r.into()));
        f.push(Inst::ret(Some(s.into())));

        let pre = lower_constraints(&mut f, a8()).unwrap();
        let g = graph_of(&f, &pre);
        for reg in arch8::CALLER_SAVED.iter() {
            assert!(g.interferes(Node::Virtual(x), Node::Physical(reg)));
        }
        assert!(!g.interferes(Node::Virtual(x), Node::Physical(arch8::H)));
    }

    #[test]
    fn test_pinned_temporary_is_adjacent_to_other_registers() {
        let mut f = Function::new("f");
        let p = f.add_param("p");
        f.push(Inst::ret(Some(p.into())));
        let pre = lower_constraints(&mut f, a8()).unwrap();
        let g = graph_of(&f, &pre);

        let (t, reg) = pre.iter().find(|&(_, r)| r == arch8::B).unwrap();
        assert_eq!(reg, arch8::B);
        assert_eq!(g.precolor(Node::Virtual(t)), Some(arch8::B));
        assert!(!g.interferes(Node::Virtual(t), Node::Physical(arch8::B)));
        assert!(g.interferes(Node::Virtual(t), Node::Physical(arch8::A)));
    }
}
