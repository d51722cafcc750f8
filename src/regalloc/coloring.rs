//! Graph coloring with iterated register coalescing (Appel/George).
//!
//! The colorer works on a private copy of the interference graph's adjacency
//! and runs the usual worklist loop:
//!
//! 1. **Simplify**: remove a low-degree node that is not move-related
//! 2. **Coalesce**: merge the endpoints of a copy when the merge is safe
//! 3. **Freeze**: give up coalescing one low-degree move-related node
//! 4. **Spill**: pick a potential spill among the high-degree nodes
//! 5. **Select**: pop the stack and assign the lowest free register
//!
//! Physical nodes and pre-colored temporaries are fixed-color nodes: they
//! have infinite degree and never enter a worklist. Several pre-colored
//! temporaries may share a color when they never interfere, so merging a
//! node into one of them also checks that no neighbour already holds that
//! color.
//!
//! Every worklist is ordered, which makes the result a pure function of the
//! input graph.

use super::interference::{InterferenceGraph, Node};
use crate::core::config::CoalescingStrategy;
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::VReg;
use crate::core::register_file::{PhysReg, RegSet, RegisterFile};
use hashbrown::HashSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Outcome of one coloring attempt.
#[derive(Debug, Clone, Default)]
pub struct Coloring {
    /// Register of every virtual register that was colored.
    pub colors: BTreeMap<VReg, PhysReg>,
    /// Virtual registers that could not be colored, in ascending order.
    pub spilled: Vec<VReg>,
    /// Coalesced virtual register -> the node it was merged into.
    pub aliases: BTreeMap<VReg, Node>,
    pub coalesced_moves: usize,
}

const INFINITE_DEGREE: usize = usize::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Precolored,
    Initial,
    Simplify,
    Freeze,
    Spill,
    Coalesced,
    OnStack,
    Colored,
    Spilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Worklist,
    Active,
    Coalesced,
    Constrained,
    Frozen,
}

struct GraphColoring<'g> {
    graph: &'g InterferenceGraph,
    k: usize,
    allocatable: RegSet,
    strategy: CoalescingStrategy,

    adj_list: Vec<BTreeSet<usize>>,
    adj_set: HashSet<(usize, usize)>,
    degree: Vec<usize>,
    weight: Vec<f64>,

    /// (dst, src) node indices of every move.
    moves: Vec<(usize, usize)>,
    move_list: Vec<BTreeSet<usize>>,
    move_state: Vec<MoveState>,

    node_state: Vec<NodeState>,
    simplify_worklist: VecDeque<usize>,
    freeze_worklist: BTreeSet<usize>,
    spill_worklist: BTreeSet<usize>,
    worklist_moves: VecDeque<usize>,
    select_stack: Vec<usize>,
    alias: Vec<usize>,
    color: Vec<Option<PhysReg>>,
}

/// Color `graph` with the allocatable registers of `regs`.
///
/// Nodes in `no_spill` are only chosen as potential spills when nothing
/// else is left.
pub fn color_graph(
    graph: &InterferenceGraph,
    regs: &RegisterFile,
    strategy: CoalescingStrategy,
    no_spill: &HashSet<VReg>,
    function: &str,
) -> CompileResult<Coloring> {
    let mut state = GraphColoring::new(graph, regs, strategy, no_spill);
    if state.k == 0 && state.node_state.contains(&NodeState::Initial) {
        return Err(CompileError::unallocatable(
            function,
            Default::default(),
            "the register file has no allocatable registers",
        ));
    }

    state.make_worklist();
    loop {
        if let Some(n) = state.simplify_worklist.pop_front() {
            state.simplify(n);
        } else if let Some(m) = state.worklist_moves.pop_front() {
            state.coalesce(m);
        } else if let Some(&n) = state.freeze_worklist.first() {
            state.freeze(n);
        } else if !state.spill_worklist.is_empty() {
            state.select_spill();
        } else {
            break;
        }
    }
    state.assign_colors();

    let coloring = state.finish();
    log::debug!(
        "coloring `{}`: {} colored, {} spilled, {} moves coalesced",
        function,
        coloring.colors.len(),
        coloring.spilled.len(),
        coloring.coalesced_moves
    );
    Ok(coloring)
}

impl<'g> GraphColoring<'g> {
    fn new(
        graph: &'g InterferenceGraph,
        regs: &RegisterFile,
        strategy: CoalescingStrategy,
        no_spill: &HashSet<VReg>,
    ) -> Self {
        let n = graph.len();
        let mut adj_list = vec![BTreeSet::new(); n];
        let mut adj_set = HashSet::new();
        let mut degree = vec![0; n];
        let mut weight = vec![0.0; n];
        let mut node_state = vec![NodeState::Initial; n];
        let mut color = vec![None; n];

        for i in 0..n {
            if let Some(r) = graph.precolor_idx(i) {
                node_state[i] = NodeState::Precolored;
                degree[i] = INFINITE_DEGREE;
                color[i] = Some(r);
            }
        }
        for i in 0..n {
            for &j in graph.adjacency(i) {
                adj_set.insert((i.min(j), i.max(j)));
                if node_state[i] != NodeState::Precolored {
                    adj_list[i].insert(j);
                }
            }
            if node_state[i] != NodeState::Precolored {
                degree[i] = adj_list[i].len();
                weight[i] = match graph.node(i) {
                    Node::Virtual(v) if no_spill.contains(&v) => f64::INFINITY,
                    _ => graph.weight_idx(i),
                };
            }
        }

        let mut moves = Vec::with_capacity(graph.moves().len());
        let mut move_list = vec![BTreeSet::new(); n];
        for mv in graph.moves() {
            let (Some(dst), Some(src)) = (
                graph.node_index(Node::Virtual(mv.dst)),
                graph.node_index(Node::Virtual(mv.src)),
            ) else {
                continue;
            };
            move_list[dst].insert(moves.len());
            move_list[src].insert(moves.len());
            moves.push((dst, src));
        }

        Self {
            graph,
            k: regs.num_colors(),
            allocatable: regs.allocatable(),
            strategy,
            adj_list,
            adj_set,
            degree,
            weight,
            move_state: vec![MoveState::Worklist; moves.len()],
            moves,
            move_list,
            node_state,
            simplify_worklist: VecDeque::new(),
            freeze_worklist: BTreeSet::new(),
            spill_worklist: BTreeSet::new(),
            worklist_moves: VecDeque::new(),
            select_stack: Vec::new(),
            alias: (0..n).collect(),
            color,
        }
    }

    fn is_precolored(&self, n: usize) -> bool {
        self.node_state[n] == NodeState::Precolored
    }

    fn make_worklist(&mut self) {
        self.worklist_moves = (0..self.moves.len()).collect();
        for n in 0..self.node_state.len() {
            if self.node_state[n] != NodeState::Initial {
                continue;
            }
            if self.degree[n] >= self.k {
                self.spill_worklist.insert(n);
                self.node_state[n] = NodeState::Spill;
            } else if self.is_move_related(n) {
                self.freeze_worklist.insert(n);
                self.node_state[n] = NodeState::Freeze;
            } else {
                self.simplify_worklist.push_back(n);
                self.node_state[n] = NodeState::Simplify;
            }
        }
    }

    /// Neighbours still in the graph.
    fn adjacent(&self, n: usize) -> Vec<usize> {
        self.adj_list[n]
            .iter()
            .copied()
            .filter(|&m| !matches!(self.node_state[m], NodeState::OnStack | NodeState::Coalesced))
            .collect()
    }

    fn node_moves(&self, n: usize) -> Vec<usize> {
        self.move_list[n]
            .iter()
            .copied()
            .filter(|&m| matches!(self.move_state[m], MoveState::Active | MoveState::Worklist))
            .collect()
    }

    fn is_move_related(&self, n: usize) -> bool {
        !self.node_moves(n).is_empty()
    }

    fn interferes(&self, a: usize, b: usize) -> bool {
        self.adj_set.contains(&(a.min(b), a.max(b)))
    }

    fn add_edge(&mut self, u: usize, v: usize) {
        if u == v || !self.adj_set.insert((u.min(v), u.max(v))) {
            return;
        }
        if !self.is_precolored(u) {
            self.adj_list[u].insert(v);
            self.degree[u] += 1;
        }
        if !self.is_precolored(v) {
            self.adj_list[v].insert(u);
            self.degree[v] += 1;
        }
    }

    fn simplify(&mut self, n: usize) {
        log::trace!("simplify {}", self.graph.node(n));
        self.select_stack.push(n);
        self.node_state[n] = NodeState::OnStack;
        for m in self.adjacent(n) {
            self.decrement_degree(m);
        }
    }

    fn decrement_degree(&mut self, m: usize) {
        if self.is_precolored(m) {
            return;
        }
        let d = self.degree[m];
        self.degree[m] = d.saturating_sub(1);
        if d == self.k && self.node_state[m] == NodeState::Spill {
            let mut nodes = self.adjacent(m);
            nodes.push(m);
            self.enable_moves(&nodes);
            self.spill_worklist.remove(&m);
            if self.is_move_related(m) {
                self.freeze_worklist.insert(m);
                self.node_state[m] = NodeState::Freeze;
            } else {
                self.simplify_worklist.push_back(m);
                self.node_state[m] = NodeState::Simplify;
            }
        }
    }

    fn enable_moves(&mut self, nodes: &[usize]) {
        for &n in nodes {
            for m in self.node_moves(n) {
                if self.move_state[m] == MoveState::Active {
                    self.move_state[m] = MoveState::Worklist;
                    self.worklist_moves.push_back(m);
                }
            }
        }
    }

    fn get_alias(&self, mut n: usize) -> usize {
        while self.node_state[n] == NodeState::Coalesced {
            n = self.alias[n];
        }
        n
    }

    fn add_worklist(&mut self, u: usize) {
        if self.node_state[u] == NodeState::Freeze
            && !self.is_move_related(u)
            && self.degree[u] < self.k
        {
            self.freeze_worklist.remove(&u);
            self.simplify_worklist.push_back(u);
            self.node_state[u] = NodeState::Simplify;
        }
    }

    /// Whether neighbour `t` of `v` allows merging `v` into `u`.
    fn ok(&self, t: usize, u: usize) -> bool {
        if self.is_precolored(t) {
            return self.color[t] != self.color[u] || self.interferes(t, u);
        }
        self.degree[t] < self.k || self.interferes(t, u)
    }

    /// Briggs: the merged node has fewer than K significant neighbours.
    fn conservative(&self, nodes: &BTreeSet<usize>) -> bool {
        nodes.iter().filter(|&&n| self.degree[n] >= self.k).count() < self.k
    }

    fn can_merge(&self, u: usize, v: usize) -> bool {
        if self.is_precolored(u) {
            return self.adjacent(v).into_iter().all(|t| self.ok(t, u));
        }
        match self.strategy {
            CoalescingStrategy::Briggs => {
                let mut nodes: BTreeSet<usize> = self.adjacent(u).into_iter().collect();
                nodes.extend(self.adjacent(v));
                self.conservative(&nodes)
            }
            CoalescingStrategy::George => self.adjacent(v).into_iter().all(|t| self.ok(t, u)),
        }
    }

    fn coalesce(&mut self, m: usize) {
        let (dst, src) = self.moves[m];
        let (x, y) = (self.get_alias(dst), self.get_alias(src));
        let (u, v) = if self.is_precolored(y) { (y, x) } else { (x, y) };

        if u == v {
            self.move_state[m] = MoveState::Coalesced;
            self.add_worklist(u);
        } else if self.is_precolored(v) || self.interferes(u, v) {
            self.move_state[m] = MoveState::Constrained;
            self.add_worklist(u);
            self.add_worklist(v);
        } else if self.can_merge(u, v) {
            log::trace!("coalesce {} into {}", self.graph.node(v), self.graph.node(u));
            self.move_state[m] = MoveState::Coalesced;
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.move_state[m] = MoveState::Active;
        }
    }

    fn combine(&mut self, u: usize, v: usize) {
        if !self.freeze_worklist.remove(&v) {
            self.spill_worklist.remove(&v);
        }
        self.node_state[v] = NodeState::Coalesced;
        self.alias[v] = u;

        let v_moves = self.move_list[v].clone();
        self.move_list[u].extend(v_moves);
        self.enable_moves(&[v]);
        if !self.is_precolored(u) {
            self.weight[u] += self.weight[v];
        }

        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }

        if self.degree[u] >= self.k && self.node_state[u] == NodeState::Freeze {
            self.freeze_worklist.remove(&u);
            self.spill_worklist.insert(u);
            self.node_state[u] = NodeState::Spill;
        }
    }

    fn freeze(&mut self, u: usize) {
        self.freeze_worklist.remove(&u);
        self.simplify_worklist.push_back(u);
        self.node_state[u] = NodeState::Simplify;
        self.freeze_moves(u);
    }

    fn freeze_moves(&mut self, u: usize) {
        for m in self.node_moves(u) {
            let (x, y) = self.moves[m];
            let v = if self.get_alias(y) == self.get_alias(u) {
                self.get_alias(x)
            } else {
                self.get_alias(y)
            };
            self.move_state[m] = MoveState::Frozen;
            if self.node_state[v] == NodeState::Freeze
                && !self.is_move_related(v)
                && self.degree[v] < self.k
            {
                self.freeze_worklist.remove(&v);
                self.simplify_worklist.push_back(v);
                self.node_state[v] = NodeState::Simplify;
            }
        }
    }

    /// Lowest spill weight per degree; ties go to the lower node.
    fn select_spill(&mut self) {
        let mut best: Option<(usize, f64)> = None;
        for &n in &self.spill_worklist {
            let priority = self.weight[n] / self.degree[n].max(1) as f64;
            match best {
                Some((_, p)) if priority >= p => {}
                _ => best = Some((n, priority)),
            }
        }
        if let Some((n, priority)) = best {
            log::trace!("potential spill {} (cost {:.3})", self.graph.node(n), priority);
            self.spill_worklist.remove(&n);
            self.simplify_worklist.push_back(n);
            self.node_state[n] = NodeState::Simplify;
            self.freeze_moves(n);
        }
    }

    fn assign_colors(&mut self) {
        while let Some(n) = self.select_stack.pop() {
            let mut ok_colors = self.allocatable;
            for &w in &self.adj_list[n] {
                if let Some(c) = self.color[self.get_alias(w)] {
                    ok_colors.remove(c);
                }
            }
            match ok_colors.first_reg() {
                Some(c) => {
                    self.color[n] = Some(c);
                    self.node_state[n] = NodeState::Colored;
                }
                None => {
                    log::trace!("actual spill {}", self.graph.node(n));
                    self.node_state[n] = NodeState::Spilled;
                }
            }
        }
        for n in 0..self.node_state.len() {
            if self.node_state[n] == NodeState::Coalesced {
                self.color[n] = self.color[self.get_alias(n)];
            }
        }
    }

    fn finish(self) -> Coloring {
        let mut coloring = Coloring {
            coalesced_moves: self
                .move_state
                .iter()
                .filter(|&&s| s == MoveState::Coalesced)
                .count(),
            ..Coloring::default()
        };
        for n in 0..self.node_state.len() {
            let Node::Virtual(v) = self.graph.node(n) else {
                continue;
            };
            if self.node_state[n] == NodeState::Coalesced {
                coloring.aliases.insert(v, self.graph.node(self.get_alias(n)));
            }
            match self.color[n] {
                Some(c) => {
                    coloring.colors.insert(v, c);
                }
                None => coloring.spilled.push(v),
            }
        }
        coloring
    }
}
