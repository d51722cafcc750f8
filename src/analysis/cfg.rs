// This module implements the CFG builder. A function's linear instruction list is
// partitioned into basic blocks: a block starts at instruction 0, right after every jump,
// conditional jump or return, and at every label. Calls always return, so they do not end
// a block. Blocks do not copy instructions; each one records the index range it covers in
// the function body, which keeps a CFG a cheap snapshot that can be rebuilt after every
// spill rewrite. Edges follow the terminator of each block: jumps go to their target,
// conditional jumps to their target and the next block, returns nowhere and everything
// else falls through. Successor lists are de-duplicated. After the edges are known the
// builder computes reverse post-order with an iterative DFS, then the dominator sets,
// back edges, natural loops and a loop depth per block, which the allocator uses to
// weight spill costs.

//! Control-flow graph construction.

use super::dominators::{natural_loops, BlockSet, Dominators, NaturalLoop};
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, Inst, Label, Opcode};
use hashbrown::{HashMap, HashSet};
use std::ops::Range;

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub index: usize,
    /// Label defined by the first instruction, if any.
    pub label: Option<Label>,
    /// Instruction indices covered by this block.
    pub range: Range<usize>,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

impl BasicBlock {
    pub fn insts<'f>(&self, func: &'f Function) -> &'f [Inst] {
        &func.insts[self.range.clone()]
    }

    pub fn last_inst(&self) -> usize {
        self.range.end - 1
    }
}

/// CFG snapshot of one function revision.
#[derive(Debug, Clone)]
pub struct Cfg {
    revision: u64,
    blocks: Vec<BasicBlock>,
    label_blocks: HashMap<Label, usize>,
    inst_blocks: Vec<usize>,
    rpo: Vec<usize>,
    doms: Dominators,
    back_edges: Vec<(usize, usize)>,
    loops: Vec<NaturalLoop>,
    loop_depth: Vec<u32>,
}

impl Cfg {
    /// Build the CFG for `func` and tag it with `revision`.
    pub fn build(func: &Function, revision: u64) -> CompileResult<Self> {
        if func.insts.is_empty() {
            return Err(CompileError::malformed(
                &func.name,
                func.loc,
                "function has no instructions",
            ));
        }

        let label_insts = collect_labels(func)?;

        let mut starts = vec![0];
        for (i, inst) in func.insts.iter().enumerate() {
            if matches!(inst.opcode, Opcode::Label(_)) {
                starts.push(i);
            }
            if inst.is_terminator() && i + 1 < func.insts.len() {
                starts.push(i + 1);
            }
        }
        starts.sort_unstable();
        starts.dedup();

        let mut blocks = Vec::with_capacity(starts.len());
        let mut inst_blocks = vec![0; func.insts.len()];
        for (index, &start) in starts.iter().enumerate() {
            let end = starts.get(index + 1).copied().unwrap_or(func.insts.len());
            for slot in &mut inst_blocks[start..end] {
                *slot = index;
            }
            blocks.push(BasicBlock {
                index,
                label: func.insts[start].defined_label(),
                range: start..end,
                succs: Vec::new(),
                preds: Vec::new(),
            });
        }

        let label_blocks: HashMap<Label, usize> = label_insts
            .iter()
            .map(|(&label, &inst)| (label, inst_blocks[inst]))
            .collect();

        let block_count = blocks.len();
        for block in &mut blocks {
            let last = &func.insts[block.last_inst()];
            let next = (block.index + 1 < block_count).then_some(block.index + 1);
            let target = |label: Label| {
                label_blocks.get(&label).copied().ok_or_else(|| {
                    CompileError::malformed(
                        &func.name,
                        last.loc,
                        format!("jump to undefined label `{}`", func.label_name(label)),
                    )
                })
            };

            match last.opcode {
                Opcode::Jump(l) => block.succs.push(target(l)?),
                Opcode::CondJump(l) => {
                    block.succs.push(target(l)?);
                    let fallthrough = next.ok_or_else(|| {
                        CompileError::malformed(
                            &func.name,
                            last.loc,
                            "conditional jump at the end of the function has no fallthrough block",
                        )
                    })?;
                    if !block.succs.contains(&fallthrough) {
                        block.succs.push(fallthrough);
                    }
                }
                Opcode::Return => {}
                _ => match next {
                    Some(n) => block.succs.push(n),
                    None => {
                        return Err(CompileError::malformed(
                            &func.name,
                            last.loc,
                            "control reaches the end of the function without a return or jump",
                        ))
                    }
                },
            }
        }

        for b in 0..block_count {
            for s in blocks[b].succs.clone() {
                blocks[s].preds.push(b);
            }
        }

        let rpo = reverse_post_order(&blocks);
        let preds: Vec<Vec<usize>> = blocks.iter().map(|b| b.preds.clone()).collect();
        let doms = Dominators::compute(&preds, &rpo);

        let mut back_edges = Vec::new();
        for &b in &rpo {
            for &s in &blocks[b].succs {
                if doms.dominates(s, b) {
                    back_edges.push((b, s));
                }
            }
        }

        let loops = natural_loops(&preds, &doms, &back_edges);
        let mut loop_depth = vec![0u32; block_count];
        for lp in &loops {
            for b in lp.body.iter() {
                loop_depth[b] += 1;
            }
        }

        log::debug!(
            "cfg `{}` r{}: {} blocks, {} back edges, {} loops",
            func.name,
            revision,
            block_count,
            back_edges.len(),
            loops.len()
        );

        Ok(Self {
            revision,
            blocks,
            label_blocks,
            inst_blocks,
            rpo,
            doms,
            back_edges,
            loops,
            loop_depth,
        })
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, idx: usize) -> &BasicBlock {
        &self.blocks[idx]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> usize {
        0
    }

    pub fn block_of_label(&self, label: Label) -> Option<usize> {
        self.label_blocks.get(&label).copied()
    }

    /// Block containing instruction `inst`.
    pub fn block_of_inst(&self, inst: usize) -> usize {
        self.inst_blocks[inst]
    }

    /// Reachable blocks in reverse post-order.
    pub fn rpo(&self) -> &[usize] {
        &self.rpo
    }

    /// Every block, reachable ones in post-order first.
    pub fn postorder_all(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self.rpo.iter().rev().copied().collect();
        let seen: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..self.blocks.len()).filter(|b| !seen.contains(b)).rev());
        order
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.rpo.contains(&block)
    }

    pub fn dominators(&self) -> &Dominators {
        &self.doms
    }

    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.doms.dominates(a, b)
    }

    pub fn dominators_of(&self, block: usize) -> &BlockSet {
        self.doms.dominators_of(block)
    }

    /// Edges `a -> b` where `b` dominates `a`.
    pub fn back_edges(&self) -> &[(usize, usize)] {
        &self.back_edges
    }

    pub fn loops(&self) -> &[NaturalLoop] {
        &self.loops
    }

    pub fn loop_depth(&self, block: usize) -> u32 {
        self.loop_depth[block]
    }
}

fn collect_labels(func: &Function) -> CompileResult<HashMap<Label, usize>> {
    let mut labels = HashMap::new();
    for (i, inst) in func.insts.iter().enumerate() {
        if let Opcode::Label(l) = inst.opcode {
            if labels.insert(l, i).is_some() {
                return Err(CompileError::malformed(
                    &func.name,
                    inst.loc,
                    format!("label `{}` is defined more than once", func.label_name(l)),
                ));
            }
        }
    }
    Ok(labels)
}

fn reverse_post_order(blocks: &[BasicBlock]) -> Vec<usize> {
    let mut post = Vec::with_capacity(blocks.len());
    let mut visited = vec![false; blocks.len()];
    let mut stack = vec![(0usize, false)];
    while let Some((block, processed)) = stack.pop() {
        if processed {
            post.push(block);
            continue;
        }
        if visited[block] {
            continue;
        }
        visited[block] = true;
        stack.push((block, true));
        for &succ in blocks[block].succs.iter().rev() {
            if !visited[succ] {
                stack.push((succ, false));
            }
        }
    }
    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ir::{BinOp, Inst, Location, Operand};

    fn loop_function() -> Function {
        // i = 0; L: i = i + 1; c = i; br c, L; ret i
        let mut f = Function::new("count");
        let i = f.named_vreg("i");
        let c = f.named_vreg("c");
        let head = f.named_label("loop");
        f.push(Inst::mov_imm(i, 0));
        f.push(Inst::label(head));
        f.push(Inst::binary(BinOp::Add, i, i.into(), Operand::Imm(1)));
        f.push(Inst::mov(c, i));
        f.push(Inst::cond_jump(c, head));
        f.push(Inst::ret(Some(i.into())));
        f
    }

    #[test]
    fn test_blocks_and_edges() {
        let f = loop_function();
        let cfg = Cfg::build(&f, 0).unwrap();
        assert_eq!(cfg.len(), 3);
        assert_eq!(cfg.block(0).range, 0..1);
        assert_eq!(cfg.block(1).range, 1..5);
        assert_eq!(cfg.block(2).range, 5..6);
        assert_eq!(cfg.block(0).succs, vec![1]);
        assert_eq!(cfg.block(1).succs, vec![1, 2]);
        assert!(cfg.block(2).succs.is_empty());
        assert_eq!(cfg.block(1).preds, vec![0, 1]);
        assert_eq!(cfg.block_of_inst(3), 1);
    }

    #[test]
    fn test_loops_and_depth() {
        let f = loop_function();
        let cfg = Cfg::build(&f, 0).unwrap();
        assert_eq!(cfg.back_edges(), &[(1, 1)]);
        assert_eq!(cfg.loop_depth(0), 0);
        assert_eq!(cfg.loop_depth(1), 1);
        assert_eq!(cfg.loop_depth(2), 0);
        assert!(cfg.dominates(0, 2));
        assert!(cfg.dominates(1, 2));
        assert_eq!(cfg.rpo(), &[0, 1, 2]);
    }

    #[test]
    fn test_conditional_to_next_block_dedups() {
        let mut f = Function::new("f");
        let c = f.new_vreg();
        let next = f.new_label();
        f.push(Inst::mov_imm(c, 1));
        f.push(Inst::cond_jump(c, next));
        f.push(Inst::label(next));
        f.push(Inst::ret(None));
        let cfg = Cfg::build(&f, 0).unwrap();
        assert_eq!(cfg.block(0).succs, vec![1]);
    }

    #[test]
    fn test_undefined_label() {
        let mut f = Function::new("f");
        let missing = f.named_label("nowhere");
        f.push(Inst::jump(missing).at(Location::new(4, 2)));
        let err = Cfg::build(&f, 0).unwrap_err();
        match err {
            CompileError::MalformedControlFlow { reason, loc, .. } => {
                assert!(reason.contains("nowhere"));
                assert_eq!(loc, Location::new(4, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_terminator() {
        let mut f = Function::new("f");
        let a = f.new_vreg();
        f.push(Inst::mov_imm(a, 1));
        assert!(matches!(
            Cfg::build(&f, 0),
            Err(CompileError::MalformedControlFlow { .. })
        ));
    }

    #[test]
    fn test_empty_and_duplicate_label() {
        let f = Function::new("empty");
        assert!(Cfg::build(&f, 0).is_err());

        let mut f = Function::new("dup");
        let l = f.new_label();
        f.push(Inst::label(l));
        f.push(Inst::label(l));
        f.push(Inst::ret(None));
        let err = Cfg::build(&f, 0).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_unreachable_block_kept() {
        let mut f = Function::new("f");
        let dead = f.new_label();
        f.push(Inst::ret(None));
        f.push(Inst::label(dead));
        f.push(Inst::ret(None));
        let cfg = Cfg::build(&f, 3).unwrap();
        assert_eq!(cfg.revision(), 3);
        assert_eq!(cfg.len(), 2);
        assert!(!cfg.is_reachable(1));
        assert!(cfg.dominates(1, 1));
        assert_eq!(cfg.postorder_all(), vec![0, 1]);
    }
}
