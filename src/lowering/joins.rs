// This module deconstructs join points before register allocation. A phi sits right
// after the label of its block and names, for every incoming value, the label that
// starts the predecessor block the value flows from. Each phi is replaced by copies on
// the incoming edges. All phis of a block read their inputs at the same time, so when
// an edge carries more than one copy the sources are first copied into fresh
// temporaries and only then into the phi results, which keeps swaps and rotations
// correct without a cycle-breaking pass. Copies for an edge out of a block with a
// single successor go right before its jump (or at the end of the block when it falls
// through). The taken edge of a conditional jump is split: a fresh block holding the
// copies and a jump back to the join block is appended to the function and the branch
// is retargeted to it. The fallthrough edge of a conditional jump gets its copies right
// after the branch, where only the fallthrough path executes them.

//! Join (phi) deconstruction.

use crate::analysis::Cfg;
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, Inst, Label, Location, Opcode, Operand, Type, VReg};
use std::collections::BTreeMap;

/// What join deconstruction did to a function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub phis_removed: usize,
    pub copies_inserted: usize,
    pub edges_split: usize,
}

/// A parallel copy on one CFG edge.
#[derive(Debug, Clone, Copy)]
struct EdgeCopy {
    dst: VReg,
    src: VReg,
    ty: Type,
    loc: Location,
}

/// Replace every phi of `func` with copies on its incoming edges.
pub fn lower_joins(func: &mut Function) -> CompileResult<JoinStats> {
    let cfg = Cfg::build(func, 0)?;
    let mut stats = JoinStats::default();

    // (pred, succ) -> copies, in phi order.
    let mut edges: BTreeMap<(usize, usize), Vec<EdgeCopy>> = BTreeMap::new();
    let mut phi_insts = Vec::new();

    for block in cfg.blocks() {
        let mut at_head = true;
        for idx in block.range.clone() {
            let inst = &func.insts[idx];
            let labels = match &inst.opcode {
                Opcode::Label(_) if idx == block.range.start => continue,
                Opcode::Phi(labels) => labels,
                _ => {
                    at_head = false;
                    continue;
                }
            };

            let Some(join_label) = block.label else {
                return Err(CompileError::malformed(
                    &func.name,
                    inst.loc,
                    "join in a block without a label",
                ));
            };
            if !at_head {
                return Err(CompileError::malformed(
                    &func.name,
                    inst.loc,
                    format!(
                        "join in `{}` does not directly follow the block label",
                        func.label_name(join_label)
                    ),
                ));
            }
            let Some(dst) = inst.result else {
                return Err(CompileError::malformed(&func.name, inst.loc, "join without a result"));
            };
            if labels.len() != inst.operands.len() {
                return Err(CompileError::malformed(
                    &func.name,
                    inst.loc,
                    "join has a different number of labels and values",
                ));
            }

            let mut seen = Vec::with_capacity(labels.len());
            for (&label, operand) in labels.iter().zip(&inst.operands) {
                let pred = cfg.block_of_label(label).ok_or_else(|| {
                    CompileError::malformed(
                        &func.name,
                        inst.loc,
                        format!("join names unknown predecessor `{}`", func.label_name(label)),
                    )
                })?;
                if !block.preds.contains(&pred) {
                    return Err(CompileError::malformed(
                        &func.name,
                        inst.loc,
                        format!(
                            "`{}` is not a predecessor of `{}`",
                            func.label_name(label),
                            func.label_name(join_label)
                        ),
                    ));
                }
                if seen.contains(&pred) {
                    return Err(CompileError::malformed(
                        &func.name,
                        inst.loc,
                        format!("join lists `{}` twice", func.label_name(label)),
                    ));
                }
                seen.push(pred);

                let Operand::Reg(src) = *operand else {
                    return Err(CompileError::malformed(
                        &func.name,
                        inst.loc,
                        "join operand is not a virtual register",
                    ));
                };
                edges.entry((pred, block.index)).or_default().push(EdgeCopy {
                    dst,
                    src,
                    ty: inst.ty,
                    loc: inst.loc,
                });
            }

            if let Some(&missing) = block.preds.iter().find(|p| !seen.contains(p)) {
                let name = cfg
                    .block(missing)
                    .label
                    .map(|l| func.label_name(l))
                    .unwrap_or_else(|| format!("block {missing}"));
                return Err(CompileError::malformed(
                    &func.name,
                    inst.loc,
                    format!("join has no incoming value from `{name}`"),
                ));
            }
            phi_insts.push(idx);
        }
    }

    if phi_insts.is_empty() {
        return Ok(stats);
    }

    // Copies to insert before instruction index i (i == len appends).
    let mut inserts: BTreeMap<usize, Vec<Inst>> = BTreeMap::new();
    let mut split_blocks: Vec<Inst> = Vec::new();
    let mut retarget: Vec<(usize, Label)> = Vec::new();

    for (&(pred, succ), copies) in &edges {
        let seq = sequentialize(func, copies);
        stats.copies_inserted += seq.len();
        if seq.is_empty() {
            continue;
        }

        let pred_block = cfg.block(pred);
        let last = pred_block.last_inst();
        let join_label = cfg.block(succ).label;
        let terminator = func.insts[last].opcode.clone();
        match terminator {
            Opcode::Jump(_) => inserts.entry(last).or_default().extend(seq),
            Opcode::CondJump(target) if Some(target) == join_label => {
                let loc = func.insts[last].loc;
                let split = func.named_label(format!("edge.{pred}.{succ}"));
                split_blocks.push(Inst::label(split).at(loc));
                split_blocks.extend(seq);
                split_blocks.push(Inst::jump(target).at(loc));
                retarget.push((last, split));
                stats.edges_split += 1;
                // A branch whose fallthrough is the same join needs copies on both paths.
                if pred + 1 == succ {
                    let again = sequentialize(func, copies);
                    stats.copies_inserted += again.len();
                    inserts.entry(pred_block.range.end).or_default().extend(again);
                }
            }
            _ => inserts.entry(pred_block.range.end).or_default().extend(seq),
        }
    }

    for (idx, split) in retarget {
        func.insts[idx].opcode = Opcode::CondJump(split);
    }

    let old = std::mem::take(&mut func.insts);
    let len = old.len();
    let mut insts = Vec::with_capacity(len + split_blocks.len());
    for (idx, inst) in old.into_iter().enumerate() {
        if let Some(copies) = inserts.remove(&idx) {
            insts.extend(copies);
        }
        if phi_insts.binary_search(&idx).is_err() {
            insts.push(inst);
        }
    }
    if let Some(copies) = inserts.remove(&len) {
        insts.extend(copies);
    }
    insts.extend(split_blocks);
    func.insts = insts;

    stats.phis_removed = phi_insts.len();
    log::debug!(
        "lowered {} joins in `{}`: {} copies, {} split edges",
        stats.phis_removed,
        func.name,
        stats.copies_inserted,
        stats.edges_split
    );
    Ok(stats)
}

/// Turn one edge's parallel copy into moves.
fn sequentialize(func: &mut Function, copies: &[EdgeCopy]) -> Vec<Inst> {
    let live: Vec<&EdgeCopy> = copies.iter().filter(|c| c.dst != c.src).collect();
    match live.as_slice() {
        [] => Vec::new(),
        [single] => vec![Inst::mov(single.dst, single.src)
            .with_type(single.ty)
            .at(single.loc)],
        many => {
            let temps: Vec<VReg> = many.iter().map(|_| func.new_vreg()).collect();
            let mut seq = Vec::with_capacity(many.len() * 2);
            for (copy, &t) in many.iter().zip(&temps) {
                seq.push(Inst::mov(t, copy.src).with_type(copy.ty).at(copy.loc));
            }
            for (copy, &t) in many.iter().zip(&temps) {
                seq.push(Inst::mov(copy.dst, t).with_type(copy.ty).at(copy.loc));
            }
            seq
        }
    }
}
