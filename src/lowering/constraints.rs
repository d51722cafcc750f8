// This module lowers register constraints that are fixed by the calling convention or by
// the descriptor table into short-lived pre-colored temporaries. Pinning a program
// variable to a register for its whole lifetime over-constrains the allocator (two values
// that both end up as the first call argument at different call sites would have to
// share a register), so instead every constrained use or definition gets its own fresh
// temporary, connected to the variable with a copy. The allocator later coalesces those
// copies away when the surrounding code allows it. Parameters arrive in argument
// registers or incoming stack slots and are copied into their variables at function
// entry; call arguments and returned values are copied into temporaries pinned to the
// argument and return registers; call results and fixed instruction results come out in
// a pinned temporary that is copied to the original destination.

//! Call-boundary and fixed-register lowering.

use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, Inst, MemLoc, OpKind, Operand, OperandKind, VReg};
use crate::core::register_file::PhysReg;
use crate::target::{candidates, variants, ArgLocation, Target};
use std::collections::BTreeMap;

/// Virtual registers that must be allocated to one specific register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precoloring {
    regs: BTreeMap<VReg, PhysReg>,
}

impl Precoloring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vreg: VReg, reg: PhysReg) {
        self.regs.insert(vreg, reg);
    }

    pub fn get(&self, vreg: VReg) -> Option<PhysReg> {
        self.regs.get(&vreg).copied()
    }

    pub fn contains(&self, vreg: VReg) -> bool {
        self.regs.contains_key(&vreg)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VReg, PhysReg)> + '_ {
        self.regs.iter().map(|(&v, &r)| (v, r))
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}

/// Rewrite `func` so that every hard register constraint sits on a pre-colored temporary.
pub fn lower_constraints(func: &mut Function, target: &Target) -> CompileResult<Precoloring> {
    let mut pre = Precoloring::new();
    let old = std::mem::take(&mut func.insts);
    let mut insts = Vec::with_capacity(old.len() + func.params.len() * 2);

    let entry_loc = old.first().map(|i| i.loc).unwrap_or(func.loc);
    for (param, assignment) in func.params.clone().into_iter().zip(target.cc.assign_args(func.params.len())) {
        match assignment.location {
            ArgLocation::Reg(r) => {
                let t = func.new_vreg();
                pre.insert(t, r);
                insts.push(Inst::mov(param, t).at(entry_loc));
            }
            ArgLocation::Stack(k) => insts.push(Inst::load(param, MemLoc::Param(k)).at(entry_loc)),
        }
    }

    for mut inst in old {
        match inst.opcode.kind() {
            OpKind::Call => {
                for assignment in target.cc.assign_args(inst.operands.len()) {
                    let ArgLocation::Reg(r) = assignment.location else {
                        continue;
                    };
                    let arg = &mut inst.operands[assignment.index];
                    if matches!(arg, Operand::Mem(_)) {
                        continue;
                    }
                    let t = func.new_vreg();
                    pre.insert(t, r);
                    insts.push(Inst::mov(t, *arg).with_type(inst.ty).at(inst.loc));
                    *arg = Operand::Reg(t);
                }
                lower_result(func, &mut pre, inst, target.cc.ret_reg, &mut insts);
            }
            OpKind::Return => {
                if let Some(value) = inst.operands.first_mut() {
                    if !matches!(value, Operand::Mem(_)) {
                        let t = func.new_vreg();
                        pre.insert(t, target.cc.ret_reg);
                        insts.push(Inst::mov(t, *value).with_type(inst.ty).at(inst.loc));
                        *value = Operand::Reg(t);
                    }
                }
                insts.push(inst);
            }
            OpKind::Label | OpKind::Jump | OpKind::CondJump | OpKind::Phi => insts.push(inst),
            _ => {
                materialize_immediates(func, target, &mut inst, &mut insts);
                let req = target.requirements(&inst);
                let mut pinned: Vec<(VReg, PhysReg, VReg)> = Vec::new();
                for pos in 0..inst.operands.len() {
                    let (Some(r), Operand::Reg(v)) = (req.operands[pos], inst.operands[pos]) else {
                        continue;
                    };
                    check_reg(func, target, &inst, r)?;
                    if let Some(&(other, _, _)) = pinned.iter().find(|&&(w, s, _)| s == r && w != v) {
                        return Err(CompileError::unallocatable(
                            &func.name,
                            inst.loc,
                            format!(
                                "`{}` and `{}` both require register {}",
                                func.vreg_name(other),
                                func.vreg_name(v),
                                target.regs.name(r)
                            ),
                        ));
                    }
                    if let Some(&(_, s, _)) = pinned.iter().find(|&&(w, s, _)| w == v && s != r) {
                        return Err(CompileError::unallocatable(
                            &func.name,
                            inst.loc,
                            format!(
                                "`{}` is required in both {} and {}",
                                func.vreg_name(v),
                                target.regs.name(s),
                                target.regs.name(r)
                            ),
                        ));
                    }
                    let t = match pinned.iter().find(|&&(w, s, _)| w == v && s == r) {
                        Some(&(_, _, t)) => t,
                        None => {
                            let t = func.new_vreg();
                            pre.insert(t, r);
                            insts.push(Inst::mov(t, v).with_type(inst.ty).at(inst.loc));
                            pinned.push((v, r, t));
                            t
                        }
                    };
                    inst.operands[pos] = Operand::Reg(t);
                }

                match req.result {
                    Some(r) => {
                        check_reg(func, target, &inst, r)?;
                        lower_result(func, &mut pre, inst, r, &mut insts);
                    }
                    None => insts.push(inst),
                }
            }
        }
    }

    func.insts = insts;
    log::debug!("pre-colored {} temporaries in `{}`", pre.len(), func.name);
    Ok(pre)
}

/// Load immediate operands into fresh variables when the target only has a
/// register form of `inst`, as for `mul %x, 3` or `sub 3, %x`.
fn materialize_immediates(func: &mut Function, target: &Target, inst: &mut Inst, out: &mut Vec<Inst>) {
    if !candidates(&target.descs, inst).is_empty() || !inst.operands.iter().any(|o| matches!(o, Operand::Imm(_))) {
        return;
    }
    let kind = inst.opcode.kind();
    let register_form = variants(inst).iter().any(|variant| {
        let shape: Vec<OperandKind> = variant
            .operands(inst)
            .iter()
            .map(|o| match o {
                Operand::Imm(_) => OperandKind::Reg,
                o => o.kind(),
            })
            .collect();
        !target.descs.lookup(kind, &shape).is_empty()
    });
    if !register_form {
        return;
    }
    for operand in &mut inst.operands {
        if let Operand::Imm(n) = *operand {
            let t = func.new_vreg();
            out.push(Inst::mov_imm(t, n).with_type(inst.ty).at(inst.loc));
            *operand = Operand::Reg(t);
        }
    }
    log::trace!("materialized immediates of `{}` in `{}`", inst.opcode.kind(), func.name);
}

/// Emit `inst` with its result redirected through a temporary pinned to `reg`.
fn lower_result(func: &mut Function, pre: &mut Precoloring, mut inst: Inst, reg: PhysReg, out: &mut Vec<Inst>) {
    match inst.result {
        Some(dst) => {
            let t = func.new_vreg();
            pre.insert(t, reg);
            inst.result = Some(t);
            let (ty, loc) = (inst.ty, inst.loc);
            out.push(inst);
            out.push(Inst::mov(dst, t).with_type(ty).at(loc));
        }
        None => out.push(inst),
    }
}

fn check_reg(func: &Function, target: &Target, inst: &Inst, reg: PhysReg) -> CompileResult<()> {
    if target.regs.all().contains(reg) {
        Ok(())
    } else {
        Err(CompileError::unallocatable(
            &func.name,
            inst.loc,
            format!("register r{} is not part of the {} register file", reg.0, target.name),
        ))
    }
}
