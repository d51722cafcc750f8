// This module implements the instruction selector. It walks the allocated IR block by
// block and maps every instruction onto descriptors of the target's table. Matching is a
// data lookup: the operation kind and the operand shapes (register, immediate, memory) of
// each operand order the instruction allows select the candidate descriptors, and the
// immediate predicates filter them. Every candidate is then checked against the
// register assignment. A register operand whose constraint names a different register
// needs a bridging copy before the instruction, a result produced in a different
// register needs one after it, and a candidate is rejected when those copies or its
// clobbers would destroy a value that is still live. Candidates whose constraints the
// assignment already satisfies win; otherwise the cheapest candidate counting the
// copies is taken. Calls, returns and jumps have fixed sequences driven by the calling
// convention. Register arguments are placed with a parallel-copy sequencer that breaks
// cycles through a free caller-saved register.

//! Descriptor-driven instruction selection.

pub mod machine;
pub mod peephole;

pub use machine::{MOperand, MachineInst, MachineOp, Printer, MAX_SOURCES};
pub use peephole::peephole;

use crate::analysis::{Cfg, Liveness, VRegSet};
use crate::core::error::{CompileError, CompileResult};
use crate::core::ir::{Function, Inst, Location, MemLoc, OpKind, Opcode, Operand, OperandKind, SymbolId, Type, VReg};
use crate::core::register_file::{PhysReg, RegSet};
use crate::regalloc::Assignment;
use crate::target::{variants, ArgLocation, DescId, InstrDesc, OperandSpec, RegConstraint, Target, Variant};

/// Selected code of one function.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub code: Vec<MachineInst>,
    /// Copies added to satisfy descriptor constraints or the calling convention.
    pub bridging_moves: usize,
}

/// Operation to match, with operands already resolved to machine operands.
struct Request {
    kind: OpKind,
    dst: Option<PhysReg>,
    srcs: Vec<MOperand>,
    variants: Vec<Variant>,
    ty: Type,
    loc: Location,
}

impl Request {
    /// Request with the operands in their given order only.
    fn simple(kind: OpKind, dst: Option<PhysReg>, srcs: Vec<MOperand>, ty: Type, loc: Location) -> Self {
        let order = (0..srcs.len()).collect();
        Self {
            kind,
            dst,
            srcs,
            variants: vec![Variant { order, cond: None }],
            ty,
            loc,
        }
    }
}

/// A candidate that fits the register assignment.
struct Plan {
    desc: DescId,
    variant: usize,
    /// Copies before the instruction, `(to, from)`, already ordered.
    pre: Vec<(PhysReg, PhysReg)>,
    /// Copy of the result out of the descriptor's result register.
    post: Option<(PhysReg, PhysReg)>,
    cost: u32,
}

impl Plan {
    fn moves(&self) -> usize {
        self.pre.len() + usize::from(self.post.is_some())
    }

    fn better_than(&self, other: &Plan) -> bool {
        (self.moves() != 0, self.cost) < (other.moves() != 0, other.cost)
    }
}

/// Selects machine instructions for one allocated function.
pub struct InstructionSelector<'a> {
    target: &'a Target,
    func: &'a Function,
    assignment: &'a Assignment,
    code: Vec<MachineInst>,
    bridging_moves: usize,
}

impl<'a> InstructionSelector<'a> {
    pub fn new(target: &'a Target, func: &'a Function, assignment: &'a Assignment) -> Self {
        Self {
            target,
            func,
            assignment,
            code: Vec::with_capacity(func.insts.len() * 2),
            bridging_moves: 0,
        }
    }

    /// Select code for every block of `cfg`, using `liveness` to know which
    /// registers must survive each instruction.
    pub fn select(mut self, cfg: &Cfg, liveness: &Liveness) -> CompileResult<Selection> {
        let func = self.func;
        for block in cfg.blocks() {
            let live_after = liveness.block_live_after(func, cfg, block.index);
            for (inst, live) in block.insts(func).iter().zip(&live_after) {
                let busy = self.busy_regs(inst, live)?;
                self.select_inst(inst, busy)?;
            }
        }
        log::debug!(
            "selected {} machine instructions for `{}` ({} bridging moves)",
            self.code.len(),
            func.name,
            self.bridging_moves
        );
        Ok(Selection {
            code: self.code,
            bridging_moves: self.bridging_moves,
        })
    }

    /// Registers holding values live after `inst`, its own result excluded.
    fn busy_regs(&self, inst: &Inst, live: &VRegSet) -> CompileResult<RegSet> {
        let mut busy = RegSet::new();
        for &v in live {
            if inst.def() != Some(v) {
                busy.insert(self.reg(v, inst.loc)?);
            }
        }
        Ok(busy)
    }

    fn reg(&self, v: VReg, loc: Location) -> CompileResult<PhysReg> {
        self.assignment.reg(v).ok_or_else(|| {
            CompileError::unallocatable(
                &self.func.name,
                loc,
                format!("`{}` has no register at instruction selection", self.func.vreg_name(v)),
            )
        })
    }

    fn operand(&self, op: &Operand, loc: Location) -> CompileResult<MOperand> {
        Ok(match *op {
            Operand::Reg(v) => MOperand::Reg(self.reg(v, loc)?),
            Operand::Imm(value) => MOperand::Imm(value),
            Operand::Mem(mem) => MOperand::Mem(mem),
        })
    }

    fn no_match(&self, shape: String, loc: Location) -> CompileError {
        CompileError::NoMatchingInstruction {
            function: self.func.name.clone(),
            shape,
            loc,
        }
    }

    fn select_inst(&mut self, inst: &Inst, busy: RegSet) -> CompileResult<()> {
        match &inst.opcode {
            Opcode::Label(l) => {
                self.code.push(MachineInst::Label(*l));
                Ok(())
            }
            Opcode::Phi(_) => Err(CompileError::malformed(
                &self.func.name,
                inst.loc,
                "join reached instruction selection",
            )),
            Opcode::Jump(l) => {
                let desc = self.fixed_desc(OpKind::Jump, inst.loc)?;
                self.emit(MachineOp::new(desc, inst.loc).with_src(MOperand::Label(*l)));
                Ok(())
            }
            Opcode::CondJump(l) => {
                let req = self.request(inst)?;
                self.select_request(&req, busy, Some(MOperand::Label(*l)))
            }
            Opcode::Call(callee) => self.select_call(inst, *callee, busy),
            Opcode::Return => self.select_return(inst),
            _ => {
                let req = self.request(inst)?;
                self.select_request(&req, busy, None)
            }
        }
    }

    fn request(&self, inst: &Inst) -> CompileResult<Request> {
        let srcs = inst
            .operands
            .iter()
            .map(|op| self.operand(op, inst.loc))
            .collect::<CompileResult<Vec<_>>>()?;
        let dst = inst.result.map(|d| self.reg(d, inst.loc)).transpose()?;
        Ok(Request {
            kind: inst.opcode.kind(),
            dst,
            srcs,
            variants: variants(inst),
            ty: inst.ty,
            loc: inst.loc,
        })
    }

    fn select_request(&mut self, req: &Request, busy: RegSet, extra: Option<MOperand>) -> CompileResult<()> {
        let target = self.target;
        let mut best: Option<Plan> = None;
        let mut matched = false;

        for (vi, variant) in req.variants.iter().enumerate() {
            let srcs: Vec<MOperand> = variant.order.iter().map(|&p| req.srcs[p]).collect();
            let Some(shape) = shape_of(&srcs) else {
                continue;
            };
            for &id in target.descs.lookup(req.kind, &shape) {
                let desc = target.descs.get(id);
                if !fits(desc, req.dst, &srcs) {
                    continue;
                }
                matched = true;
                match self.plan(id, desc, vi, &srcs, req.dst, busy) {
                    Some(plan) => {
                        log::trace!("{} fits with {} moves, cost {}", desc.mnemonic, plan.moves(), plan.cost);
                        if best.as_ref().map_or(true, |b| plan.better_than(b)) {
                            best = Some(plan);
                        }
                    }
                    None => log::trace!("{} does not fit the assignment", desc.mnemonic),
                }
            }
        }

        match best {
            Some(plan) => self.emit_plan(req, &plan, extra),
            None if matched => Err(CompileError::unallocatable(
                &self.func.name,
                req.loc,
                format!("no form of `{}` fits the register assignment", shape_text(req.kind, &req.srcs)),
            )),
            None => Err(self.no_match(shape_text(req.kind, &req.srcs), req.loc)),
        }
    }

    /// Check one candidate against the assignment.
    fn plan(
        &self,
        id: DescId,
        desc: &InstrDesc,
        variant: usize,
        srcs: &[MOperand],
        dst: Option<PhysReg>,
        busy: RegSet,
    ) -> Option<Plan> {
        let mut wanted: Vec<(PhysReg, PhysReg)> = Vec::new();
        let mut in_place = RegSet::new();
        for (spec, src) in desc.srcs.iter().zip(srcs) {
            let MOperand::Reg(r) = *src else {
                continue;
            };
            match spec.constraint().and_then(RegConstraint::reg) {
                Some(c) if c != r => wanted.push((c, r)),
                _ => in_place.insert(r),
            }
        }
        wanted.sort();
        wanted.dedup();
        // One register cannot receive two values.
        if wanted.windows(2).any(|w| w[0].0 == w[1].0) {
            return None;
        }
        if wanted.iter().any(|&(c, _)| busy.contains(c) || in_place.contains(c)) {
            return None;
        }
        let pre = sequence_moves(&wanted, None)?;

        let mut post = None;
        if let (Some(d), Some(c)) = (dst, desc.dst.and_then(RegConstraint::reg)) {
            if c != d {
                if busy.contains(c) {
                    return None;
                }
                post = Some((d, c));
            }
        }
        if !desc.clobbers.intersect(busy).is_empty() {
            return None;
        }

        let moves = pre.len() + usize::from(post.is_some());
        let move_cycles = match self.target.descs.reg_move() {
            Some(mov) => self.target.descs.get(mov).cycles,
            None if moves > 0 => return None,
            None => 0,
        };
        Some(Plan {
            desc: id,
            variant,
            pre,
            post,
            cost: desc.cycles + moves as u32 * move_cycles,
        })
    }

    fn emit_plan(&mut self, req: &Request, plan: &Plan, extra: Option<MOperand>) -> CompileResult<()> {
        let target = self.target;
        let desc = target.descs.get(plan.desc);
        let variant = &req.variants[plan.variant];

        for &(to, from) in &plan.pre {
            self.emit_move(to, from, req.loc)?;
        }

        let mut op = MachineOp::new(plan.desc, req.loc)
            .with_cond(variant.cond)
            .with_type(req.ty);
        if let Some(constraint) = desc.dst {
            if let Some(r) = constraint.reg().or(req.dst) {
                op = op.with_dst(r);
            }
        }
        for (spec, &p) in desc.srcs.iter().zip(&variant.order) {
            let src = match (spec.constraint().and_then(RegConstraint::reg), req.srcs[p]) {
                (Some(c), MOperand::Reg(_)) => MOperand::Reg(c),
                (_, src) => src,
            };
            op = op.with_src(src);
        }
        if let Some(extra) = extra {
            op = op.with_src(extra);
        }
        self.emit(op);

        if let Some((to, from)) = plan.post {
            self.emit_move(to, from, req.loc)?;
        }
        Ok(())
    }

    fn select_call(&mut self, inst: &Inst, callee: SymbolId, busy_after: RegSet) -> CompileResult<()> {
        let target = self.target;
        let loc = inst.loc;
        let args = inst
            .operands
            .iter()
            .map(|op| self.operand(op, loc))
            .collect::<CompileResult<Vec<_>>>()?;

        let mut preserve = busy_after;
        for r in args.iter().filter_map(|a| a.as_reg()) {
            preserve.insert(r);
        }

        // Stack arguments first, while every source is still in place.
        let mut reg_moves = Vec::new();
        let mut reg_loads = Vec::new();
        let mut dests = RegSet::new();
        for assignment in target.cc.assign_args(args.len()) {
            let arg = args[assignment.index];
            match (assignment.location, arg) {
                (ArgLocation::Stack(k), _) => self.store_out_arg(k, arg, preserve, inst.ty, loc)?,
                (ArgLocation::Reg(r), MOperand::Reg(from)) => {
                    dests.insert(r);
                    reg_moves.push((r, from));
                }
                (ArgLocation::Reg(r), _) => {
                    dests.insert(r);
                    reg_loads.push((r, arg));
                }
            }
        }

        let scratch = target
            .cc
            .caller_saved
            .intersect(target.regs.all())
            .difference(preserve.union(dests))
            .first_reg();
        let ordered = sequence_moves(&reg_moves, scratch).ok_or_else(|| {
            CompileError::unallocatable(&self.func.name, loc, "no scratch register to order call arguments")
        })?;
        for (to, from) in ordered {
            self.emit_move(to, from, loc)?;
        }
        for (to, src) in reg_loads {
            let kind = match src {
                MOperand::Mem(_) => OpKind::Load,
                _ => OpKind::Move,
            };
            let mut busy = preserve.union(dests);
            busy.remove(to);
            self.select_request(&Request::simple(kind, Some(to), vec![src], inst.ty, loc), busy, None)?;
        }

        let call = target
            .descs
            .first(OpKind::Call, &[])
            .ok_or_else(|| self.no_match("call".to_string(), loc))?;
        self.emit(
            MachineOp::new(call, loc)
                .with_src(MOperand::Symbol(callee))
                .with_type(inst.ty),
        );

        if let Some(d) = inst.result {
            let r = self.reg(d, loc)?;
            if r != target.cc.ret_reg {
                self.emit_move(r, target.cc.ret_reg, loc)?;
            }
        }
        Ok(())
    }

    fn store_out_arg(&mut self, slot: u8, arg: MOperand, preserve: RegSet, ty: Type, loc: Location) -> CompileResult<()> {
        let target = self.target;
        let value = match arg {
            MOperand::Mem(_) => {
                let scratch = target
                    .cc
                    .caller_saved
                    .intersect(target.regs.all())
                    .difference(preserve)
                    .first_reg()
                    .ok_or_else(|| {
                        CompileError::unallocatable(&self.func.name, loc, "no scratch register for a stack argument")
                    })?;
                self.select_request(&Request::simple(OpKind::Load, Some(scratch), vec![arg], ty, loc), preserve, None)?;
                MOperand::Reg(scratch)
            }
            other => other,
        };
        let mem = MOperand::Mem(MemLoc::OutArg(slot));
        self.select_request(&Request::simple(OpKind::Store, None, vec![mem, value], ty, loc), preserve, None)
    }

    fn select_return(&mut self, inst: &Inst) -> CompileResult<()> {
        let ret = self.target.cc.ret_reg;
        if let Some(op) = inst.operands.first() {
            match self.operand(op, inst.loc)? {
                MOperand::Reg(r) => {
                    if r != ret {
                        self.emit_move(ret, r, inst.loc)?;
                    }
                }
                src => {
                    let kind = match src {
                        MOperand::Mem(_) => OpKind::Load,
                        _ => OpKind::Move,
                    };
                    let req = Request::simple(kind, Some(ret), vec![src], inst.ty, inst.loc);
                    self.select_request(&req, RegSet::new(), None)?;
                }
            }
        }
        let desc = self.fixed_desc(OpKind::Return, inst.loc)?;
        self.emit(MachineOp::new(desc, inst.loc));
        Ok(())
    }

    fn fixed_desc(&self, kind: OpKind, loc: Location) -> CompileResult<DescId> {
        self.target
            .descs
            .first(kind, &[])
            .ok_or_else(|| self.no_match(kind.to_string(), loc))
    }

    fn emit(&mut self, op: MachineOp) {
        self.code.push(MachineInst::Op(op));
    }

    fn emit_move(&mut self, to: PhysReg, from: PhysReg, loc: Location) -> CompileResult<()> {
        let mov = self
            .target
            .descs
            .reg_move()
            .ok_or_else(|| self.no_match("move reg, reg".to_string(), loc))?;
        self.emit(MachineOp::new(mov, loc).with_dst(to).with_src(MOperand::Reg(from)));
        self.bridging_moves += 1;
        Ok(())
    }
}

/// Select code for `func` with the result of register allocation.
pub fn select_function(
    target: &Target,
    func: &Function,
    assignment: &Assignment,
    cfg: &Cfg,
    liveness: &Liveness,
) -> CompileResult<Selection> {
    InstructionSelector::new(target, func, assignment).select(cfg, liveness)
}

fn shape_of(srcs: &[MOperand]) -> Option<Vec<OperandKind>> {
    srcs.iter()
        .map(|s| match s {
            MOperand::Reg(_) => Some(OperandKind::Reg),
            MOperand::Imm(_) => Some(OperandKind::Imm),
            MOperand::Mem(_) => Some(OperandKind::Mem),
            MOperand::Label(_) | MOperand::Symbol(_) => None,
        })
        .collect()
}

/// Whether `desc` accepts the result and operand values.
fn fits(desc: &InstrDesc, dst: Option<PhysReg>, srcs: &[MOperand]) -> bool {
    desc.dst.is_some() == dst.is_some()
        && desc.srcs.len() == srcs.len()
        && desc.srcs.iter().zip(srcs).all(|(spec, src)| match (spec, src) {
            (OperandSpec::Imm(pred), MOperand::Imm(v)) => pred.accepts(*v),
            (OperandSpec::Reg(_), MOperand::Reg(_)) | (OperandSpec::Mem, MOperand::Mem(_)) => true,
            _ => false,
        })
}

/// Printable form of an operation shape, such as `shl reg, reg`.
fn shape_text(kind: OpKind, srcs: &[MOperand]) -> String {
    let name = match kind {
        OpKind::Binary(op) => op.to_string(),
        OpKind::Compare => "cmp".to_string(),
        other => other.to_string(),
    };
    let shape: Vec<String> = shape_of(srcs)
        .unwrap_or_default()
        .iter()
        .map(ToString::to_string)
        .collect();
    if shape.is_empty() {
        name
    } else {
        format!("{name} {}", shape.join(", "))
    }
}

/// Order the register copies `(to, from)` so no source is overwritten before
/// it is read. Cycles go through `scratch`; without one they fail.
pub fn sequence_moves(moves: &[(PhysReg, PhysReg)], scratch: Option<PhysReg>) -> Option<Vec<(PhysReg, PhysReg)>> {
    let mut pending: Vec<(PhysReg, PhysReg)> = moves.iter().copied().filter(|(to, from)| to != from).collect();
    let mut out = Vec::with_capacity(pending.len() + 1);
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|&(to, _)| !pending.iter().any(|&(_, from)| from == to));
        match ready {
            Some(i) => out.push(pending.remove(i)),
            None => {
                // Only cycles are left: park one destination's value in the scratch register.
                let scratch = scratch?;
                let (to, _) = pending[0];
                out.push((scratch, to));
                for m in &mut pending {
                    if m.1 == to {
                        m.1 = scratch;
                    }
                }
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch8::{a8, A, B, C, D, H};
    use crate::core::ir::{BinOp, CondCode, Inst};
    use crate::core::test_utils::test::named_values;
    use crate::regalloc::Placement;

    fn select(f: &Function, assignment: &Assignment) -> CompileResult<Selection> {
        let cfg = Cfg::build(f, 0).unwrap();
        let liveness = Liveness::compute(f, &cfg);
        select_function(a8(), f, assignment, &cfg, &liveness)
    }

    fn assign(pairs: &[(VReg, PhysReg)]) -> Assignment {
        let mut assignment = Assignment::new();
        for &(v, r) in pairs {
            assignment.insert(v, Placement::Reg(r));
        }
        assignment
    }

    fn text(f: &Function, code: &[MachineInst]) -> Vec<String> {
        let p = Printer::new(a8()).with_function(f);
        code.iter().map(|i| p.inst(i)).collect()
    }

    #[test]
    fn test_satisfied_assignment_needs_no_moves() {
        let mut f = Function::new("f");
        let (x, y, d) = (f.named_vreg("x"), f.named_vreg("y"), f.named_vreg("d"));
        f.push(Inst::binary(BinOp::Mul, d, x.into(), y.into()));
        f.push(Inst::store(MemLoc::Local(0), d.into()));
        f.push(Inst::ret(None));

        let sel = select(&f, &assign(&[(x, A), (y, B), (d, A)])).unwrap();
        assert_eq!(sel.bridging_moves, 0);
        assert_eq!(text(&f, &sel.code), vec!["MUL", "STA [local 0]", "RET"]);

        // Swapped operands reach the same form through commutativity.
        let sel = select(&f, &assign(&[(x, B), (y, A), (d, A)])).unwrap();
        assert_eq!(sel.bridging_moves, 0);
    }

    #[test]
    fn test_fixed_operands_are_bridged() {
        let mut f = Function::new("f");
        let (x, y, d) = (f.named_vreg("x"), f.named_vreg("y"), f.named_vreg("d"));
        f.push(Inst::binary(BinOp::Mul, d, x.into(), y.into()));
        f.push(Inst::store(MemLoc::Local(0), d.into()));
        f.push(Inst::ret(None));

        let sel = select(&f, &assign(&[(x, C), (y, D), (d, A)])).unwrap();
        assert_eq!(sel.bridging_moves, 2);
        assert_eq!(
            text(&f, &sel.code),
            vec!["MOV A, C", "MOV B, D", "MUL", "STA [local 0]", "RET"]
        );
    }

    #[test]
    fn test_compare_routes_through_accumulator() {
        let mut f = Function::new("f");
        let (x, c) = (f.named_vreg("x"), f.named_vreg("c"));
        f.push(Inst::compare(CondCode::Lt, c, x.into(), Operand::Imm(3)));
        f.push(Inst::store(MemLoc::Local(0), c.into()));
        f.push(Inst::ret(None));

        let sel = select(&f, &assign(&[(x, B), (c, C)])).unwrap();
        assert_eq!(text(&f, &sel.code), vec!["MOV A, B", "CPI.lt C, 3", "ST [local 0], C", "RET"]);

        // `3 > x` is the same comparison.
        f.insts[0] = Inst::compare(CondCode::Gt, c, Operand::Imm(3), x.into());
        let sel = select(&f, &assign(&[(x, B), (c, C)])).unwrap();
        assert_eq!(text(&f, &sel.code)[1], "CPI.lt C, 3");
    }

    #[test]
    fn test_live_accumulator_is_not_clobbered() {
        let mut f = Function::new("f");
        let (z, x, d) = (f.named_vreg("z"), f.named_vreg("x"), f.named_vreg("d"));
        f.push(Inst::mov_imm(z, 9));
        f.push(Inst::mov_imm(x, 1));
        f.push(Inst::binary(BinOp::Add, d, x.into(), Operand::Imm(1)));
        f.push(Inst::store(MemLoc::Local(0), z.into()));
        f.push(Inst::store(MemLoc::Local(1), d.into()));
        f.push(Inst::ret(None));

        let err = select(&f, &assign(&[(z, A), (x, B), (d, C)])).unwrap_err();
        assert!(matches!(err, CompileError::UnallocatableConstraint { .. }));

        let sel = select(&f, &assign(&[(z, H), (x, B), (d, C)])).unwrap();
        let code = text(&f, &sel.code);
        assert_eq!(&code[2..5], &["MOV A, B", "INR", "MOV C, A"]);
    }

    #[test]
    fn test_missing_descriptor_reports_shape() {
        let mut f = Function::new("f");
        let (a, b, c) = (f.named_vreg("a"), f.named_vreg("b"), f.named_vreg("c"));
        f.push(Inst::binary(BinOp::Shl, c, a.into(), b.into()));
        f.push(Inst::ret(None));

        let err = select(&f, &assign(&[(a, B), (b, C), (c, D)])).unwrap_err();
        match err {
            CompileError::NoMatchingInstruction { function, shape, .. } => {
                assert_eq!(function, "f");
                assert_eq!(shape, "shl reg, reg");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_call_sequence() {
        let mut f = Function::new("f");
        let args = named_values(&mut f, "a", 5);
        let r = f.named_vreg("r");
        f.push(Inst::call(SymbolId(0), Some(r), args.iter().map(|&a| Operand::Reg(a)).collect()));
        f.push(Inst::store(MemLoc::Local(0), r.into()));
        f.push(Inst::ret(None));

        // a0 and a1 sit in each other's argument registers.
        let sel = select(
            &f,
            &assign(&[(args[0], C), (args[1], B), (args[2], D), (args[3], crate::arch8::E), (args[4], H), (r, H)]),
        )
        .unwrap();
        let code = text(&f, &sel.code);
        assert_eq!(code[0], "ST [outarg 0], H");
        assert_eq!(&code[1..4], &["MOV A, B", "MOV B, C", "MOV C, A"]);
        assert_eq!(code[4], "CALL @0");
        assert_eq!(code[5], "MOV H, A");
    }

    #[test]
    fn test_sequence_moves_breaks_cycles() {
        assert_eq!(sequence_moves(&[(A, B), (B, A)], None), None);
        assert_eq!(
            sequence_moves(&[(A, B), (B, A)], Some(C)),
            Some(vec![(C, A), (A, B), (B, C)])
        );
        // Chains are ordered so every source is read before it is overwritten.
        assert_eq!(sequence_moves(&[(B, C), (A, B)], None), Some(vec![(A, B), (B, C)]));
        assert_eq!(sequence_moves(&[(A, A)], None), Some(vec![]));
    }
}
