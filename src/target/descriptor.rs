// This module defines the instruction descriptor table: static, read-only metadata for
// every machine instruction a target offers. A descriptor names the IR operation it
// implements and the operand shapes it accepts, together with the register constraint
// of each register operand, immediate predicates, flag effects, clobbered registers, a
// cycle cost and structural properties. Register constraints come in three kinds: Any,
// Fixed (the operand must live in one register) and Through (the operand is routed
// through one register, typically the accumulator, with bridging moves). Fixed
// constraints that every matching variant agrees on become hard allocation constraints;
// everything else is satisfied by the selector with moves. The table indexes candidates
// by (operation, operand shapes) in preference order. Requirements condenses the
// candidates for one IR instruction into what the allocator must know: hard register
// requirements, registers written before the sources are read, and registers written
// while producing the result.

//! Instruction descriptors and the operation-shape index.

use crate::core::ir::{CondCode, Inst, OpKind, Opcode, Operand, OperandKind};
use crate::core::register_file::{PhysReg, RegSet};
use bitflags::bitflags;
use hashbrown::HashMap;
use strum::Display;

bitflags! {
    /// Condition flags of the 8-bit core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        const ZERO = 0x01;
        const CARRY = 0x02;
        const SIGN = 0x04;
        const OVERFLOW = 0x08;
    }
}

bitflags! {
    /// Structural properties of a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescProps: u8 {
        /// Takes an immediate operand.
        const IMMEDIATE = 0x01;
        /// Accesses memory.
        const MEMORY = 0x02;
        /// Transfers control.
        const CONTROL_FLOW = 0x04;
        /// Plain register-to-register copy.
        const REG_MOVE = 0x08;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Move,
    Load,
    Store,
    Arithmetic,
    Logic,
    Shift,
    Compare,
    Branch,
    Call,
    Return,
}

/// Register requirement of one register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegConstraint {
    Any,
    /// Operand must live in this register.
    Fixed(PhysReg),
    /// Operand is routed through this register; bridged with moves.
    Through(PhysReg),
}

impl RegConstraint {
    pub fn reg(self) -> Option<PhysReg> {
        match self {
            RegConstraint::Any => None,
            RegConstraint::Fixed(r) | RegConstraint::Through(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmPredicate {
    /// Fits in one byte, signed or unsigned.
    Byte,
    Equals(i32),
}

impl ImmPredicate {
    pub fn accepts(self, value: i32) -> bool {
        match self {
            ImmPredicate::Byte => (-128..=255).contains(&value),
            ImmPredicate::Equals(n) => value == n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSpec {
    Reg(RegConstraint),
    Imm(ImmPredicate),
    Mem,
}

impl OperandSpec {
    pub fn kind(self) -> OperandKind {
        match self {
            OperandSpec::Reg(_) => OperandKind::Reg,
            OperandSpec::Imm(_) => OperandKind::Imm,
            OperandSpec::Mem => OperandKind::Mem,
        }
    }

    pub fn constraint(self) -> Option<RegConstraint> {
        match self {
            OperandSpec::Reg(c) => Some(c),
            _ => None,
        }
    }
}

/// Static description of one machine instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    pub encoding: u8,
    /// Encoded size in bytes.
    pub size: u8,
    pub category: Category,
    pub op: OpKind,
    pub dst: Option<RegConstraint>,
    pub srcs: Vec<OperandSpec>,
    pub flags_read: Flags,
    pub flags_written: Flags,
    pub clobbers: RegSet,
    pub cycles: u32,
    pub props: DescProps,
}

impl InstrDesc {
    pub fn new(mnemonic: &'static str, encoding: u8, op: OpKind, category: Category) -> Self {
        let props = match category {
            Category::Branch | Category::Call | Category::Return => DescProps::CONTROL_FLOW,
            _ => DescProps::empty(),
        };
        let size = match category {
            Category::Branch | Category::Call => 3,
            _ => 1,
        };
        Self {
            mnemonic,
            encoding,
            size,
            category,
            op,
            dst: None,
            srcs: Vec::new(),
            flags_read: Flags::empty(),
            flags_written: Flags::empty(),
            clobbers: RegSet::new(),
            cycles: 1,
            props,
        }
    }

    pub fn dst(mut self, constraint: RegConstraint) -> Self {
        self.dst = Some(constraint);
        self
    }

    pub fn src(mut self, spec: OperandSpec) -> Self {
        match spec {
            OperandSpec::Imm(_) => {
                self.props |= DescProps::IMMEDIATE;
                self.size = self.size.max(2);
            }
            OperandSpec::Mem => {
                self.props |= DescProps::MEMORY;
                self.size = 3;
            }
            OperandSpec::Reg(_) => {}
        }
        self.srcs.push(spec);
        self
    }

    pub fn reads(mut self, flags: Flags) -> Self {
        self.flags_read |= flags;
        self
    }

    pub fn writes(mut self, flags: Flags) -> Self {
        self.flags_written |= flags;
        self
    }

    pub fn clobbers(mut self, regs: RegSet) -> Self {
        self.clobbers = regs;
        self
    }

    pub fn cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn reg_move(mut self) -> Self {
        self.props |= DescProps::REG_MOVE;
        self
    }

    pub fn shape(&self) -> Vec<OperandKind> {
        self.srcs.iter().map(|s| s.kind()).collect()
    }

    /// Whether the immediates of `operands` satisfy this descriptor's predicates.
    pub fn accepts(&self, operands: &[Operand]) -> bool {
        self.srcs.len() == operands.len()
            && self.srcs.iter().zip(operands).all(|(spec, op)| match (spec, op) {
                (OperandSpec::Imm(pred), Operand::Imm(v)) => pred.accepts(*v),
                (spec, op) => spec.kind() == op.kind(),
            })
    }
}

/// Index of a descriptor in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescId(pub u16);

type ShapeKey = (OpKind, Vec<OperandKind>);

/// Descriptors indexed by operation and operand shape.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    descs: Vec<InstrDesc>,
    by_shape: HashMap<ShapeKey, Vec<DescId>>,
    reg_move: Option<DescId>,
}

impl DescriptorTable {
    /// Build the index. Candidates keep the order of `descs`.
    pub fn new(descs: Vec<InstrDesc>) -> Self {
        let mut by_shape: HashMap<ShapeKey, Vec<DescId>> = HashMap::new();
        let mut reg_move = None;
        for (i, desc) in descs.iter().enumerate() {
            let id = DescId(i as u16);
            by_shape.entry((desc.op, desc.shape())).or_default().push(id);
            if reg_move.is_none() && desc.props.contains(DescProps::REG_MOVE) {
                reg_move = Some(id);
            }
        }
        Self {
            descs,
            by_shape,
            reg_move,
        }
    }

    pub fn get(&self, id: DescId) -> &InstrDesc {
        &self.descs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescId, &InstrDesc)> {
        self.descs
            .iter()
            .enumerate()
            .map(|(i, d)| (DescId(i as u16), d))
    }

    /// Candidates for an operation shape, in preference order.
    pub fn lookup(&self, op: OpKind, shape: &[OperandKind]) -> &[DescId] {
        self.by_shape
            .get(&(op, shape.to_vec()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First candidate for a fixed-shape operation such as a jump or call.
    pub fn first(&self, op: OpKind, shape: &[OperandKind]) -> Option<DescId> {
        self.lookup(op, shape).first().copied()
    }

    /// Descriptor used for bridging register copies.
    pub fn reg_move(&self) -> Option<DescId> {
        self.reg_move
    }
}

/// Operand order (and condition) of one way to match an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// `order[j]` is the IR operand position feeding descriptor source `j`.
    pub order: Vec<usize>,
    pub cond: Option<CondCode>,
}

impl Variant {
    pub fn operands(&self, inst: &Inst) -> Vec<Operand> {
        self.order.iter().map(|&p| inst.operands[p]).collect()
    }

    pub fn is_swapped(&self) -> bool {
        self.order.iter().enumerate().any(|(j, &p)| j != p)
    }
}

/// Identity order first, then the swapped order for commutative operations
/// and comparisons.
pub fn variants(inst: &Inst) -> Vec<Variant> {
    let identity: Vec<usize> = (0..inst.operands.len()).collect();
    match &inst.opcode {
        Opcode::Binary(op) if op.is_commutative() && inst.operands.len() == 2 => vec![
            Variant { order: identity, cond: None },
            Variant { order: vec![1, 0], cond: None },
        ],
        Opcode::Compare(cc) if inst.operands.len() == 2 => vec![
            Variant { order: identity, cond: Some(*cc) },
            Variant { order: vec![1, 0], cond: Some(cc.swapped()) },
        ],
        _ => vec![Variant { order: identity, cond: None }],
    }
}

/// A matching (variant, descriptor) pair for an instruction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub variant: Variant,
    pub desc: DescId,
}

/// Every descriptor that can implement `inst`, over all operand orders.
pub fn candidates(table: &DescriptorTable, inst: &Inst) -> Vec<Candidate> {
    let mut out = Vec::new();
    for variant in variants(inst) {
        let operands = variant.operands(inst);
        let shape: Vec<OperandKind> = operands.iter().map(Operand::kind).collect();
        for &id in table.lookup(inst.opcode.kind(), &shape) {
            if table.get(id).accepts(&operands) {
                out.push(Candidate {
                    variant: variant.clone(),
                    desc: id,
                });
            }
        }
    }
    out
}

/// Register requirements of one IR instruction, condensed over its candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    /// Register the result must be allocated to.
    pub result: Option<PhysReg>,
    /// Register each operand must be allocated to, by IR operand position.
    pub operands: Vec<Option<PhysReg>>,
    /// Registers written before the sources are read (routing moves).
    pub early_clobbers: RegSet,
    /// Registers written by the instruction besides its result.
    pub late_clobbers: RegSet,
    /// Registers each operand may be routed through, by IR operand position.
    pub routed: Vec<RegSet>,
}

impl Requirements {
    pub fn none(operand_count: usize) -> Self {
        Self {
            operands: vec![None; operand_count],
            routed: vec![RegSet::new(); operand_count],
            ..Self::default()
        }
    }

    /// Condense the constraints of generic candidates.
    pub fn from_candidates(table: &DescriptorTable, inst: &Inst, cands: &[Candidate]) -> Self {
        let n = inst.operands.len();
        let mut req = Self::none(n);
        if cands.is_empty() {
            return req;
        }

        let fixed_of = |c: Option<RegConstraint>| match c {
            Some(RegConstraint::Fixed(r)) => Some(r),
            _ => None,
        };
        let src_constraint = |cand: &Candidate, pos: usize| {
            cand.variant
                .order
                .iter()
                .position(|&p| p == pos)
                .and_then(|j| table.get(cand.desc).srcs[j].constraint())
        };

        let first_dst = fixed_of(table.get(cands[0].desc).dst);
        if inst.result.is_some()
            && cands.iter().all(|c| fixed_of(table.get(c.desc).dst) == first_dst)
        {
            req.result = first_dst;
        }
        for pos in 0..n {
            let first = fixed_of(src_constraint(&cands[0], pos));
            if cands.iter().all(|c| fixed_of(src_constraint(c, pos)) == first) {
                req.operands[pos] = first;
            }
            for cand in cands {
                if let Some(r) = src_constraint(cand, pos).and_then(RegConstraint::reg) {
                    req.routed[pos].insert(r);
                }
            }
        }

        let mut early = RegSet::first(crate::core::register_file::MAX_REGISTERS);
        let mut late = early;
        for cand in cands {
            let desc = table.get(cand.desc);
            let mut e = RegSet::new();
            for (j, &pos) in cand.variant.order.iter().enumerate() {
                if let Some(r) = desc.srcs[j].constraint().and_then(RegConstraint::reg) {
                    if req.operands[pos] != Some(r) {
                        e.insert(r);
                    }
                }
            }
            let mut l = desc.clobbers;
            if let Some(r) = desc.dst.and_then(RegConstraint::reg) {
                if req.result != Some(r) {
                    l.insert(r);
                }
            }
            early = early.intersect(e);
            late = late.intersect(l);
        }
        req.early_clobbers = early;
        req.late_clobbers = late;
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ir::{BinOp, Function};

    const ACC: PhysReg = PhysReg(0);
    const AUX: PhysReg = PhysReg(1);

    fn table() -> DescriptorTable {
        DescriptorTable::new(vec![
            InstrDesc::new("MOV", 0x40, OpKind::Move, Category::Move)
                .dst(RegConstraint::Any)
                .src(OperandSpec::Reg(RegConstraint::Any))
                .cycles(5)
                .reg_move(),
            InstrDesc::new("ADD", 0x80, OpKind::Binary(BinOp::Add), Category::Arithmetic)
                .dst(RegConstraint::Through(ACC))
                .src(OperandSpec::Reg(RegConstraint::Through(ACC)))
                .src(OperandSpec::Reg(RegConstraint::Any))
                .cycles(4),
            InstrDesc::new("INR", 0x3C, OpKind::Binary(BinOp::Add), Category::Arithmetic)
                .dst(RegConstraint::Through(ACC))
                .src(OperandSpec::Reg(RegConstraint::Through(ACC)))
                .src(OperandSpec::Imm(ImmPredicate::Equals(1)))
                .cycles(4),
            InstrDesc::new("MUL", 0x70, OpKind::Binary(BinOp::Mul), Category::Arithmetic)
                .dst(RegConstraint::Fixed(ACC))
                .src(OperandSpec::Reg(RegConstraint::Fixed(ACC)))
                .src(OperandSpec::Reg(RegConstraint::Fixed(AUX)))
                .cycles(11),
        ])
    }

    #[test]
    fn test_lookup_and_props() {
        let t = table();
        assert_eq!(t.len(), 4);
        assert_eq!(t.reg_move(), Some(DescId(0)));
        let adds = t.lookup(OpKind::Binary(BinOp::Add), &[OperandKind::Reg, OperandKind::Reg]);
        assert_eq!(adds, &[DescId(1)]);
        let inr = t.get(DescId(2));
        assert!(inr.props.contains(DescProps::IMMEDIATE));
        assert_eq!(inr.size, 2);
        assert!(t.lookup(OpKind::Binary(BinOp::Shl), &[OperandKind::Reg]).is_empty());
    }

    #[test]
    fn test_immediate_predicate_filters() {
        let t = table();
        let mut f = Function::new("f");
        let (a, d) = (f.new_vreg(), f.new_vreg());
        let one = Inst::binary(BinOp::Add, d, a.into(), Operand::Imm(1));
        let two = Inst::binary(BinOp::Add, d, a.into(), Operand::Imm(2));
        assert_eq!(candidates(&t, &one).len(), 1);
        assert!(candidates(&t, &two).is_empty());
        // The swapped order `add 1, a` reaches the same descriptor.
        let swapped = Inst::binary(BinOp::Add, d, Operand::Imm(1), a.into());
        let cands = candidates(&t, &swapped);
        assert_eq!(cands.len(), 1);
        assert!(cands[0].variant.is_swapped());
    }

    #[test]
    fn test_accumulator_requirements() {
        let t = table();
        let mut f = Function::new("f");
        let (a, b, d) = (f.new_vreg(), f.new_vreg(), f.new_vreg());
        let add = Inst::binary(BinOp::Add, d, a.into(), b.into());
        let req = Requirements::from_candidates(&t, &add, &candidates(&t, &add));
        assert_eq!(req.result, None);
        assert_eq!(req.operands, vec![None, None]);
        assert_eq!(req.early_clobbers, RegSet::of(&[ACC]));
        assert_eq!(req.late_clobbers, RegSet::of(&[ACC]));
        assert!(req.routed[0].contains(ACC));
        assert!(req.routed[1].contains(ACC));
    }

    #[test]
    fn test_mul_requirements() {
        let t = table();
        let mut f = Function::new("f");
        let (a, b, d) = (f.new_vreg(), f.new_vreg(), f.new_vreg());
        let mul = Inst::binary(BinOp::Mul, d, a.into(), b.into());
        let req = Requirements::from_candidates(&t, &mul, &candidates(&t, &mul));
        // Both operand orders agree on the result register only.
        assert_eq!(req.result, Some(ACC));
        assert_eq!(req.operands, vec![None, None]);
        assert_eq!(req.early_clobbers, RegSet::of(&[ACC, AUX]));
        assert!(req.late_clobbers.is_empty());
    }
}
