//! Selected machine instructions.
//!
//! A [`MachineOp`] is a descriptor plus fully resolved operands: physical
//! registers, immediates, memory locations, branch labels and call targets.
//! Operands that a descriptor pins to a register (the accumulator forms) are
//! stored explicitly as well, so later passes can check constraints without
//! re-deriving them; the printer leaves them out, as an assembler would.

use crate::core::ir::{CondCode, Function, Label, Location, MemLoc, SymbolId, SymbolTable, Type};
use crate::core::register_file::PhysReg;
use crate::target::{DescId, DescProps, ImmPredicate, OperandSpec, RegConstraint, Target};
use std::fmt::Write as _;

/// Maximum number of source operands of one machine instruction.
pub const MAX_SOURCES: usize = 3;

/// Resolved machine operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MOperand {
    Reg(PhysReg),
    Imm(i32),
    Mem(MemLoc),
    Label(Label),
    Symbol(SymbolId),
}

impl MOperand {
    pub fn as_reg(self) -> Option<PhysReg> {
        match self {
            MOperand::Reg(r) => Some(r),
            _ => None,
        }
    }
}

/// One machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineOp {
    pub desc: DescId,
    pub dst: Option<PhysReg>,
    pub srcs: [Option<MOperand>; MAX_SOURCES],
    pub cond: Option<CondCode>,
    pub ty: Type,
    pub loc: Location,
}

impl MachineOp {
    pub fn new(desc: DescId, loc: Location) -> Self {
        Self {
            desc,
            dst: None,
            srcs: [None; MAX_SOURCES],
            cond: None,
            ty: Type::default(),
            loc,
        }
    }

    pub fn with_dst(mut self, dst: PhysReg) -> Self {
        self.dst = Some(dst);
        self
    }

    /// Append a source operand. Extra operands past [`MAX_SOURCES`] are dropped.
    pub fn with_src(mut self, src: MOperand) -> Self {
        if let Some(slot) = self.srcs.iter_mut().find(|s| s.is_none()) {
            *slot = Some(src);
        }
        self
    }

    pub fn with_cond(mut self, cond: Option<CondCode>) -> Self {
        self.cond = cond;
        self
    }

    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    pub fn sources(&self) -> impl Iterator<Item = MOperand> + '_ {
        self.srcs.iter().flatten().copied()
    }

    /// `(dst, src)` when this is a register-to-register copy.
    pub fn as_reg_move(&self, target: &Target) -> Option<(PhysReg, PhysReg)> {
        if !target.descs.get(self.desc).props.contains(DescProps::REG_MOVE) {
            return None;
        }
        match (self.dst, self.srcs) {
            (Some(dst), [Some(MOperand::Reg(src)), None, None]) => Some((dst, src)),
            _ => None,
        }
    }
}

/// Entry of a selected instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInst {
    Label(Label),
    Op(MachineOp),
}

impl MachineInst {
    pub fn as_op(&self) -> Option<&MachineOp> {
        match self {
            MachineInst::Op(op) => Some(op),
            MachineInst::Label(_) => None,
        }
    }
}

/// Renders machine code in assembler syntax.
pub struct Printer<'a> {
    target: &'a Target,
    func: Option<&'a Function>,
    symbols: Option<&'a SymbolTable>,
}

impl<'a> Printer<'a> {
    pub fn new(target: &'a Target) -> Self {
        Self {
            target,
            func: None,
            symbols: None,
        }
    }

    /// Use the label names of `func`.
    pub fn with_function(mut self, func: &'a Function) -> Self {
        self.func = Some(func);
        self
    }

    /// Use the symbol names of `symbols`.
    pub fn with_symbols(mut self, symbols: &'a SymbolTable) -> Self {
        self.symbols = Some(symbols);
        self
    }

    fn label(&self, l: Label) -> String {
        match self.func {
            Some(func) => func.label_name(l),
            None => l.to_string(),
        }
    }

    fn symbol(&self, sym: SymbolId) -> String {
        match self.symbols {
            Some(symbols) => format!("@{}", symbols.name(sym)),
            None => format!("@{}", sym.0),
        }
    }

    fn operand(&self, op: MOperand) -> String {
        match op {
            MOperand::Reg(r) => self.target.regs.name(r).to_string(),
            MOperand::Imm(v) => v.to_string(),
            MOperand::Mem(MemLoc::Global(sym)) => format!("[{}]", self.symbol(sym)),
            MOperand::Mem(mem) => mem.to_string(),
            MOperand::Label(l) => self.label(l),
            MOperand::Symbol(sym) => self.symbol(sym),
        }
    }

    /// One instruction, without indentation.
    pub fn inst(&self, inst: &MachineInst) -> String {
        let op = match inst {
            MachineInst::Label(l) => return format!("{}:", self.label(*l)),
            MachineInst::Op(op) => op,
        };
        let desc = self.target.descs.get(op.desc);
        let mut text = desc.mnemonic.to_string();
        if let Some(cc) = op.cond {
            let _ = write!(text, ".{cc}");
        }

        let mut parts = Vec::new();
        if let (Some(dst), Some(RegConstraint::Any)) = (op.dst, desc.dst) {
            parts.push(self.target.regs.name(dst).to_string());
        }
        for (j, src) in op.sources().enumerate() {
            // Operands pinned by the descriptor are implicit.
            let implicit = matches!(
                desc.srcs.get(j),
                Some(OperandSpec::Reg(RegConstraint::Fixed(_) | RegConstraint::Through(_)))
                    | Some(OperandSpec::Imm(ImmPredicate::Equals(_)))
            );
            if !implicit {
                parts.push(self.operand(src));
            }
        }
        if !parts.is_empty() {
            text.push(' ');
            text.push_str(&parts.join(", "));
        }
        text
    }

    /// A whole instruction stream, labels flush left and one instruction per line.
    pub fn listing(&self, code: &[MachineInst]) -> String {
        let mut out = String::new();
        for inst in code {
            match inst {
                MachineInst::Label(_) => out.push_str(&self.inst(inst)),
                MachineInst::Op(_) => {
                    out.push_str("    ");
                    out.push_str(&self.inst(inst));
                }
            }
            out.push('\n');
        }
        out
    }
}
