// This module defines the linear intermediate representation consumed by the acc8
// backend. The front end hands over one instruction list per function: each
// instruction carries an opcode tag, ordered operands (virtual registers, immediates
// or memory locations), an optional result register, a type and the source location
// used for diagnostics. Functions own their instructions together with counters for
// fresh virtual registers, labels and spill slots, so later stages (join
// deconstruction, call-boundary lowering, spill rewriting) can extend the IR without a
// side table. Modules bundle functions with the symbol table produced by semantic
// analysis.

//! Linear IR data model.

use hashbrown::HashMap;
use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};

/// Virtual register naming a program value before allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl VReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

/// Jump target defined by a label instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Abstract memory slot holding a spilled variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(pub u32);

impl fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spill {}", self.0)
    }
}

/// Index into a module's [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Source position of an instruction, used for diagnostic attribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Value types of the 8-bit machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    #[default]
    U8,
    I8,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Mul,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Mul)
    }
}

/// Comparison condition. Signedness comes from the instruction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CondCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondCode {
    /// Condition that holds for swapped operands.
    pub fn swapped(self) -> Self {
        match self {
            CondCode::Eq => CondCode::Eq,
            CondCode::Ne => CondCode::Ne,
            CondCode::Lt => CondCode::Gt,
            CondCode::Le => CondCode::Ge,
            CondCode::Gt => CondCode::Lt,
            CondCode::Ge => CondCode::Le,
        }
    }
}

/// Memory location operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemLoc {
    Global(SymbolId),
    /// Frame slot of a local variable.
    Local(u16),
    /// Incoming stack argument.
    Param(u8),
    /// Outgoing stack argument of a call.
    OutArg(u8),
    Spill(SpillSlot),
}

impl fmt::Display for MemLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemLoc::Global(sym) => write!(f, "[global {}]", sym.0),
            MemLoc::Local(n) => write!(f, "[local {n}]"),
            MemLoc::Param(n) => write!(f, "[param {n}]"),
            MemLoc::OutArg(n) => write!(f, "[outarg {n}]"),
            MemLoc::Spill(slot) => write!(f, "[{slot}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(VReg),
    Imm(i32),
    Mem(MemLoc),
}

impl Operand {
    pub fn as_reg(&self) -> Option<VReg> {
        match self {
            Operand::Reg(v) => Some(*v),
            _ => None,
        }
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Reg(_) => OperandKind::Reg,
            Operand::Imm(_) => OperandKind::Imm,
            Operand::Mem(_) => OperandKind::Mem,
        }
    }
}

impl From<VReg> for Operand {
    fn from(v: VReg) -> Self {
        Operand::Reg(v)
    }
}

impl From<MemLoc> for Operand {
    fn from(m: MemLoc) -> Self {
        Operand::Mem(m)
    }
}

/// Shape of an operand as seen by instruction matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperandKind {
    Reg,
    Imm,
    Mem,
}

/// Operation tag of an IR instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Move,
    Binary(BinOp),
    Compare(CondCode),
    Call(SymbolId),
    Jump(Label),
    /// Jump to the label when the condition operand is non-zero, fall through otherwise.
    CondJump(Label),
    Load,
    Store,
    Return,
    Label(Label),
    /// Join marker. Incoming value `i` flows from the block that starts with label `i`.
    Phi(Vec<Label>),
}

/// Opcode without its payload, used as descriptor-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OpKind {
    Move,
    Binary(BinOp),
    Compare,
    Call,
    Jump,
    CondJump,
    Load,
    Store,
    Return,
    Label,
    Phi,
}

impl Opcode {
    pub fn kind(&self) -> OpKind {
        match self {
            Opcode::Move => OpKind::Move,
            Opcode::Binary(op) => OpKind::Binary(*op),
            Opcode::Compare(_) => OpKind::Compare,
            Opcode::Call(_) => OpKind::Call,
            Opcode::Jump(_) => OpKind::Jump,
            Opcode::CondJump(_) => OpKind::CondJump,
            Opcode::Load => OpKind::Load,
            Opcode::Store => OpKind::Store,
            Opcode::Return => OpKind::Return,
            Opcode::Label(_) => OpKind::Label,
            Opcode::Phi(_) => OpKind::Phi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub opcode: Opcode,
    pub result: Option<VReg>,
    pub operands: Vec<Operand>,
    pub ty: Type,
    pub loc: Location,
}

impl Inst {
    pub fn new(opcode: Opcode, result: Option<VReg>, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            result,
            operands,
            ty: Type::default(),
            loc: Location::default(),
        }
    }

    pub fn mov(dst: VReg, src: impl Into<Operand>) -> Self {
        Self::new(Opcode::Move, Some(dst), vec![src.into()])
    }

    pub fn mov_imm(dst: VReg, imm: i32) -> Self {
        Self::new(Opcode::Move, Some(dst), vec![Operand::Imm(imm)])
    }

    pub fn binary(op: BinOp, dst: VReg, lhs: Operand, rhs: Operand) -> Self {
        Self::new(Opcode::Binary(op), Some(dst), vec![lhs, rhs])
    }

    pub fn compare(cc: CondCode, dst: VReg, lhs: Operand, rhs: Operand) -> Self {
        Self::new(Opcode::Compare(cc), Some(dst), vec![lhs, rhs])
    }

    pub fn call(callee: SymbolId, result: Option<VReg>, args: Vec<Operand>) -> Self {
        Self::new(Opcode::Call(callee), result, args)
    }

    pub fn jump(target: Label) -> Self {
        Self::new(Opcode::Jump(target), None, Vec::new())
    }

    pub fn cond_jump(cond: VReg, target: Label) -> Self {
        Self::new(Opcode::CondJump(target), None, vec![Operand::Reg(cond)])
    }

    pub fn load(dst: VReg, mem: MemLoc) -> Self {
        Self::new(Opcode::Load, Some(dst), vec![Operand::Mem(mem)])
    }

    pub fn store(mem: MemLoc, value: Operand) -> Self {
        Self::new(Opcode::Store, None, vec![Operand::Mem(mem), value])
    }

    pub fn ret(value: Option<Operand>) -> Self {
        Self::new(Opcode::Return, None, value.into_iter().collect())
    }

    pub fn label(label: Label) -> Self {
        Self::new(Opcode::Label(label), None, Vec::new())
    }

    pub fn phi(dst: VReg, incoming: Vec<(Label, VReg)>) -> Self {
        let (labels, values): (Vec<_>, Vec<_>) = incoming.into_iter().unzip();
        Self::new(
            Opcode::Phi(labels),
            Some(dst),
            values.into_iter().map(Operand::Reg).collect(),
        )
    }

    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    /// Jump, conditional jump or return.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Jump(_) | Opcode::CondJump(_) | Opcode::Return
        )
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self.opcode {
            Opcode::Jump(l) | Opcode::CondJump(l) => Some(l),
            _ => None,
        }
    }

    pub fn defined_label(&self) -> Option<Label> {
        match self.opcode {
            Opcode::Label(l) => Some(l),
            _ => None,
        }
    }

    pub fn def(&self) -> Option<VReg> {
        self.result
    }

    /// Virtual registers read by this instruction, in operand order.
    pub fn uses(&self) -> impl Iterator<Item = VReg> + '_ {
        self.operands.iter().filter_map(Operand::as_reg)
    }

    /// `(dst, src)` when this is a register-to-register copy.
    pub fn as_move(&self) -> Option<(VReg, VReg)> {
        match (&self.opcode, self.result, self.operands.as_slice()) {
            (Opcode::Move, Some(dst), [Operand::Reg(src)]) => Some((dst, *src)),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.opcode, Opcode::Call(_))
    }
}

/// A function body in linear form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<VReg>,
    pub insts: Vec<Inst>,
    pub loc: Location,
    vreg_names: HashMap<VReg, String>,
    label_names: HashMap<Label, String>,
    next_vreg: u32,
    next_label: u32,
    next_spill: u32,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            insts: Vec::new(),
            loc: Location::default(),
            vreg_names: HashMap::new(),
            label_names: HashMap::new(),
            next_vreg: 0,
            next_label: 0,
            next_spill: 0,
        }
    }

    pub fn new_vreg(&mut self) -> VReg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    pub fn named_vreg(&mut self, name: impl Into<String>) -> VReg {
        let v = self.new_vreg();
        self.vreg_names.insert(v, name.into());
        v
    }

    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn named_label(&mut self, name: impl Into<String>) -> Label {
        let l = self.new_label();
        self.label_names.insert(l, name.into());
        l
    }

    pub fn new_spill_slot(&mut self) -> SpillSlot {
        let slot = SpillSlot(self.next_spill);
        self.next_spill += 1;
        slot
    }

    pub fn add_param(&mut self, name: impl Into<String>) -> VReg {
        let v = self.named_vreg(name);
        self.params.push(v);
        v
    }

    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    pub fn vreg_count(&self) -> u32 {
        self.next_vreg
    }

    pub fn spill_slot_count(&self) -> u32 {
        self.next_spill
    }

    /// Printable name of a virtual register, `v<N>` for unnamed ones.
    pub fn vreg_name(&self, v: VReg) -> String {
        match self.vreg_names.get(&v) {
            Some(name) => name.clone(),
            None => format!("v{}", v.0),
        }
    }

    pub fn label_name(&self, l: Label) -> String {
        match self.label_names.get(&l) {
            Some(name) => name.clone(),
            None => format!("L{}", l.0),
        }
    }

    pub fn has_joins(&self) -> bool {
        self.insts.iter().any(|i| matches!(i.opcode, Opcode::Phi(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Local,
    Global,
    Parameter,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub storage: StorageClass,
    pub ty: Type,
}

/// Names produced by semantic analysis, indexed by [`SymbolId`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol, returning the existing id when the name is already known.
    pub fn insert(&mut self, name: &str, storage: StorageClass, ty: Type) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.to_string(),
            storage,
            ty,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn name(&self, id: SymbolId) -> &str {
        self.get(id).map(|s| s.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// A compilation unit as handed over by semantic analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Source identifier used in diagnostics.
    pub source: String,
    pub functions: Vec<Function>,
    pub symbols: SymbolTable,
}

impl Module {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_and_moves() {
        let mut f = Function::new("f");
        let a = f.named_vreg("a");
        let b = f.named_vreg("b");
        let c = f.new_vreg();

        let add = Inst::binary(BinOp::Add, c, a.into(), Operand::Imm(3));
        assert_eq!(add.uses().collect::<Vec<_>>(), vec![a]);
        assert_eq!(add.def(), Some(c));
        assert!(add.as_move().is_none());

        let mv = Inst::mov(b, a);
        assert_eq!(mv.as_move(), Some((b, a)));
        assert!(Inst::mov_imm(b, 1).as_move().is_none());

        assert_eq!(f.vreg_name(a), "a");
        assert_eq!(f.vreg_name(c), "v2");
    }

    #[test]
    fn test_terminators() {
        let mut f = Function::new("f");
        let l = f.new_label();
        let c = f.new_vreg();
        assert!(Inst::jump(l).is_terminator());
        assert!(Inst::cond_jump(c, l).is_terminator());
        assert!(Inst::ret(None).is_terminator());
        assert!(!Inst::label(l).is_terminator());
        assert_eq!(Inst::cond_jump(c, l).branch_target(), Some(l));
    }

    #[test]
    fn test_names_parse_with_strum() {
        assert_eq!("add".parse::<BinOp>().unwrap(), BinOp::Add);
        assert_eq!("ge".parse::<CondCode>().unwrap(), CondCode::Ge);
        assert_eq!("i8".parse::<Type>().unwrap(), Type::I8);
        assert_eq!(BinOp::Shl.to_string(), "shl");
        assert!(BinOp::Add.is_commutative());
        assert!(!BinOp::Sub.is_commutative());
        assert_eq!(CondCode::Lt.swapped(), CondCode::Gt);
    }

    #[test]
    fn test_symbol_table_dedup() {
        let mut syms = SymbolTable::new();
        let a = syms.insert("counter", StorageClass::Global, Type::U8);
        let b = syms.insert("counter", StorageClass::Global, Type::U8);
        assert_eq!(a, b);
        assert_eq!(syms.len(), 1);
        assert_eq!(syms.name(a), "counter");
        assert_eq!(syms.lookup("missing"), None);
    }
}
