//! Textual test IR (TIR) for backend tests and tools.
//!
//! TIR is a small assembly-like rendering of the linear IR, readable by
//! [`parse_module`] and produced by [`print_module`], so a module can be
//! written by hand, compiled, and dumped again in the same syntax.
//!
//! # TIR Format
//!
//! ```text
//! ; Comments start with a semicolon
//! global @counter : u8
//! declare @putc(%c)
//!
//! func @clamp(%x, %limit) {
//! entry:
//!     %over = cmp gt %x, %limit
//!     br %over, ^cap
//!     ret %x
//! cap:
//!     %n = load.i8 [@counter]
//!     %n1 = add.i8 %n, 1
//!     store [@counter], %n1
//!     call @putc(33)
//!     ret %limit
//! }
//! ```
//!
//! Operations take an optional `.u8`, `.i8` or `.bool` type suffix. Memory
//! operands are `[@global]`, `[local N]`, `[param N]`, `[outarg N]` and
//! `[spill N]`. Joins are written `%x = phi [^a, %v], [^b, %w]`.

pub mod check;
pub mod parser;

pub use check::{render, CheckDirective, RunDirective, RunOptions, TestRunner, TestSpec};
pub use parser::{parse_module, ParseError};

use crate::core::ir::{Function, Inst, MemLoc, Module, Opcode, Operand, StorageClass, SymbolTable, Type};
use std::fmt::Write as _;

/// Render a whole module: globals, external declarations, then functions.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for (_, sym) in module.symbols.iter() {
        match sym.storage {
            StorageClass::Global => {
                let _ = writeln!(out, "global @{} : {}", sym.name, sym.ty);
            }
            StorageClass::Function if module.function(&sym.name).is_none() => {
                let _ = writeln!(out, "declare @{}()", sym.name);
            }
            _ => {}
        }
    }
    for func in &module.functions {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&print_function(func, &module.symbols));
    }
    out
}

pub fn print_function(func: &Function, symbols: &SymbolTable) -> String {
    let params: Vec<String> = func.params.iter().map(|&p| format!("%{}", func.vreg_name(p))).collect();
    let mut out = format!("func @{}({}) {{\n", func.name, params.join(", "));
    for inst in &func.insts {
        match inst.opcode {
            Opcode::Label(_) => {}
            _ => out.push_str("    "),
        }
        out.push_str(&print_inst(func, symbols, inst));
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

/// One instruction in TIR syntax, without indentation.
pub fn print_inst(func: &Function, symbols: &SymbolTable, inst: &Inst) -> String {
    let value = |op: &Operand| match op {
        Operand::Reg(v) => format!("%{}", func.vreg_name(*v)),
        Operand::Imm(i) => i.to_string(),
        Operand::Mem(MemLoc::Global(sym)) => format!("[@{}]", symbols.name(*sym)),
        Operand::Mem(mem) => mem.to_string(),
    };
    let operands = |ops: &[Operand]| ops.iter().map(value).collect::<Vec<_>>().join(", ");
    let result = match inst.result {
        Some(v) => format!("%{} = ", func.vreg_name(v)),
        None => String::new(),
    };
    let ty = match inst.ty {
        Type::U8 => String::new(),
        ty => format!(".{ty}"),
    };

    match &inst.opcode {
        Opcode::Label(l) => format!("{}:", func.label_name(*l)),
        Opcode::Move => format!("{result}mov{ty} {}", operands(&inst.operands)),
        Opcode::Binary(op) => format!("{result}{op}{ty} {}", operands(&inst.operands)),
        Opcode::Compare(cc) => format!("{result}cmp{ty} {cc} {}", operands(&inst.operands)),
        Opcode::Call(sym) => format!("{result}call{ty} @{}({})", symbols.name(*sym), operands(&inst.operands)),
        Opcode::Jump(l) => format!("jmp{ty} ^{}", func.label_name(*l)),
        Opcode::CondJump(l) => format!("br{ty} {}, ^{}", operands(&inst.operands), func.label_name(*l)),
        Opcode::Load => format!("{result}load{ty} {}", operands(&inst.operands)),
        Opcode::Store => format!("store{ty} {}", operands(&inst.operands)),
        Opcode::Return if inst.operands.is_empty() => format!("ret{ty}"),
        Opcode::Return => format!("ret{ty} {}", operands(&inst.operands)),
        Opcode::Phi(labels) => {
            let incoming: Vec<String> = labels
                .iter()
                .zip(&inst.operands)
                .map(|(l, v)| format!("[^{}, {}]", func.label_name(*l), value(v)))
                .collect();
            format!("{result}phi{ty} {}", incoming.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"global @counter : u8
declare @putc()

func @clamp(%x, %limit) {
entry:
    %over = cmp gt %x, %limit
    br %over, ^cap
    ret %x
cap:
    %n = load.i8 [@counter]
    %n1 = add.i8 %n, 1
    store [@counter], %n1
    call @putc(33)
    ret %limit
}
"#;

    #[test]
    fn test_print_matches_input() {
        let module = parse_module(SAMPLE, "sample.tir").unwrap();
        assert_eq!(print_module(&module), SAMPLE);
    }

    #[test]
    fn test_reparse_is_stable() {
        let text = r#"
func @f(%a) {
    %s = sub %a, -3
    %t = load [spill 1]
    %j = phi [^x, %a], [^y, %t]
    store [outarg 0], %s
x:
    jmp ^y
y:
    ret
}
"#;
        let first = print_module(&parse_module(text, "t").unwrap());
        let reparsed = parse_module(&first, "t").unwrap();
        assert_eq!(print_module(&reparsed), first);
        assert_eq!(reparsed.functions[0].spill_slot_count(), 2);
    }

    #[test]
    fn test_unnamed_values_print_with_index() {
        let mut module = Module::new("t");
        let mut f = Function::new("g");
        let v = f.new_vreg();
        f.push(Inst::mov_imm(v, 9));
        f.push(Inst::ret(Some(v.into())));
        module.functions.push(f);
        assert_eq!(print_module(&module), "func @g() {\n    %v0 = mov 9\n    ret %v0\n}\n");
    }
}
