// This module holds the descriptor table of the A8, the 8-bit accumulator CPU the backend
// targets. Arithmetic and logic instructions take their left operand from the accumulator
// and leave the result there, so both are modelled as Through(A) constraints that the
// selector bridges with MOV when the allocator placed the values elsewhere. Loads and
// stores come in a general form that works with any register and a shorter accumulator
// form; the selector picks whichever is cheaper for the allocation at hand. Multiplication
// is the only instruction with fixed register operands (A times B into A). Comparisons
// set a register to 0 or 1 from a condition evaluated on the accumulator. Shifts only
// accept an immediate count. Calls clobber every caller-saved register.

//! A8 instruction descriptors.

use super::{A, B, CALLER_SAVED};
use crate::core::ir::{BinOp, OpKind};
use crate::target::{Category, Flags, ImmPredicate, InstrDesc, OperandSpec, RegConstraint};

const ANY: OperandSpec = OperandSpec::Reg(RegConstraint::Any);
const ACC: OperandSpec = OperandSpec::Reg(RegConstraint::Through(A));
const BYTE: OperandSpec = OperandSpec::Imm(ImmPredicate::Byte);
const MEM: OperandSpec = OperandSpec::Mem;

const ARITH_FLAGS: Flags = Flags::ZERO
    .union(Flags::CARRY)
    .union(Flags::SIGN)
    .union(Flags::OVERFLOW);
const LOGIC_FLAGS: Flags = Flags::ZERO.union(Flags::SIGN).union(Flags::CARRY);

/// Accumulator ALU operations: (operation, register form, immediate form).
const ALU_OPS: [(BinOp, &str, u8, &str, u8, Category); 5] = [
    (BinOp::Add, "ADD", 0x80, "ADI", 0xC6, Category::Arithmetic),
    (BinOp::Sub, "SUB", 0x90, "SUI", 0xD6, Category::Arithmetic),
    (BinOp::And, "ANA", 0xA0, "ANI", 0xE6, Category::Logic),
    (BinOp::Or, "ORA", 0xB0, "ORI", 0xF6, Category::Logic),
    (BinOp::Xor, "XRA", 0xA8, "XRI", 0xEE, Category::Logic),
];

pub fn a8_descriptors() -> Vec<InstrDesc> {
    let mut descs = vec![
        InstrDesc::new("MOV", 0x40, OpKind::Move, Category::Move)
            .dst(RegConstraint::Any)
            .src(ANY)
            .cycles(5)
            .reg_move(),
        InstrDesc::new("MVI", 0x06, OpKind::Move, Category::Move)
            .dst(RegConstraint::Any)
            .src(BYTE)
            .cycles(7),
    ];

    for (op, reg_name, reg_enc, imm_name, imm_enc, category) in ALU_OPS {
        let flags = if category == Category::Logic {
            LOGIC_FLAGS
        } else {
            ARITH_FLAGS
        };
        descs.push(
            InstrDesc::new(reg_name, reg_enc, OpKind::Binary(op), category)
                .dst(RegConstraint::Through(A))
                .src(ACC)
                .src(ANY)
                .writes(flags)
                .cycles(4),
        );
        descs.push(
            InstrDesc::new(imm_name, imm_enc, OpKind::Binary(op), category)
                .dst(RegConstraint::Through(A))
                .src(ACC)
                .src(BYTE)
                .writes(flags)
                .cycles(7),
        );
    }

    descs.extend([
        // Listed after ADI/SUI so they only win on cost.
        InstrDesc::new("INR", 0x3C, OpKind::Binary(BinOp::Add), Category::Arithmetic)
            .dst(RegConstraint::Through(A))
            .src(ACC)
            .src(OperandSpec::Imm(ImmPredicate::Equals(1)))
            .writes(Flags::ZERO | Flags::SIGN)
            .cycles(5),
        InstrDesc::new("DCR", 0x3D, OpKind::Binary(BinOp::Sub), Category::Arithmetic)
            .dst(RegConstraint::Through(A))
            .src(ACC)
            .src(OperandSpec::Imm(ImmPredicate::Equals(1)))
            .writes(Flags::ZERO | Flags::SIGN)
            .cycles(5),
        InstrDesc::new("MUL", 0x76, OpKind::Binary(BinOp::Mul), Category::Arithmetic)
            .dst(RegConstraint::Fixed(A))
            .src(OperandSpec::Reg(RegConstraint::Fixed(A)))
            .src(OperandSpec::Reg(RegConstraint::Fixed(B)))
            .writes(ARITH_FLAGS)
            .cycles(11),
        InstrDesc::new("SLA", 0x27, OpKind::Binary(BinOp::Shl), Category::Shift)
            .dst(RegConstraint::Through(A))
            .src(ACC)
            .src(BYTE)
            .writes(Flags::CARRY | Flags::ZERO)
            .cycles(8),
        InstrDesc::new("SRL", 0x3F, OpKind::Binary(BinOp::Shr), Category::Shift)
            .dst(RegConstraint::Through(A))
            .src(ACC)
            .src(BYTE)
            .writes(Flags::CARRY | Flags::ZERO)
            .cycles(8),
        InstrDesc::new("CMP", 0xB8, OpKind::Compare, Category::Compare)
            .dst(RegConstraint::Any)
            .src(ACC)
            .src(ANY)
            .writes(ARITH_FLAGS)
            .cycles(7),
        InstrDesc::new("CPI", 0xFE, OpKind::Compare, Category::Compare)
            .dst(RegConstraint::Any)
            .src(ACC)
            .src(BYTE)
            .writes(ARITH_FLAGS)
            .cycles(9),
        InstrDesc::new("LD", 0x4E, OpKind::Load, Category::Load)
            .dst(RegConstraint::Any)
            .src(MEM)
            .cycles(10),
        InstrDesc::new("LDA", 0x3A, OpKind::Load, Category::Load)
            .dst(RegConstraint::Through(A))
            .src(MEM)
            .cycles(7),
        InstrDesc::new("ST", 0x70, OpKind::Store, Category::Store)
            .src(MEM)
            .src(ANY)
            .cycles(10),
        InstrDesc::new("STA", 0x32, OpKind::Store, Category::Store)
            .src(MEM)
            .src(ACC)
            .cycles(7),
        InstrDesc::new("STI", 0x36, OpKind::Store, Category::Store)
            .src(MEM)
            .src(BYTE)
            .cycles(10),
        InstrDesc::new("JMP", 0xC3, OpKind::Jump, Category::Branch).cycles(10),
        InstrDesc::new("JNZ", 0xC2, OpKind::CondJump, Category::Branch)
            .src(ANY)
            .reads(Flags::ZERO)
            .writes(Flags::ZERO)
            .cycles(10),
        InstrDesc::new("CALL", 0xCD, OpKind::Call, Category::Call)
            .clobbers(CALLER_SAVED)
            .writes(Flags::all())
            .cycles(17),
        InstrDesc::new("RET", 0xC9, OpKind::Return, Category::Return).cycles(10),
    ]);
    descs
}
