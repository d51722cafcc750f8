//! Move cleanup after selection.
//!
//! Two local rewrites run until nothing changes: a copy of a register onto
//! itself is dropped, and in a pair `MOV X, Y; MOV Y, X` the second copy is
//! dropped because both registers already hold the same value. Labels break
//! adjacency, so no rewrite crosses a block boundary.

use super::machine::MachineInst;
use crate::core::register_file::PhysReg;
use crate::target::Target;

fn reg_move(inst: &MachineInst, target: &Target) -> Option<(PhysReg, PhysReg)> {
    inst.as_op().and_then(|op| op.as_reg_move(target))
}

/// Clean up `code` in place, returning the number of removed instructions.
pub fn peephole(code: &mut Vec<MachineInst>, target: &Target) -> usize {
    let mut removed = 0;
    loop {
        let before = code.len();
        code.retain(|inst| !matches!(reg_move(inst, target), Some((dst, src)) if dst == src));

        let mut out = Vec::with_capacity(code.len());
        let mut i = 0;
        while i < code.len() {
            out.push(code[i]);
            if let (Some((dst, src)), Some(next)) = (reg_move(&code[i], target), code.get(i + 1)) {
                if reg_move(next, target) == Some((src, dst)) {
                    i += 2;
                    continue;
                }
            }
            i += 1;
        }
        *code = out;

        let changed = before - code.len();
        if changed == 0 {
            break;
        }
        removed += changed;
    }
    if removed > 0 {
        log::trace!("peephole removed {removed} moves");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch8::{a8, A, B, C};
    use crate::core::ir::{Label, Location};
    use crate::isel::machine::{MOperand, MachineOp};

    fn mov(dst: PhysReg, src: PhysReg) -> MachineInst {
        let desc = a8().descs.reg_move().unwrap();
        MachineInst::Op(MachineOp::new(desc, Location::default()).with_dst(dst).with_src(MOperand::Reg(src)))
    }

    fn ret() -> MachineInst {
        let desc = a8().descs.first(crate::core::ir::OpKind::Return, &[]).unwrap();
        MachineInst::Op(MachineOp::new(desc, Location::default()))
    }

    #[test]
    fn test_self_moves_and_pairs() {
        let mut code = vec![mov(A, A), mov(B, A), mov(A, B), ret()];
        assert_eq!(peephole(&mut code, a8()), 2);
        assert_eq!(code, vec![mov(B, A), ret()]);
    }

    #[test]
    fn test_runs_to_fixpoint() {
        // Removing the self-move makes the outer pair adjacent.
        let mut code = vec![mov(B, A), mov(C, C), mov(A, B), ret()];
        assert_eq!(peephole(&mut code, a8()), 2);
        assert_eq!(code, vec![mov(B, A), ret()]);
    }

    #[test]
    fn test_labels_break_pairs() {
        let mut code = vec![mov(B, A), MachineInst::Label(Label(0)), mov(A, B), ret()];
        assert_eq!(peephole(&mut code, a8()), 0);
        assert_eq!(code.len(), 4);
    }
}
