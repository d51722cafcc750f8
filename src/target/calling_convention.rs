// This module implements the calling convention layer of a target. CCInfo is the static
// description: which registers carry the first arguments, which register returns a value,
// and which registers a call may destroy (caller-saved) or must preserve (callee-saved).
// The CCAssigner trait hands out argument locations one at a time, the way a call
// sequence or a function prologue walks its parameters; RegisterFirstAssigner is the
// only policy the 8-bit targets need: arguments go to the argument registers in order
// and the rest to consecutive stack slots. Both the pre-allocation lowering (to
// pre-color parameter, argument and return temporaries) and the instruction selector
// (to place stack arguments) consume these assignments.

//! Calling convention description and argument assignment.

use crate::core::register_file::{PhysReg, RegSet};

/// Where a single argument or parameter lives at a call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgLocation {
    Reg(PhysReg),
    /// Index of the stack argument slot.
    Stack(u8),
}

/// Argument assignment result from calling convention analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    /// Position of the argument in the call.
    pub index: usize,
    pub location: ArgLocation,
}

/// Information about a calling convention.
#[derive(Debug, Clone)]
pub struct CCInfo {
    /// Argument registers in assignment order.
    pub arg_regs: Vec<PhysReg>,
    pub ret_reg: PhysReg,
    /// Registers a call may overwrite.
    pub caller_saved: RegSet,
    /// Registers that must be preserved by callee.
    pub callee_saved: RegSet,
}

impl CCInfo {
    pub fn assigner(&self) -> RegisterFirstAssigner<'_> {
        RegisterFirstAssigner::new(self)
    }

    /// Locations of `count` arguments in order.
    pub fn assign_args(&self, count: usize) -> Vec<CCAssignment> {
        let mut assigner = self.assigner();
        (0..count)
            .map(|index| CCAssignment {
                index,
                location: assigner.assign_arg(),
            })
            .collect()
    }
}

/// Trait for calling convention argument assignment.
pub trait CCAssigner {
    /// Assign the next argument.
    fn assign_arg(&mut self) -> ArgLocation;
}

/// Arguments in registers first, the rest in consecutive stack slots.
pub struct RegisterFirstAssigner<'a> {
    info: &'a CCInfo,
    next_reg: usize,
    next_stack: u8,
}

impl<'a> RegisterFirstAssigner<'a> {
    pub fn new(info: &'a CCInfo) -> Self {
        Self {
            info,
            next_reg: 0,
            next_stack: 0,
        }
    }
}

impl CCAssigner for RegisterFirstAssigner<'_> {
    fn assign_arg(&mut self) -> ArgLocation {
        if let Some(&reg) = self.info.arg_regs.get(self.next_reg) {
            self.next_reg += 1;
            ArgLocation::Reg(reg)
        } else {
            let slot = self.next_stack;
            self.next_stack += 1;
            ArgLocation::Stack(slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_reg_cc() -> CCInfo {
        CCInfo {
            arg_regs: vec![PhysReg(1), PhysReg(2)],
            ret_reg: PhysReg(0),
            caller_saved: RegSet::first(3),
            callee_saved: RegSet::of(&[PhysReg(3)]),
        }
    }

    #[test]
    fn test_register_then_stack() {
        let cc = two_reg_cc();
        let locs: Vec<_> = cc.assign_args(4).into_iter().map(|a| a.location).collect();
        assert_eq!(
            locs,
            vec![
                ArgLocation::Reg(PhysReg(1)),
                ArgLocation::Reg(PhysReg(2)),
                ArgLocation::Stack(0),
                ArgLocation::Stack(1),
            ]
        );
    }

    #[test]
    fn test_assignments_keep_argument_order() {
        let cc = CCInfo {
            arg_regs: vec![],
            ..two_reg_cc()
        };
        let assigned = cc.assign_args(2);
        assert_eq!(assigned[0], CCAssignment { index: 0, location: ArgLocation::Stack(0) });
        assert_eq!(assigned[1], CCAssignment { index: 1, location: ArgLocation::Stack(1) });
    }
}
