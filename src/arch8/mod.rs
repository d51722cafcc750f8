//! The A8 target: seven 8-bit registers around an accumulator.
//!
//! | reg | role                                  |
//! |-----|---------------------------------------|
//! | A   | accumulator, return value, caller-saved |
//! | B-E | arguments 0-3, caller-saved           |
//! | H,L | callee-saved                          |
//!
//! Arguments past the fourth are passed in stack slots.

pub mod descriptors;

use crate::core::register_file::{PhysReg, RegSet, RegisterFile};
use crate::target::{CCInfo, DescriptorTable, Target};
use std::sync::OnceLock;

pub const A: PhysReg = PhysReg(0);
pub const B: PhysReg = PhysReg(1);
pub const C: PhysReg = PhysReg(2);
pub const D: PhysReg = PhysReg(3);
pub const E: PhysReg = PhysReg(4);
pub const H: PhysReg = PhysReg(5);
pub const L: PhysReg = PhysReg(6);

pub const REG_NAMES: [&str; 7] = ["A", "B", "C", "D", "E", "H", "L"];

/// A, B, C, D and E.
pub const CALLER_SAVED: RegSet = RegSet::first(5);

/// The process-wide A8 target, built on first use.
pub fn a8() -> &'static Target {
    static TARGET: OnceLock<Target> = OnceLock::new();
    TARGET.get_or_init(build)
}

fn build() -> Target {
    let regs = RegisterFile::new(&REG_NAMES, A);
    let cc = CCInfo {
        arg_regs: vec![B, C, D, E],
        ret_reg: A,
        caller_saved: CALLER_SAVED,
        callee_saved: RegSet::of(&[H, L]),
    };
    let target = Target::new("a8", regs, cc, DescriptorTable::new(descriptors::a8_descriptors()));
    log::debug!("initialised target a8 with {} descriptors", target.descs.len());
    target
}
