//! Target description.
//!
//! A [`Target`] bundles the three pieces of static architecture data the
//! backend consumes: the register file, the calling convention and the
//! instruction descriptor table. Targets are immutable once built and are
//! passed by reference into every pipeline stage, so tests can run the whole
//! backend against small synthetic machines.

pub mod calling_convention;
pub mod descriptor;

pub use calling_convention::{ArgLocation, CCAssigner, CCAssignment, CCInfo, RegisterFirstAssigner};
pub use descriptor::{
    candidates, variants, Candidate, Category, DescId, DescProps, DescriptorTable, Flags,
    ImmPredicate, InstrDesc, OperandSpec, RegConstraint, Requirements, Variant,
};

use crate::core::ir::{Inst, OpKind, Opcode};
use crate::core::register_file::RegisterFile;

/// Static architecture data for one machine.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: &'static str,
    pub regs: RegisterFile,
    pub cc: CCInfo,
    pub descs: DescriptorTable,
}

impl Target {
    pub fn new(name: &'static str, regs: RegisterFile, cc: CCInfo, descs: DescriptorTable) -> Self {
        Self {
            name,
            regs,
            cc,
            descs,
        }
    }

    /// Register requirements the allocator must honour for `inst`.
    pub fn requirements(&self, inst: &Inst) -> Requirements {
        let n = inst.operands.len();
        match inst.opcode {
            Opcode::Call(_) => {
                let mut req = Requirements::none(n);
                for assignment in self.cc.assign_args(n) {
                    if let ArgLocation::Reg(r) = assignment.location {
                        if inst.operands[assignment.index].as_reg().is_some() {
                            req.operands[assignment.index] = Some(r);
                        }
                    }
                }
                if inst.result.is_some() {
                    req.result = Some(self.cc.ret_reg);
                }
                req.late_clobbers = self
                    .descs
                    .first(OpKind::Call, &[])
                    .map(|id| self.descs.get(id).clobbers)
                    .unwrap_or(self.cc.caller_saved);
                req
            }
            Opcode::Return => {
                let mut req = Requirements::none(n);
                if let Some(slot) = req.operands.first_mut() {
                    if inst.operands[0].as_reg().is_some() {
                        *slot = Some(self.cc.ret_reg);
                    }
                }
                req
            }
            Opcode::Label(_) | Opcode::Phi(_) | Opcode::Jump(_) | Opcode::CondJump(_) => {
                Requirements::none(n)
            }
            _ => Requirements::from_candidates(&self.descs, inst, &candidates(&self.descs, inst)),
        }
    }
}
