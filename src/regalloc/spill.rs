//! Spill code insertion.
//!
//! Every spilled variable gets its own spill slot. Each instruction that reads
//! it loads the value into a fresh temporary right before, and each
//! instruction that writes it writes a fresh temporary instead, stored to the
//! slot right after. The temporaries live for a single instruction and are
//! reported back so the next coloring round never picks them as spill
//! candidates while anything else is left.

use crate::core::ir::{Function, Inst, MemLoc, Operand, SpillSlot, VReg};
use hashbrown::{HashMap, HashSet};

/// Rewrite `func` so that every variable in `spilled` lives in memory.
///
/// Returns the slot of each spilled variable. New temporaries are added to
/// `no_spill`.
pub fn rewrite_spills(
    func: &mut Function,
    spilled: &[VReg],
    no_spill: &mut HashSet<VReg>,
) -> Vec<(VReg, SpillSlot)> {
    let slots: Vec<(VReg, SpillSlot)> = spilled.iter().map(|&v| (v, func.new_spill_slot())).collect();
    let slot_of: HashMap<VReg, SpillSlot> = slots.iter().copied().collect();

    let old = std::mem::take(&mut func.insts);
    let mut insts = Vec::with_capacity(old.len() + spilled.len() * 4);

    // Incoming values are stored on entry, even when the body redefines them later.
    let entry_loc = old.first().map(|i| i.loc).unwrap_or(func.loc);
    for &(v, slot) in &slots {
        if func.params.contains(&v) {
            insts.push(Inst::store(MemLoc::Spill(slot), Operand::Reg(v)).at(entry_loc));
            no_spill.insert(v);
        }
    }

    let mut loads = 0;
    let mut stores = 0;
    for mut inst in old {
        let mut reloaded: Vec<(VReg, VReg)> = Vec::new();
        for operand in &mut inst.operands {
            let Operand::Reg(v) = *operand else {
                continue;
            };
            let Some(&slot) = slot_of.get(&v) else {
                continue;
            };
            let t = match reloaded.iter().find(|&&(w, _)| w == v) {
                Some(&(_, t)) => t,
                None => {
                    let t = func.new_vreg();
                    no_spill.insert(t);
                    insts.push(Inst::load(t, MemLoc::Spill(slot)).with_type(inst.ty).at(inst.loc));
                    reloaded.push((v, t));
                    loads += 1;
                    t
                }
            };
            *operand = Operand::Reg(t);
        }

        let store = match inst.result.and_then(|d| slot_of.get(&d).copied()) {
            Some(slot) => {
                let t = func.new_vreg();
                no_spill.insert(t);
                inst.result = Some(t);
                stores += 1;
                Some(Inst::store(MemLoc::Spill(slot), Operand::Reg(t)).with_type(inst.ty).at(inst.loc))
            }
            None => None,
        };
        insts.push(inst);
        insts.extend(store);
    }
    func.insts = insts;

    log::debug!(
        "spilled {} values in `{}`: {} reloads, {} stores",
        slots.len(),
        func.name,
        loads,
        stores
    );
    slots
}
