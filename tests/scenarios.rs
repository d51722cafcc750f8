//! End-to-end scenarios: straight-line accumulator code, a value live across a
//! branch, and register pressure that forces spilling.

use acc8::analysis::{Cfg, Liveness};
use acc8::arch8::a8;
use acc8::core::ir::{BinOp, CondCode, Function, Inst, Label, MemLoc, OpKind, Opcode, Operand, VReg};
use acc8::core::register_file::{PhysReg, RegSet, RegisterFile};
use acc8::core::BackendConfig;
use acc8::isel::{MOperand, MachineInst};
use acc8::pipeline::Backend;
use acc8::target::{
    CCInfo, Category, DescriptorTable, ImmPredicate, InstrDesc, OperandSpec, RegConstraint, Target,
};
use std::collections::BTreeSet;

const ACC: PhysReg = PhysReg(0);

/// Two general registers plus an accumulator that `ADD` reads and writes.
fn accumulator_machine() -> Target {
    let any = OperandSpec::Reg(RegConstraint::Any);
    let descs = vec![
        InstrDesc::new("MOV", 0x01, OpKind::Move, Category::Move)
            .dst(RegConstraint::Any)
            .src(any)
            .cycles(2)
            .reg_move(),
        InstrDesc::new("LDI", 0x02, OpKind::Move, Category::Move)
            .dst(RegConstraint::Any)
            .src(OperandSpec::Imm(ImmPredicate::Byte))
            .cycles(3),
        InstrDesc::new("ADD", 0x03, OpKind::Binary(BinOp::Add), Category::Arithmetic)
            .dst(RegConstraint::Through(ACC))
            .src(OperandSpec::Reg(RegConstraint::Through(ACC)))
            .src(any)
            .cycles(4),
        InstrDesc::new("RET", 0x04, OpKind::Return, Category::Return).cycles(5),
    ];
    Target::new(
        "acc3",
        RegisterFile::new(&["ACC", "R0", "R1"], ACC),
        CCInfo {
            arg_regs: vec![PhysReg(1), PhysReg(2)],
            ret_reg: ACC,
            caller_saved: RegSet::first(3),
            callee_saved: RegSet::new(),
        },
        DescriptorTable::new(descs),
    )
}

fn set(vs: &[VReg]) -> BTreeSet<VReg> {
    vs.iter().copied().collect()
}

#[test]
fn test_scenario_a_straight_line_add() {
    let _ = env_logger::builder().is_test(true).try_init();
    let target = accumulator_machine();

    let mut f = Function::new("sum");
    let (t1, t2, t3) = (f.named_vreg("t1"), f.named_vreg("t2"), f.named_vreg("t3"));
    f.push(Inst::mov_imm(t1, 5));
    f.push(Inst::mov_imm(t2, 7));
    f.push(Inst::binary(BinOp::Add, t3, t1.into(), t2.into()));
    f.push(Inst::ret(Some(t3.into())));

    let cfg = Cfg::build(&f, 0).unwrap();
    assert_eq!(cfg.len(), 1);
    let liveness = Liveness::compute(&f, &cfg);
    assert_eq!(liveness.live_before(&f, &cfg, 2), set(&[t1, t2]));
    assert!(liveness.live_out(0).is_empty());

    let compiled = Backend::new(&target, BackendConfig::default()).compile_function(&f).unwrap();
    let assignment = &compiled.allocation.assignment;
    assert_ne!(assignment.reg(t1), assignment.reg(t2));
    assert!(assignment.reg(t1).is_some() && assignment.reg(t2).is_some());
    assert!(compiled.bridging_moves <= 1);

    let add = compiled
        .code
        .iter()
        .filter_map(MachineInst::as_op)
        .find(|op| target.descs.get(op.desc).mnemonic == "ADD")
        .expect("add selected");
    assert_eq!(add.dst, Some(ACC));
    assert_eq!(add.srcs[0], Some(MOperand::Reg(ACC)));
}

#[test]
fn test_scenario_b_value_live_across_branch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut f = Function::new("branchy");
    let p = f.add_param("p");
    let (x, c) = (f.named_vreg("x"), f.named_vreg("c"));
    let then = f.named_label("then");
    f.push(Inst::mov_imm(x, 3));
    f.push(Inst::compare(CondCode::Lt, c, p.into(), Operand::Imm(4)));
    f.push(Inst::cond_jump(c, then));
    f.push(Inst::store(MemLoc::Local(0), x.into()));
    f.push(Inst::ret(None));
    f.push(Inst::label(then));
    f.push(Inst::store(MemLoc::Local(1), x.into()));
    f.push(Inst::ret(None));

    let cfg = Cfg::build(&f, 0).unwrap();
    assert_eq!(cfg.len(), 3);
    assert_eq!(cfg.block(0).succs, vec![2, 1]);
    let liveness = Liveness::compute(&f, &cfg);
    assert!(liveness.live_out(0).contains(&x));
    assert!(liveness.live_in(1).contains(&x));
    assert!(liveness.live_in(2).contains(&x));
    assert!(!liveness.live_out(0).contains(&c));

    let compiled = Backend::new(a8(), BackendConfig::default()).compile_function(&f).unwrap();
    // x survives the compare and branch in one register
    let x_reg = compiled.allocation.assignment.reg(x).unwrap();
    let stores: Vec<_> = compiled
        .code
        .iter()
        .filter_map(MachineInst::as_op)
        .filter(|op| a8().descs.get(op.desc).op == OpKind::Store)
        .collect();
    assert_eq!(stores.len(), 2);
    for st in stores {
        assert_eq!(st.srcs[1], Some(MOperand::Reg(x_reg)));
    }
}

#[test]
fn test_scenario_c_pressure_spills_and_converges() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut f = Function::new("pressure");
    let vs: Vec<VReg> = (0..9).map(|i| f.named_vreg(format!("x{i}"))).collect();
    for (i, &v) in vs.iter().enumerate() {
        f.push(Inst::mov_imm(v, i as i32));
    }
    for (i, &v) in vs.iter().enumerate() {
        f.push(Inst::store(MemLoc::Local(i as u16), v.into()));
    }
    f.push(Inst::ret(None));

    let config = BackendConfig::default();
    let compiled = Backend::new(a8(), config.clone()).compile_function(&f).unwrap();
    let alloc = &compiled.allocation;
    assert!(!alloc.spilled.is_empty());
    assert!(alloc.rounds >= 2 && alloc.rounds <= config.max_alloc_rounds);
    assert_eq!(compiled.spill_slots as usize, alloc.spilled.len());

    let insts = &compiled.lowered.insts;
    for &(v, slot) in &alloc.spilled {
        assert!(insts.iter().all(|i| i.def() != Some(v) && i.uses().all(|u| u != v)));
        let mem = Operand::Mem(MemLoc::Spill(slot));
        for (k, inst) in insts.iter().enumerate() {
            match inst.opcode {
                // a reload feeds the next instruction that is not itself a reload
                Opcode::Load if inst.operands[0] == mem => {
                    let t = inst.def().unwrap();
                    let user = insts[k + 1..]
                        .iter()
                        .find(|i| !(i.opcode == Opcode::Load && matches!(i.operands[0], Operand::Mem(MemLoc::Spill(_)))))
                        .unwrap();
                    assert!(user.uses().any(|u| u == t));
                }
                // a spill store directly follows the definition it saves
                Opcode::Store if inst.operands[0] == mem => {
                    let Operand::Reg(t) = inst.operands[1] else {
                        panic!("spill store of a non-register");
                    };
                    assert_eq!(insts[k - 1].def(), Some(t));
                }
                _ => {}
            }
        }
    }

    // the machine code touches the spill slots too
    assert!(compiled.code.iter().filter_map(MachineInst::as_op).any(|op| op
        .sources()
        .any(|s| matches!(s, MOperand::Mem(MemLoc::Spill(_))))));
}

#[test]
fn test_spilling_respects_loop_weights() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Eight values are live across a loop whose body uses only `hot`.
    let mut f = Function::new("weights");
    let hot = f.named_vreg("hot");
    let cold: Vec<VReg> = (0..7).map(|i| f.named_vreg(format!("c{i}"))).collect();
    let top: Label = f.named_label("top");
    f.push(Inst::mov_imm(hot, 10));
    for (i, &v) in cold.iter().enumerate() {
        f.push(Inst::mov_imm(v, i as i32));
    }
    f.push(Inst::label(top));
    f.push(Inst::binary(BinOp::Sub, hot, hot.into(), Operand::Imm(1)));
    f.push(Inst::cond_jump(hot, top));
    for (i, &v) in cold.iter().enumerate() {
        f.push(Inst::store(MemLoc::Local(i as u16), v.into()));
    }
    f.push(Inst::ret(None));

    let compiled = Backend::new(a8(), BackendConfig::default()).compile_function(&f).unwrap();
    let spilled: Vec<VReg> = compiled.allocation.spilled.iter().map(|&(v, _)| v).collect();
    assert!(!spilled.is_empty());
    assert!(!spilled.contains(&hot));
}
