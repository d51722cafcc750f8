//! Failure reporting: every error kind, its phase and its source location.

use acc8::arch8::a8;
use acc8::core::diagnostics::{Phase, Severity};
use acc8::core::ir::{BinOp, OpKind};
use acc8::core::register_file::{PhysReg, RegSet, RegisterFile};
use acc8::core::{BackendConfig, CompilationSession, CompileError};
use acc8::pipeline::Backend;
use acc8::target::{CCInfo, Category, DescriptorTable, InstrDesc, OperandSpec, RegConstraint, Target};
use acc8::test_ir::parse_module;
use bumpalo::Bump;

fn compile_one(text: &str, config: BackendConfig) -> Result<(), CompileError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(text, "err.tir").unwrap();
    Backend::new(a8(), config)
        .compile_function(&module.functions[0])
        .map(|_| ())
}

#[test]
fn test_malformed_control_flow() {
    let cases = [
        ("func @f() {\n    jmp ^missing\n}\n", "undefined label", (2, 5)),
        ("func @f(%c) {\n    br %c, ^f\nf:\n    ret\n    br %c, ^f\n}\n", "no fallthrough", (5, 5)),
        ("func @f() {\n    store [local 0], 1\n}\n", "without a return", (2, 5)),
        ("func @f() {\n}\n", "no instructions", (1, 6)),
    ];
    for (text, reason, (line, column)) in cases {
        let err = compile_one(text, BackendConfig::default()).unwrap_err();
        assert_eq!(err.phase(), Phase::ControlFlow, "{err}");
        assert!(err.to_string().contains(reason), "{err}");
        assert_eq!((err.location().line, err.location().column), (line, column), "{err}");
    }
}

#[test]
fn test_duplicate_label_is_malformed() {
    let mut module = parse_module("func @f() {\nl:\n    ret\n}\n", "err.tir").unwrap();
    let func = &mut module.functions[0];
    let label = func.insts[0].clone();
    func.insts.insert(1, label);
    let err = Backend::new(a8(), BackendConfig::default())
        .compile_function(func)
        .unwrap_err();
    assert!(matches!(err, CompileError::MalformedControlFlow { .. }), "{err}");
}

/// A machine whose SUB reads its operands from two different fixed registers.
fn fixed_pair_target() -> Target {
    let (r0, r1) = (PhysReg(0), PhysReg(1));
    Target::new(
        "pair",
        RegisterFile::new(&["R0", "R1", "R2"], r0),
        CCInfo {
            arg_regs: vec![PhysReg(2)],
            ret_reg: r0,
            caller_saved: RegSet::first(3),
            callee_saved: RegSet::new(),
        },
        DescriptorTable::new(vec![
            InstrDesc::new("MOV", 0x01, OpKind::Move, Category::Move)
                .dst(RegConstraint::Any)
                .src(OperandSpec::Reg(RegConstraint::Any))
                .reg_move(),
            InstrDesc::new("SUB", 0x02, OpKind::Binary(BinOp::Sub), Category::Arithmetic)
                .dst(RegConstraint::Any)
                .src(OperandSpec::Reg(RegConstraint::Fixed(r0)))
                .src(OperandSpec::Reg(RegConstraint::Fixed(r1))),
            InstrDesc::new("RET", 0x03, OpKind::Return, Category::Return),
        ]),
    )
}

#[test]
fn test_conflicting_fixed_registers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let target = fixed_pair_target();
    let module = parse_module("func @f(%a) {\n    %d = sub %a, %a\n    ret %d\n}\n", "err.tir").unwrap();
    let err = Backend::new(&target, BackendConfig::default())
        .compile_function(&module.functions[0])
        .unwrap_err();
    assert!(matches!(err, CompileError::UnallocatableConstraint { .. }), "{err}");
    assert!(err.to_string().contains("required in both R0 and R1"), "{err}");
    assert_eq!(err.phase(), Phase::RegisterAllocation);
    assert_eq!(err.location().line, 2);
}

#[test]
fn test_missing_descriptor() {
    let err = compile_one("func @f(%a, %n) {\n    %s = shl %a, %n\n    ret %s\n}\n", BackendConfig::default()).unwrap_err();
    match &err {
        CompileError::NoMatchingInstruction { function, shape, loc } => {
            assert_eq!(function, "f");
            assert_eq!(shape, "shl reg, reg");
            assert_eq!(loc.line, 2);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(err.phase(), Phase::InstructionSelection);
}

#[test]
fn test_round_limit() {
    let mut text = String::from("func @f() {\n");
    for i in 0..9 {
        text.push_str(&format!("    %x{i} = mov {i}\n"));
    }
    for i in 0..9 {
        text.push_str(&format!("    store [local {i}], %x{i}\n"));
    }
    text.push_str("    ret\n}\n");

    let err = compile_one(&text, BackendConfig::default().with_max_alloc_rounds(1)).unwrap_err();
    assert_eq!(
        err,
        CompileError::AllocationDiverged {
            function: "f".to_string(),
            rounds: 1
        }
    );
    assert_eq!(err.phase(), Phase::RegisterAllocation);
    assert!(compile_one(&text, BackendConfig::default()).is_ok());
}

#[test]
fn test_module_reports_every_failure() {
    let _ = env_logger::builder().is_test(true).try_init();
    let text = r#"
func @ok(%a) {
    %b = add %a, 2
    ret %b
}
func @bad_label() {
    jmp ^nowhere
}
func @bad_shift(%a, %n) {
    %s = shr %a, %n
    ret %s
}
func @also_ok() {
    ret
}
"#;
    let module = parse_module(text, "mixed.tir").unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = Backend::new(a8(), BackendConfig::default()).compile_module(&module, &session);

    assert!(!output.succeeded());
    assert_eq!(output.functions.len(), 2);
    assert!(output.function("ok").is_some());
    assert!(output.function("also_ok").is_some());

    let diags: Vec<_> = output.diagnostics.iter().collect();
    assert_eq!(diags.len(), 2);
    assert!(diags.iter().all(|d| d.severity == Severity::Error && d.source == "mixed.tir"));
    let phases: Vec<Phase> = diags.iter().map(|d| d.phase).collect();
    assert!(phases.contains(&Phase::ControlFlow));
    assert!(phases.contains(&Phase::InstructionSelection));
    let label = diags.iter().find(|d| d.phase == Phase::ControlFlow).unwrap();
    assert_eq!(label.location.line, 7);
    assert!(label.to_string().starts_with("mixed.tir:7:5: error [control-flow]:"));

    let stats = session.stats();
    assert_eq!(stats.functions_compiled, 2);
    assert_eq!(stats.functions_failed, 2);
}
