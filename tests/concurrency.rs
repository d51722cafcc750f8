//! Functions share nothing mutable, so they can be compiled on separate
//! threads against one backend and one target.

use acc8::arch8::a8;
use acc8::core::BackendConfig;
use acc8::isel::Printer;
use acc8::pipeline::Backend;
use acc8::test_ir::parse_module;

const MODULE: &str = r#"
func @add3(%a, %b, %c) {
    %s = add %a, %b
    %t = add %s, %c
    ret %t
}

func @count(%n) {
entry:
    %s = mov 0
loop:
    %s = add %s, %n
    %n = sub %n, 1
    br %n, ^loop
    ret %s
}

func @pressure() {
    %x0 = mov 0
    %x1 = mov 1
    %x2 = mov 2
    %x3 = mov 3
    %x4 = mov 4
    %x5 = mov 5
    %x6 = mov 6
    %x7 = mov 7
    %x8 = mov 8
    store [local 0], %x0
    store [local 1], %x1
    store [local 2], %x2
    store [local 3], %x3
    store [local 4], %x4
    store [local 5], %x5
    store [local 6], %x6
    store [local 7], %x7
    store [local 8], %x8
    ret
}
"#;

#[test]
fn test_parallel_compilation_matches_sequential() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut text = MODULE.to_string();
    // more functions than cores on most machines
    for i in 0..8 {
        text.push_str(&format!(
            "func @leaf{i}(%a) {{\n    %b = xor %a, {i}\n    ret %b\n}}\n"
        ));
    }
    let module = parse_module(&text, "parallel.tir").unwrap();
    let backend = Backend::new(a8(), BackendConfig::default());
    let printer = Printer::new(a8());

    let sequential: Vec<String> = module
        .functions
        .iter()
        .map(|f| printer.listing(&backend.compile_function(f).unwrap().code))
        .collect();

    let parallel: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = module
            .functions
            .iter()
            .map(|f| {
                let (backend, printer) = (&backend, &printer);
                scope.spawn(move || printer.listing(&backend.compile_function(f).unwrap().code))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(sequential.len(), module.functions.len());
    assert_eq!(sequential, parallel);
}
