//! FileCheck-style test validation for TIR files.
//!
//! A test file is ordinary TIR with directives in comments. `; RUN:` lines
//! choose what the backend dumps, and the `; CHECK` family describes what
//! the dump must contain, similar to LLVM's FileCheck but matched on plain
//! substrings with whitespace runs collapsed.

use super::parser::parse_module;
use super::print_module;
use crate::analysis::{Cfg, Liveness, VRegSet};
use crate::core::config::BackendConfig;
use crate::core::ir::{Function, Module};
use crate::isel::Printer;
use crate::pipeline::{Backend, CompiledFunction};
use crate::regalloc::Placement;
use crate::target::Target;
use std::path::Path;

/// A CHECK directive extracted from a TIR file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match on this or a later line
    Check(String),
    /// CHECK-LABEL: pattern - Start of a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the line after the previous match
    CheckNext(String),
    /// CHECK-NOT: pattern - Must not occur before the next match
    CheckNot(String),
    /// CHECK-EMPTY - The line after the previous match is empty
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to execute the test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a TIR file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub tir_content: String,
}

impl TestSpec {
    /// Parse a TIR file to extract test specifications
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut tir_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    });
                }
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else {
                tir_lines.push(line);
                continue;
            }
            // Keep line numbers of the IR intact.
            tir_lines.push("");
        }

        if run_directives.is_empty() {
            return Err("No RUN directives found".to_string());
        }

        Ok(TestSpec {
            run_directives,
            check_directives,
            tir_content: tir_lines.join("\n"),
        })
    }
}

/// What a run dumps, and the backend configuration it compiles with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub print_ir: bool,
    pub print_cfg: bool,
    pub print_liveness: bool,
    pub print_alloc: bool,
    pub print_code: bool,
    pub config: BackendConfig,
}

impl RunOptions {
    /// Interpret RUN-line arguments. `%s` and other non-option words are ignored.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, String> {
        let mut options = RunOptions::default();
        let mut iter = args.iter().map(AsRef::as_ref);
        while let Some(arg) = iter.next() {
            match arg {
                "--print-ir" => options.print_ir = true,
                "--print-cfg" => options.print_cfg = true,
                "--print-liveness" => options.print_liveness = true,
                "--print-alloc" => options.print_alloc = true,
                "--print-code" => options.print_code = true,
                "--no-peephole" => options.config.peephole = false,
                "--coalescing" => {
                    let value = iter.next().ok_or("--coalescing needs a value")?;
                    options.config.coalescing = value
                        .parse()
                        .map_err(|_| format!("unknown coalescing strategy `{value}`"))?;
                }
                "--max-rounds" => {
                    let value = iter.next().ok_or("--max-rounds needs a value")?;
                    options.config.max_alloc_rounds = value
                        .parse()
                        .map_err(|_| format!("invalid round limit `{value}`"))?;
                }
                other if other.starts_with("--") => return Err(format!("unknown option `{other}`")),
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Produce the dumps `options` asks for, one section per function.
///
/// Analysis dumps describe the function as written; allocation and code
/// dumps describe the function after lowering. A function that fails to
/// compile contributes its diagnostic instead.
pub fn render(module: &Module, target: &Target, options: &RunOptions) -> String {
    let mut out: Vec<String> = Vec::new();
    if options.print_ir {
        out.push("Printing IR".to_string());
        out.extend(print_module(module).lines().map(str::to_string));
    }

    let backend = Backend::new(target, options.config.clone());
    for func in &module.functions {
        if options.print_cfg || options.print_liveness {
            match Cfg::build(func, 0) {
                Ok(cfg) => {
                    if options.print_cfg {
                        render_cfg(&mut out, func, &cfg);
                    }
                    if options.print_liveness {
                        render_liveness(&mut out, func, &cfg, &Liveness::compute(func, &cfg));
                    }
                }
                Err(err) => out.push(err.to_diagnostic(&module.source).to_string()),
            }
        }
        if options.print_alloc || options.print_code {
            match backend.compile_function(func) {
                Ok(compiled) => {
                    if options.print_alloc {
                        render_alloc(&mut out, target, &compiled);
                    }
                    if options.print_code {
                        out.push(format!("Code for {}", compiled.name));
                        let listing = Printer::new(target)
                            .with_function(&compiled.lowered)
                            .with_symbols(&module.symbols)
                            .listing(&compiled.code);
                        out.extend(listing.lines().map(str::to_string));
                        out.push("End Code".to_string());
                    }
                }
                Err(err) => out.push(err.to_diagnostic(&module.source).to_string()),
            }
        }
    }
    out.join("\n")
}

fn block_name(func: &Function, cfg: &Cfg, b: usize) -> String {
    match cfg.block(b).label {
        Some(l) => func.label_name(l),
        None => format!("bb{b}"),
    }
}

fn index_list(items: impl Iterator<Item = usize>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

fn value_list(func: &Function, set: &VRegSet) -> String {
    set.iter()
        .map(|&v| format!("%{}", func.vreg_name(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_cfg(out: &mut Vec<String>, func: &Function, cfg: &Cfg) {
    out.push(format!("CFG for {}", func.name));
    for block in cfg.blocks() {
        let b = block.index;
        out.push(format!(
            "  {b} {}: succs [{}] preds [{}] doms [{}] depth {}",
            block_name(func, cfg, b),
            index_list(block.succs.iter().copied()),
            index_list(block.preds.iter().copied()),
            index_list(cfg.dominators_of(b).iter()),
            cfg.loop_depth(b)
        ));
    }
    for lp in cfg.loops() {
        out.push(format!(
            "  loop {}: latches [{}] body [{}]",
            lp.header,
            index_list(lp.latches.iter().copied()),
            index_list(lp.body.iter())
        ));
    }
    out.push("End CFG".to_string());
}

fn render_liveness(out: &mut Vec<String>, func: &Function, cfg: &Cfg, liveness: &Liveness) {
    out.push(format!("Liveness for {}", func.name));
    for block in cfg.blocks() {
        let b = block.index;
        out.push(format!(
            "  {b} {}: in [{}] out [{}]",
            block_name(func, cfg, b),
            value_list(func, liveness.live_in(b)),
            value_list(func, liveness.live_out(b))
        ));
    }
    out.push("End Liveness".to_string());
}

fn render_alloc(out: &mut Vec<String>, target: &Target, compiled: &CompiledFunction) {
    let alloc = &compiled.allocation;
    out.push(format!(
        "Allocation for {}: {} rounds, {} spilled, {} moves coalesced",
        compiled.name,
        alloc.rounds,
        alloc.spilled.len(),
        alloc.coalesced_moves
    ));
    for (v, placement) in alloc.assignment.iter() {
        let place = match placement {
            Placement::Reg(r) => target.regs.name(r).to_string(),
            Placement::Spilled(slot) => format!("[{slot}]"),
        };
        out.push(format!("  %{}: {place}", compiled.lowered.vreg_name(v)));
    }
    out.push("End Allocation".to_string());
}

/// Runs TIR test files against one target.
pub struct TestRunner<'t> {
    target: &'t Target,
}

impl<'t> TestRunner<'t> {
    pub fn new(target: &'t Target) -> Self {
        Self { target }
    }

    /// Read, run and check one test file.
    pub fn run_file(&self, path: &Path) -> Result<(), String> {
        let content = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let spec = TestSpec::parse(&content).map_err(|e| format!("{}: {e}", path.display()))?;
        self.run_test(&spec, &path.display().to_string())
    }

    /// Run every RUN line of `spec` and check its output.
    pub fn run_test(&self, spec: &TestSpec, source: &str) -> Result<(), String> {
        let module = parse_module(&spec.tir_content, source).map_err(|e| format!("{source}:{e}"))?;
        for run in &spec.run_directives {
            log::debug!("{source}: RUN {} {}", run.command, run.args.join(" "));
            let options = RunOptions::from_args(&run.args)?;
            let output = render(&module, self.target, &options);
            log::trace!("{source} output:\n{output}");
            validate_output(&output, &spec.check_directives)
                .map_err(|e| format!("{source}: {e}\n--- output ---\n{output}"))?;
        }
        Ok(())
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn line_matches(line: &str, pattern: &str) -> bool {
    collapse(line).contains(&collapse(pattern))
}

fn check_absent(lines: &[&str], first: usize, forbidden: &[&str]) -> Result<(), String> {
    for (offset, line) in lines.iter().enumerate() {
        if let Some(p) = forbidden.iter().find(|p| line_matches(line, p)) {
            return Err(format!(
                "CHECK-NOT: pattern `{p}` found on output line {}",
                first + offset + 1
            ));
        }
    }
    Ok(())
}

/// Check `output` against `directives` in order.
pub fn validate_output(output: &str, directives: &[CheckDirective]) -> Result<(), String> {
    let lines: Vec<&str> = output.lines().collect();
    let mut cursor = 0;
    let mut last_match: Option<usize> = None;
    let mut forbidden: Vec<&str> = Vec::new();

    for directive in directives {
        match directive {
            CheckDirective::Comment(_) => {}
            CheckDirective::CheckNot(pattern) => forbidden.push(pattern),
            CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                let found = (cursor..lines.len())
                    .find(|&i| line_matches(lines[i], pattern))
                    .ok_or_else(|| format!("CHECK: pattern `{pattern}` not found after output line {cursor}"))?;
                check_absent(&lines[cursor..found], cursor, &forbidden)?;
                forbidden.clear();
                last_match = Some(found);
                cursor = found + 1;
            }
            CheckDirective::CheckNext(pattern) => {
                let next = last_match
                    .map(|m| m + 1)
                    .ok_or_else(|| format!("CHECK-NEXT: `{pattern}` has no previous match"))?;
                match lines.get(next) {
                    Some(line) if line_matches(line, pattern) => {}
                    Some(line) => {
                        return Err(format!(
                            "CHECK-NEXT: expected `{pattern}` on output line {}, found `{line}`",
                            next + 1
                        ))
                    }
                    None => return Err(format!("CHECK-NEXT: expected `{pattern}` after the end of output")),
                }
                forbidden.clear();
                last_match = Some(next);
                cursor = next + 1;
            }
            CheckDirective::CheckEmpty => {
                let next = last_match.map_or(0, |m| m + 1);
                match lines.get(next) {
                    Some(line) if line.trim().is_empty() => {}
                    _ => return Err(format!("CHECK-EMPTY: output line {} is not empty", next + 1)),
                }
                forbidden.clear();
                last_match = Some(next);
                cursor = next + 1;
            }
        }
    }
    check_absent(&lines[cursor.min(lines.len())..], cursor, &forbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch8::a8;
    use crate::core::config::CoalescingStrategy;

    const INC: &str = r#"; RUN: acc8 --print-alloc --print-code %s
; COM: increment through the accumulator
func @inc(%x) {
    %y = add %x, 1
    ret %y
}
; CHECK-LABEL: Allocation for inc: 1 rounds, 0 spilled
; CHECK: End Allocation
; CHECK-LABEL: Code for inc
; CHECK-NOT: ADI
; CHECK: INR
; CHECK-NOT: CALL
; CHECK: RET
; CHECK-NEXT: End Code
"#;

    #[test]
    fn test_parse_test_spec() {
        let spec = TestSpec::parse(INC).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].command, "acc8");
        assert_eq!(spec.run_directives[0].args, vec!["--print-alloc", "--print-code", "%s"]);
        assert_eq!(spec.check_directives.len(), 9);
        assert!(!spec.tir_content.contains("CHECK"));
        assert!(spec.tir_content.contains("func @inc"));
        assert!(TestSpec::parse("func @f() {\n    ret\n}\n").is_err());
    }

    #[test]
    fn test_run_options() {
        let options = RunOptions::from_args(&["--print-cfg", "--coalescing", "george", "--max-rounds", "4", "--no-peephole", "%s"]).unwrap();
        assert!(options.print_cfg && !options.print_code);
        assert_eq!(options.config.coalescing, CoalescingStrategy::George);
        assert_eq!(options.config.max_alloc_rounds, 4);
        assert!(!options.config.peephole);
        assert!(RunOptions::from_args(&["--coalescing", "greedy"]).is_err());
        assert!(RunOptions::from_args(&["--print-everything"]).is_err());
    }

    #[test]
    fn test_validate_output() {
        let output = "Code for f\nentry:\n    MOV A, B\n    RET\n\nEnd Code";
        let check = |d: Vec<CheckDirective>| validate_output(output, &d);
        use CheckDirective::*;
        assert!(check(vec![CheckLabel("Code for f".into()), Check("MOV   A,  B".into()), CheckNext("RET".into()), CheckEmpty]).is_ok());
        assert!(check(vec![Check("RET".into()), Check("MOV".into())]).is_err());
        assert!(check(vec![Check("entry:".into()), CheckNext("RET".into())]).is_err());
        assert!(check(vec![Check("Code".into()), CheckNot("MOV".into()), Check("RET".into())]).is_err());
        assert!(check(vec![Check("MOV".into()), CheckNot("MOV".into())]).is_ok());
        assert!(check(vec![CheckNot("CALL".into())]).is_ok());
    }

    #[test]
    fn test_render_analysis_dumps() {
        let module = parse_module(
            "func @loop(%n) {\nhead:\n    %n = sub %n, 1\n    br %n, ^head\n    ret\n}\n",
            "t",
        )
        .unwrap();
        let options = RunOptions {
            print_cfg: true,
            print_liveness: true,
            ..RunOptions::default()
        };
        let output = render(&module, a8(), &options);
        let expected = [
            "CFG for loop",
            "  0 head: succs [0, 1] preds [0] doms [0] depth 1",
            "  1 bb1: succs [] preds [0] doms [0, 1] depth 0",
            "  loop 0: latches [0] body [0]",
            "End CFG",
            "Liveness for loop",
            "  0 head: in [%n] out [%n]",
            "  1 bb1: in [] out []",
            "End Liveness",
        ];
        assert_eq!(output.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_run_inc() {
        let spec = TestSpec::parse(INC).unwrap();
        TestRunner::new(a8()).run_test(&spec, "inc.tir").unwrap();
    }

    #[test]
    fn test_failures_render_as_diagnostics() {
        let module = parse_module("func @f() {\n    jmp ^nowhere\n}\n", "bad.tir").unwrap();
        let options = RunOptions {
            print_code: true,
            ..RunOptions::default()
        };
        let output = render(&module, a8(), &options);
        assert!(output.starts_with("bad.tir:2:5: error [control-flow]:"), "{output}");
    }
}
