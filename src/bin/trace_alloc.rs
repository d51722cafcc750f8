//! trace_alloc - run the acc8 backend on a TIR file and dump its artifacts.
//!
//! Without any `--print-*` flag the selected code is printed. `--check`
//! treats the input as a test file and verifies its CHECK directives
//! instead. Set `RUST_LOG=acc8=debug` to follow the phases.

use acc8::arch8::a8;
use acc8::core::config::{BackendConfig, CoalescingStrategy};
use acc8::core::session::CompilationSession;
use acc8::pipeline::Backend;
use acc8::test_ir::{parse_module, render, RunOptions, TestRunner};
use bumpalo::Bump;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// trace_alloc - trace register allocation and instruction selection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the parsed IR.
    #[arg(long)]
    print_ir: bool,

    /// Print blocks, edges, dominators and loops.
    #[arg(long)]
    print_cfg: bool,

    /// Print live-in and live-out sets per block.
    #[arg(long)]
    print_liveness: bool,

    /// Print the register assignment.
    #[arg(long)]
    print_alloc: bool,

    /// Print the selected machine code.
    #[arg(long)]
    print_code: bool,

    /// Conservative coalescing test.
    #[arg(long, default_value_t = CoalescingStrategy::Briggs)]
    coalescing: CoalescingStrategy,

    /// Maximum build/color/spill rounds per function.
    #[arg(long, default_value_t = 32)]
    max_rounds: usize,

    /// Keep self-moves and redundant move pairs.
    #[arg(long)]
    no_peephole: bool,

    /// Verify the CHECK directives of the input instead of printing.
    #[arg(long)]
    check: bool,

    /// Print compilation statistics after the dumps.
    #[arg(long)]
    stats: bool,

    /// Input TIR file.
    input: PathBuf,
}

impl Args {
    fn run_options(&self) -> RunOptions {
        let any = self.print_ir || self.print_cfg || self.print_liveness || self.print_alloc || self.print_code;
        RunOptions {
            print_ir: self.print_ir,
            print_cfg: self.print_cfg,
            print_liveness: self.print_liveness,
            print_alloc: self.print_alloc,
            print_code: self.print_code || !any,
            config: BackendConfig::default()
                .with_coalescing(self.coalescing)
                .with_max_alloc_rounds(self.max_rounds)
                .with_peephole(!self.no_peephole),
        }
    }
}

fn trace_main(args: &Args) -> Result<bool, String> {
    let target = a8();
    if args.check {
        TestRunner::new(target).run_file(&args.input)?;
        println!("{}: passed", args.input.display());
        return Ok(true);
    }

    let text = std::fs::read_to_string(&args.input).map_err(|e| format!("{}: {e}", args.input.display()))?;
    let source = args.input.display().to_string();
    let module = parse_module(&text, &source).map_err(|e| format!("{source}:{e}"))?;
    let options = args.run_options();
    println!("{}", render(&module, target, &options));

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = Backend::new(target, options.config).compile_module(&module, &session);
    for diag in output.diagnostics.iter() {
        eprintln!("{diag}");
    }
    if args.stats {
        let stats = session.stats();
        println!(
            "; {} compiled, {} failed, {} instructions, {} rounds, {} spills, {} moves coalesced",
            stats.functions_compiled,
            stats.functions_failed,
            stats.machine_instructions,
            stats.alloc_rounds,
            stats.spills_generated,
            stats.moves_coalesced
        );
    }
    Ok(output.succeeded())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match trace_main(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("trace_alloc: {err}");
            ExitCode::from(2)
        }
    }
}
