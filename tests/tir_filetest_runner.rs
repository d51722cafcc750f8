//! Dynamic test runner for TIR filetest files.
//!
//! Discovers every .tir file below `tests/filetests` and runs it against the
//! accumulator target, checking the output against the file's directives.

use acc8::arch8::a8;
use acc8::test_ir::TestRunner;
use std::fs;
use std::path::{Path, PathBuf};

/// Discovers all .tir files in a directory recursively
fn discover_tir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(discover_tir_files(&path));
            } else if path.extension().and_then(|s| s.to_str()) == Some("tir") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

fn filetest_dir(sub: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetests").join(sub)
}

// Generate tests for each directory
macro_rules! generate_tir_tests {
    ($test_name:ident, $dir:expr) => {
        mod $test_name {
            use super::*;

            #[test]
            fn run_all_tir_files() {
                let _ = env_logger::builder().is_test(true).try_init();
                let files = discover_tir_files(&filetest_dir($dir));
                assert!(!files.is_empty(), "no .tir files found in {}", $dir);

                let runner = TestRunner::new(a8());
                let mut failures = Vec::new();
                for file in &files {
                    match runner.run_file(file) {
                        Ok(()) => println!("PASS {}", file.display()),
                        Err(e) => {
                            println!("FAIL {}", file.display());
                            failures.push(e);
                        }
                    }
                }

                if !failures.is_empty() {
                    eprintln!("\nFailures:");
                    for error in &failures {
                        eprintln!("  {error}");
                    }
                    panic!("{} of {} tests failed", failures.len(), files.len());
                }
            }
        }
    };
}

generate_tir_tests!(analysis_tests, "analysis");
generate_tir_tests!(codegen_tests, "codegen");
