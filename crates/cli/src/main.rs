//! `lit` — the command-line entry point for the bytecode interpreter.
//!
//! Three forms: `lit <file>` reads and runs a script, `lit -e <code>` runs
//! an inline source string, `lit -h`/`--help` prints usage. Exit codes
//! follow the external contract exactly: 0 on success, 2 on a compile or
//! runtime failure, and a distinct code for CLI misuse (bad/missing
//! arguments) so scripts can tell "your program failed" apart from "you
//! called `lit` wrong".

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};

use lit_core::Heap;

/// CLI misuse (bad arguments, no input given) is reported with this exit
/// code; `process::exit` truncates to the low 8 bits, so this surfaces to
/// the shell as 255.
const MISUSE_EXIT_CODE: i32 = -1;
const FAILURE_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "lit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interpreter for the lit language", long_about = None)]
struct Cli {
    /// Script file to compile and run
    file: Option<PathBuf>,

    /// Compile and execute CODE instead of reading a file
    #[arg(short = 'e', long = "exec", value_name = "CODE")]
    exec: Option<String>,

    /// Print a shell completion script for SHELL and exit
    #[arg(long, value_enum, exclusive = true)]
    completions: Option<Shell>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help/--version are not misuse: clap already printed them.
            let _ = e.print();
            if e.use_stderr() {
                process::exit(MISUSE_EXIT_CODE);
            }
            process::exit(0);
        }
    };

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
        process::exit(0);
    }

    let source = match (cli.file, cli.exec) {
        (Some(_), Some(_)) => {
            eprintln!("lit: pass a script file or -e <code>, not both.");
            process::exit(MISUSE_EXIT_CODE);
        }
        (None, None) => {
            eprintln!("lit: expected a script file or -e <code>. Try `lit --help`.");
            process::exit(MISUSE_EXIT_CODE);
        }
        (Some(path), None) => match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Error: could not read {}: {e}", path.display());
                process::exit(FAILURE_EXIT_CODE);
            }
        },
        (None, Some(code)) => code,
    };

    process::exit(run(&source));
}

/// Compiles and executes `source` against a fresh heap/VM, returning the
/// process exit code.
fn run(source: &str) -> i32 {
    let mut heap = Heap::new();
    let function = match lit_compiler::compile(source, &mut heap) {
        Ok(function) => function,
        Err(e) => {
            eprintln!("Error: {e}");
            return FAILURE_EXIT_CODE;
        }
    };

    let mut vm = lit_runtime::Vm::new(heap);
    lit_runtime::define_lib(&mut vm);
    match vm.execute(function) {
        Ok(_) => 0,
        Err(e) => {
            eprint!("{e}");
            FAILURE_EXIT_CODE
        }
    }
}
