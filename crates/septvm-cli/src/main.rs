use std::{env, path::PathBuf, process::ExitCode};

use septvm::{Machine, NoopTracer, StderrTracer};

fn main() -> ExitCode {
    let mut trace = false;
    let mut path: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--trace" => trace = true,
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("error: unknown option '{other}'");
                print_usage();
                return ExitCode::FAILURE;
            }
            other => {
                if path.replace(PathBuf::from(other)).is_some() {
                    eprintln!("error: more than one module file given");
                    return ExitCode::FAILURE;
                }
            }
        }
    }
    let Some(path) = path else {
        print_usage();
        return ExitCode::FAILURE;
    };

    let mut machine = Machine::new();
    let module = match machine.load_module_file(&path) {
        Ok(module) => module,
        Err(exc) => {
            eprintln!("{}", exc.message());
            return ExitCode::FAILURE;
        }
    };

    let result = if trace {
        machine.run_module_traced(module, &mut StderrTracer)
    } else {
        machine.run_module_traced(module, &mut NoopTracer)
    };
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(exc) => {
            // An uncaught exception reached the outer frame: report and
            // terminate with a non-zero status.
            eprintln!("{}", exc.message());
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("usage: september [--trace] <module-file>");
}
