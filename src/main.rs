use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use asmvm::processor::Processor;
use asmvm::program::Program;

/// Assembly language emulator
#[derive(Parser)]
struct Args {
    /// Program file to execute
    program: PathBuf,

    /// Print each executed instruction
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.program) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: {err}", args.program.display());
            return ExitCode::FAILURE;
        }
    };

    let program = match Program::parse(&source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut processor = Processor::new(program);
    let start = Instant::now();
    match processor.run(args.trace) {
        Ok(result) => {
            let elapsed = start.elapsed();
            if let Some(value) = result {
                println!("Returned value: {value}");
            }
            println!("Execution time: {}ms", elapsed.as_millis());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
