//! Command-line driver: compile one preprocessed C source file into one
//! x86-64 ELF relocatable object.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "smallcc", about = "A small C compiler targeting x86-64 ELF")]
struct Args {
    /// Preprocessed C source file.
    input: PathBuf,

    /// Object file to write.
    #[arg(short, long, default_value = "a.o")]
    output: PathBuf,

    /// Enable verbose logging (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let object = match smallcc::compile(&source) {
        Ok(object) => object,
        Err(e) => {
            // Diagnostics render as path:line:col: message.
            eprintln!("{}:{}", args.input.display(), e);
            process::exit(1);
        }
    };

    std::fs::write(&args.output, object)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    Ok(())
}
