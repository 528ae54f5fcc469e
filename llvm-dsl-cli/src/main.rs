//! Verify, convert, link and optimize LLVM modules on the command line.

use clap::Parser as _;
use llvm_dsl_cli::CliArgs;

fn main() {
    let mut args = CliArgs::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.verbose.tracing_level_filter())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = args.command.run() {
        if !args.verbose.is_silent() {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}
