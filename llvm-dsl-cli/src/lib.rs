//! Standard command line tools, used by the llvm-dsl binary.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use thiserror::Error;

pub mod convert;
pub mod describe;
pub mod link;
pub mod module_io;
pub mod optimize;
pub mod verify;

/// CLI arguments.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Tools for LLVM modules.")]
#[non_exhaustive]
pub struct CliArgs {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: CliCommand,
    /// Verbosity.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}

/// The subcommands of the CLI.
#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum CliCommand {
    /// Check a module with the LLVM verifier.
    Verify(verify::VerifyArgs),
    /// Rewrite a module as textual IR or bitcode.
    Convert(convert::ConvertArgs),
    /// Link several modules into one.
    Link(link::LinkArgs),
    /// Run a standard optimization pipeline over a module.
    Optimize(optimize::OptimizeArgs),
    /// List the symbols defined and declared by a module.
    Describe(describe::DescribeArgs),
}

/// Error type for the CLI.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    /// Error reading input or writing output.
    #[error("Error reading from path: {0}")]
    InputFile(#[from] std::io::Error),
    /// Error reported by the IR layer.
    #[error(transparent)]
    Module(#[from] llvm_dsl::Error),
    /// A subcommand that needs at least one input got none.
    #[error("No input modules given")]
    NoInput,
}

impl CliCommand {
    /// Runs the subcommand.
    pub fn run(&mut self) -> Result<(), CliError> {
        match self {
            CliCommand::Verify(args) => args.run(),
            CliCommand::Convert(args) => args.run(),
            CliCommand::Link(args) => args.run(),
            CliCommand::Optimize(args) => args.run(),
            CliCommand::Describe(args) => args.run(),
        }
    }
}
