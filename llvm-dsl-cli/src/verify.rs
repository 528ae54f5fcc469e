//! The `verify` subcommand.

use std::io::Read;

use clap::Parser;

use crate::CliError;
use crate::module_io::ModuleInputArgs;

/// Check a module with the LLVM verifier.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Verify an LLVM module.")]
#[non_exhaustive]
pub struct VerifyArgs {
    /// Module input.
    #[command(flatten)]
    pub input_args: ModuleInputArgs,
}

/// String to print when verification succeeds.
pub const VALID_PRINT: &str = "Module valid!";

impl VerifyArgs {
    /// Verify the module, reading it from `input_override` if given.
    pub fn run_with_input<R: Read>(&mut self, input_override: Option<R>) -> Result<(), CliError> {
        let module = self.input_args.get_module_with_reader(input_override)?;
        module.verify()?;
        eprintln!("{VALID_PRINT}");
        Ok(())
    }

    /// Verify the module.
    pub fn run(&mut self) -> Result<(), CliError> {
        self.run_with_input(None::<&[u8]>)
    }
}
