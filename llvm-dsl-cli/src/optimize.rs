//! The `optimize` subcommand.

use clap::Parser;
use llvm_dsl::OptLevel;
use tracing::info;

use crate::CliError;
use crate::module_io::{ModuleInputArgs, ModuleOutputArgs};

/// Run a standard optimization pipeline over a module.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Optimize an LLVM module.")]
#[non_exhaustive]
pub struct OptimizeArgs {
    /// Module input.
    #[command(flatten)]
    pub input_args: ModuleInputArgs,

    /// Module output.
    #[command(flatten)]
    pub output_args: ModuleOutputArgs,

    /// Optimization level. One of: 0, 1, 2, 3, s, z
    #[clap(short = 'O', long = "opt-level", value_name = "LEVEL", default_value = "2")]
    pub level: OptLevel,
}

impl OptimizeArgs {
    /// Verify, optimize and write the module.
    pub fn run(&mut self) -> Result<(), CliError> {
        let module = self.input_args.get_module()?;
        module.verify()?;
        module.optimize(self.level)?;
        info!(level = %self.level, "optimized module");
        self.output_args.write_module(&module)
    }
}
