//! The `link` subcommand.

use clap::Parser;
use clio::Input;
use llvm_dsl::Module;
use tracing::debug;

use crate::CliError;
use crate::module_io::ModuleOutputArgs;

/// Link several modules into one.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Link LLVM modules into one.")]
#[non_exhaustive]
pub struct LinkArgs {
    /// Input modules. The first one is the module the others are linked into.
    #[arg(value_parser, required = true, help_heading = "Input")]
    pub inputs: Vec<Input>,

    /// Module output.
    #[command(flatten)]
    pub output_args: ModuleOutputArgs,
}

impl LinkArgs {
    /// Read every input and link them in order.
    pub fn link_inputs(&mut self) -> Result<Module, CliError> {
        let mut inputs = self.inputs.iter_mut();
        let first = inputs.next().ok_or(CliError::NoInput)?;
        let linked = Module::read_from(&mut *first)?;
        for input in inputs {
            debug!(input = ?input.path(), "linking");
            let other = Module::read_from(&mut *input)?;
            linked.link(&other)?;
        }
        Ok(linked)
    }

    /// Link the inputs and write the result.
    pub fn run(&mut self) -> Result<(), CliError> {
        let linked = self.link_inputs()?;
        linked.verify()?;
        self.output_args.write_module(&linked)
    }
}
