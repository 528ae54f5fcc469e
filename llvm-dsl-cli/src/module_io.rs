//! Input/output arguments shared by the subcommands.

use std::io::{BufReader, Read};

use clio::{Input, Output};
use llvm_dsl::Module;
use tracing::debug;

use crate::CliError;

/// Arguments for reading a module.
#[derive(Debug, clap::Args)]
pub struct ModuleInputArgs {
    /// Input file, as textual IR or bitcode. Defaults to `-` for stdin.
    #[arg(value_parser, default_value = "-", help_heading = "Input")]
    pub input: Input,
}

impl ModuleInputArgs {
    /// Read the module from the input.
    pub fn get_module(&mut self) -> Result<Module, CliError> {
        debug!(input = ?self.input.path(), "reading module");
        Ok(Module::read_from(BufReader::new(&mut self.input))?)
    }

    /// Read the module from `reader` instead of the input.
    pub fn get_module_from_reader<R: Read>(&self, reader: R) -> Result<Module, CliError> {
        Ok(Module::read_from(BufReader::new(reader))?)
    }

    /// Read the module from `input_override` if given, else from the input.
    pub fn get_module_with_reader<R: Read>(
        &mut self,
        input_override: Option<R>,
    ) -> Result<Module, CliError> {
        match input_override {
            Some(reader) => self.get_module_from_reader(reader),
            None => self.get_module(),
        }
    }
}

/// Arguments for writing a module.
#[derive(Debug, clap::Args)]
pub struct ModuleOutputArgs {
    /// Output file. Use '-' for stdout.
    #[clap(short, long, value_parser, default_value = "-", help_heading = "Output")]
    pub output: Output,

    /// Write bitcode instead of textual IR.
    #[clap(long, help_heading = "Output")]
    pub binary: bool,
}

impl ModuleOutputArgs {
    /// Write `module` to the output.
    pub fn write_module(&mut self, module: &Module) -> Result<(), CliError> {
        module.write_to(&mut self.output, self.binary)?;
        Ok(())
    }
}
