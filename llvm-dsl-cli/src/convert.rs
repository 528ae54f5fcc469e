//! Convert a module between textual IR and bitcode.

use std::io::{Read, Write};

use clap::Parser;

use crate::CliError;
use crate::module_io::{ModuleInputArgs, ModuleOutputArgs};

/// Rewrite a module as textual IR or bitcode.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Convert an LLVM module between textual IR and bitcode.")]
#[non_exhaustive]
pub struct ConvertArgs {
    /// Module input.
    #[command(flatten)]
    pub input_args: ModuleInputArgs,

    /// Module output.
    #[command(flatten)]
    pub output_args: ModuleOutputArgs,

    /// Run the verifier before writing.
    #[clap(long)]
    pub verify: bool,
}

impl ConvertArgs {
    /// Convert the module with optional input/output overrides.
    ///
    /// # Arguments
    ///
    /// * `input_override` - Optional reader to use instead of the CLI input argument.
    /// * `output_override` - Optional writer to use instead of the CLI output argument.
    pub fn run_convert_with_io<R: Read, W: Write>(
        &mut self,
        input_override: Option<R>,
        output_override: Option<W>,
    ) -> Result<(), CliError> {
        let module = self.input_args.get_module_with_reader(input_override)?;
        if self.verify {
            module.verify()?;
        }
        match output_override {
            Some(writer) => module.write_to(writer, self.output_args.binary)?,
            None => self.output_args.write_module(&module)?,
        }
        Ok(())
    }

    /// Convert the module.
    pub fn run(&mut self) -> Result<(), CliError> {
        self.run_convert_with_io(None::<&[u8]>, None::<Vec<u8>>)
    }
}
