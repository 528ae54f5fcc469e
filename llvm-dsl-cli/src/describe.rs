//! The `describe` subcommand.

use std::io::Write;

use clap::Parser;
use clio::Output;
use llvm_dsl::{Module, Typed};

use crate::CliError;
use crate::module_io::ModuleInputArgs;

/// List the symbols of a module.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Describe the symbols of an LLVM module.")]
#[non_exhaustive]
pub struct DescribeArgs {
    /// Module input.
    #[command(flatten)]
    pub input_args: ModuleInputArgs,

    /// Output file. Use '-' for stdout.
    #[clap(short, long, value_parser, default_value = "-")]
    pub output: Output,
}

/// One line per symbol: name, whether it has a definition, and its type.
pub fn describe(module: &Module, mut out: impl Write) -> Result<(), CliError> {
    writeln!(out, "module {}", module.name())?;
    for name in module.symbol_names() {
        let Some(symbol) = module.symbol(&name) else {
            continue;
        };
        let kind = match symbol.as_const().function() {
            Ok(f) if f.count_basic_blocks() == 0 => "declare",
            Ok(_) => "define",
            Err(_) => "global",
        };
        writeln!(out, "{kind} {name}: {}", symbol.type_of())?;
    }
    Ok(())
}

impl DescribeArgs {
    /// Describe the module.
    pub fn run(&mut self) -> Result<(), CliError> {
        let module = self.input_args.get_module()?;
        describe(&module, &mut self.output)
    }
}
