//! Disasm command implementation.

use clap::Args;
use smr_code::format_descriptor;

use crate::cli::CliConfig;
use crate::commands::common::DescriptorInput;
use crate::Result;

/// Arguments for the disasm command
#[derive(Debug, Clone, Args)]
pub struct DisasmArgs {
    #[command(flatten)]
    pub input: DescriptorInput,
}

pub async fn disasm_command(args: DisasmArgs, _config: &CliConfig) -> Result<()> {
    let descriptor = args.input.load()?;
    print!("{}", format_descriptor(&descriptor));
    Ok(())
}
