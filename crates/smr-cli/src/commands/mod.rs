//! Command implementations for the smrun CLI

pub mod common;
pub mod compile;
pub mod disasm;
pub mod run;

pub use compile::compile_command;
pub use disasm::disasm_command;
pub use run::run_command;

use std::path::PathBuf;

use crate::{CliError, Result};

/// Validate that all provided paths exist (and optionally are files).
pub fn validate_paths_exist(inputs: &[PathBuf], must_be_files: bool) -> Result<()> {
    for input in inputs {
        if !input.exists() {
            return Err(CliError::InvalidInput(format!(
                "Input path does not exist: {}",
                input.display()
            )));
        }
        if must_be_files && !input.is_file() {
            return Err(CliError::InvalidInput(format!(
                "Input path is not a file: {}",
                input.display()
            )));
        }
    }
    Ok(())
}
