//! Compile command implementation.

use std::path::PathBuf;

use clap::Args;
use serde_json::Value as Json;
use smr_python::{compile_function, function_names, CompileError};
use tracing::info;

use crate::cli::CliConfig;
use crate::commands::common::render_json;
use crate::{CliError, Result};

/// Arguments for the compile command
#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    /// Python source file
    pub source: PathBuf,

    /// Function to compile (defaults to the only top-level function)
    #[arg(long)]
    pub name: Option<String>,

    /// Include declared default values in the record
    #[arg(long)]
    pub with_defaults: bool,

    /// Write the record to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn compile_command(args: CompileArgs, config: &CliConfig) -> Result<()> {
    crate::commands::validate_paths_exist(&[args.source.clone()], true)?;
    let text = std::fs::read_to_string(&args.source)?;
    let filename = args.source.display().to_string();
    let compilation_error = |error: CompileError| CliError::Compilation {
        file: args.source.clone(),
        text: text.clone(),
        error,
    };

    let name = match &args.name {
        Some(name) => name.clone(),
        None => {
            let names = function_names(&text, &filename).map_err(compilation_error)?;
            match names.as_slice() {
                [only] => only.clone(),
                [] => {
                    return Err(CliError::InvalidInput(format!(
                        "{} defines no top-level functions",
                        filename
                    )))
                }
                many => {
                    return Err(CliError::InvalidInput(format!(
                        "{} defines several functions ({}), pick one with --name",
                        filename,
                        many.join(", ")
                    )))
                }
            }
        }
    };

    let descriptor = compile_function(&text, &filename, &name).map_err(compilation_error)?;
    let record = Json::Object(descriptor.to_record(args.with_defaults));
    let rendered = render_json(&record, config.output.pretty);

    match &args.output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", rendered))?;
            info!("Compiled '{}' to {}", name, path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
