//! smrun CLI library
//!
//! Command implementations behind the `smrun` binary: running serialized
//! function descriptors, compiling Python functions into descriptors and
//! disassembling them.

pub mod cli;
pub mod commands;
pub mod diagnostics;

pub mod error {
    use std::path::PathBuf;

    use smr_python::CompileError;
    use smr_runner::RunnerError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CliError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Compilation error in {}: {error}", .file.display())]
        Compilation {
            file: PathBuf,
            text: String,
            #[source]
            error: CompileError,
        },

        #[error("Invalid input: {0}")]
        InvalidInput(String),

        #[error("{0}")]
        Runner(#[from] RunnerError),

        #[error("Invocation timed out after {0}s")]
        Timeout(u64),

        #[error("Invocation task failed: {0}")]
        Task(String),
    }

    pub type Result<T> = std::result::Result<T, CliError>;
}

pub use error::{CliError, Result};
