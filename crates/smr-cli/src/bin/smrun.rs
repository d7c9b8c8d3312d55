//! smrun CLI Binary
//!
//! Runs serialized compiled functions and produces the descriptors they
//! travel as.
//!
//! # Usage
//!
//! ```bash
//! # Compile a Python function into a descriptor record
//! smrun compile greet.py --name greet --output greet.json
//!
//! # Invoke it with positional and keyword arguments
//! smrun run --file greet.json dude --kw punct='"?"'
//!
//! # Print the full response envelope
//! smrun run --file greet.json dude --json --pretty
//!
//! # Show the decoded instructions
//! smrun disasm --file greet.json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use smr_cli::{
    cli::CliConfig,
    commands::{self, compile::CompileArgs, disasm::DisasmArgs, run::RunArgs},
    diagnostics::setup_error_reporting,
    Result,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "smrun",
    version = env!("CARGO_PKG_VERSION"),
    about = "smrun: run serialized compiled functions",
    long_about = r#"
smrun reconstructs a compiled function from its descriptor record, invokes it
with the given arguments and reports the outcome as a JSON-RPC style envelope.

EXAMPLES:
    smrun compile greet.py --output greet.json
    smrun run --file greet.json dude
    smrun run --data "$(cat greet.json)" --json
    smrun disasm --file greet.json
    "#
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Set log level (overrides --verbose/--quiet)
    #[arg(long, global = true, value_enum)]
    log: Option<LogLevel>,

    /// Set log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a descriptor and print its result
    Run(RunArgs),

    /// Compile a Python function into a descriptor record
    Compile(CompileArgs),

    /// Disassemble a descriptor
    Disasm(DisasmArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_error_reporting()?;
    setup_logging(cli.verbose, cli.quiet, cli.log, cli.log_format)?;

    let config = match CliConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run_command(args, &config).await,
        Commands::Compile(args) => commands::compile_command(args, &config).await,
        Commands::Disasm(args) => commands::disasm_command(args, &config).await,
    };

    match result {
        Ok(_) => {
            if cli.verbose > 0 {
                info!("Command completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            use tracing::error;
            if !smr_cli::diagnostics::render_cli_error(&e) {
                error!("{}", e);
            }
            if cli.verbose > 0 {
                error!(?e, "detailed error context");
            }
            std::process::exit(1);
        }
    }
}

fn setup_logging(
    verbose: u8,
    quiet: bool,
    log_level: Option<LogLevel>,
    log_format: LogFormat,
) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout carries results; logs go to stderr
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    match log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(formatter)
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(formatter.json())
                .with(filter)
                .init();
        }
    }

    Ok(())
}
