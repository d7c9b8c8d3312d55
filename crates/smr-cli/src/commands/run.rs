//! Run command implementation.

use std::time::Duration;

use clap::{Args, ValueEnum};
use serde_json::{Map, Value as Json};
use smr_runner::{
    InterpreterGeneration, InvocationExecutor, ReconstructionEngine, Response, RunnerError,
};
use tracing::{debug, info};

use crate::cli::CliConfig;
use crate::commands::common::{parse_keyword, parse_param, render_value, DescriptorInput};
use crate::{CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerationArg {
    Current,
    Legacy,
}

impl From<GenerationArg> for InterpreterGeneration {
    fn from(arg: GenerationArg) -> Self {
        match arg {
            GenerationArg::Current => InterpreterGeneration::Current,
            GenerationArg::Legacy => InterpreterGeneration::Legacy,
        }
    }
}

/// Arguments for the run command
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: DescriptorInput,

    /// Positional arguments, parsed as JSON when possible
    #[arg(allow_negative_numbers = true)]
    pub params: Vec<String>,

    /// Keyword argument
    #[arg(long = "kw", value_name = "NAME=VALUE")]
    pub kw: Vec<String>,

    /// Print the response envelope
    #[arg(long)]
    pub json: bool,

    /// Indent JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Request id echoed in the envelope
    #[arg(long)]
    pub id: Option<String>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Interpreter generation to reconstruct for
    #[arg(long, value_enum)]
    pub generation: Option<GenerationArg>,
}

impl RunArgs {
    pub fn new(input: DescriptorInput) -> Self {
        Self {
            input,
            params: Vec::new(),
            kw: Vec::new(),
            json: false,
            pretty: false,
            id: None,
            timeout: None,
            generation: None,
        }
    }
}

/// Loads and invokes the descriptor on a blocking worker, bounded by the
/// configured timeout.
pub async fn invoke(
    args: &RunArgs,
    config: &CliConfig,
) -> Result<std::result::Result<Json, RunnerError>> {
    let generation = match args.generation {
        Some(generation) => generation.into(),
        None => config.runtime.generation()?,
    };
    let positional: Vec<Json> = args.params.iter().map(|param| parse_param(param)).collect();
    let mut kwargs = Map::new();
    for pair in &args.kw {
        let (name, value) = parse_keyword(pair)?;
        kwargs.insert(name, value);
    }

    let executor = InvocationExecutor::new(ReconstructionEngine::new(generation))
        .with_overlay(config.runtime.overlay())
        .with_max_depth(config.runtime.max_depth);
    let input = args.input.clone();
    debug!(%generation, args = positional.len(), kwargs = kwargs.len(), "starting invocation");
    let task = tokio::task::spawn_blocking(move || -> std::result::Result<Json, RunnerError> {
        let descriptor = input.load()?;
        executor.invoke(&descriptor, &positional, &kwargs)
    });

    let joined = match args.timeout.or(config.runtime.timeout_secs) {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), task)
            .await
            .map_err(|_| CliError::Timeout(secs))?,
        None => task.await,
    };
    joined.map_err(|e| CliError::Task(e.to_string()))
}

pub async fn run_command(args: RunArgs, config: &CliConfig) -> Result<()> {
    let outcome = invoke(&args, config).await?;
    let pretty = args.pretty || config.output.pretty;

    if let Err(err) = &outcome {
        debug!(code = err.code(), data = %err.data(), "invocation failed");
    }

    if args.json || config.output.json {
        let id = args.id.as_deref().map(parse_param);
        let response = match outcome {
            Ok(value) => Response::as_result(value, id),
            Err(err) => Response::as_failure(&err, id),
        };
        let text = if pretty {
            response.to_json_pretty()
        } else {
            response.to_json()
        };
        println!("{}", text);
        return Ok(());
    }

    let value = outcome?;
    info!("Invocation returned");
    println!("{}", render_value(&value, pretty));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const HELLO: &str = r#"{"argcount":0,"kwonlyargcount":0,"nlocals":0,"stacksize":1,"flags":67,"code":"ZAFTAA==","consts":[null,"Hello World!"],"names":[],"varnames":[],"filename":"hello.py","name":"hello","firstlineno":1,"lnotab":"AAE=","freevars":[],"cellvars":[]}"#;

    #[tokio::test]
    async fn test_invoke_from_data() {
        let args = RunArgs::new(DescriptorInput::from_data(HELLO));
        let outcome = invoke(&args, &CliConfig::default()).await.unwrap();
        assert_eq!(outcome.unwrap(), json!("Hello World!"));
    }

    #[tokio::test]
    async fn test_invoke_reports_runner_errors() {
        let args = RunArgs::new(DescriptorInput::from_data("{\"flags\": 67}"));
        let outcome = invoke(&args, &CliConfig::default()).await.unwrap();
        assert_eq!(outcome.unwrap_err().code(), -32700);
    }

    #[tokio::test]
    async fn test_bad_keyword_is_invalid_input() {
        let mut args = RunArgs::new(DescriptorInput::from_data(HELLO));
        args.kw.push("oops".to_string());
        let err = invoke(&args, &CliConfig::default()).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
    }
}
