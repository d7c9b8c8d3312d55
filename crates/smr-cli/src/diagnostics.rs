//! Diagnostic and error reporting utilities

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{CliError, Result};

/// Set up enhanced error reporting with miette
pub fn setup_error_reporting() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .map_err(|e| CliError::Config(format!("Failed to setup error reporting: {}", e)))?;

    Ok(())
}

/// Source-level diagnostic for a Python function that could not be compiled
#[derive(Error, Debug, Diagnostic)]
pub enum SourceDiagnostic {
    #[error("{message}")]
    #[diagnostic(
        code(smrun::compile),
        help("only plain synchronous functions over the supported statement set compile")
    )]
    Compile {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },
}

/// Span covering `line` (1-based) of `text`, without its newline
pub fn line_span(text: &str, line: u32) -> SourceSpan {
    let index = usize::try_from(line.saturating_sub(1)).unwrap_or(usize::MAX);
    let mut offset = 0;
    for (current, content) in text.split_inclusive('\n').enumerate() {
        if current == index {
            return SourceSpan::new(offset.into(), content.trim_end_matches('\n').len());
        }
        offset += content.len();
    }
    SourceSpan::new(text.len().into(), 0)
}

pub fn compile_diagnostic(file: &str, text: &str, line: u32, message: String) -> SourceDiagnostic {
    SourceDiagnostic::Compile {
        message,
        src: NamedSource::new(file, text.to_string()),
        span: line_span(text, line),
    }
}

/// Renders errors that carry source context through miette. Returns false
/// when the error has none and should be logged instead.
pub fn render_cli_error(error: &CliError) -> bool {
    match error {
        CliError::Compilation { file, text, error } => match error.line() {
            Some(line) => {
                let diagnostic = compile_diagnostic(
                    &file.display().to_string(),
                    text,
                    line,
                    error.to_string(),
                );
                eprintln!("{:?}", miette::Report::new(diagnostic));
                true
            }
            None => false,
        },
        _ => false,
    }
}
