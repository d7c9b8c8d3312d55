//! Helpers shared by the commands that read descriptors or take arguments.

use std::path::PathBuf;

use clap::Args;
use serde_json::Value as Json;
use smr_code::{CodeDescriptor, FileSource};
use smr_runner::RunnerError;

use crate::{CliError, Result};

/// Where a descriptor record comes from
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct DescriptorInput {
    /// Descriptor record as JSON text
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    /// Path of a descriptor record file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

impl DescriptorInput {
    pub fn from_data(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            file: None,
        }
    }

    pub fn from_file(file: impl Into<PathBuf>) -> Self {
        Self {
            data: None,
            file: Some(file.into()),
        }
    }

    /// Parses the record. A file that cannot be read is reported as a
    /// missing descriptor rather than an IO failure.
    pub fn load(&self) -> std::result::Result<CodeDescriptor, RunnerError> {
        match (&self.data, &self.file) {
            (Some(data), _) => Ok(CodeDescriptor::from_json(data)?),
            (None, Some(path)) => Ok(CodeDescriptor::from_external_source(
                &FileSource::new(),
                &path.to_string_lossy(),
            )?),
            (None, None) => Err(RunnerError::DescriptorFormat(
                "no descriptor given".to_string(),
            )),
        }
    }
}

/// JSON when the text parses as JSON, otherwise the text itself.
pub fn parse_param(text: &str) -> Json {
    serde_json::from_str(text).unwrap_or_else(|_| Json::String(text.to_string()))
}

pub fn parse_keyword(pair: &str) -> Result<(String, Json)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), parse_param(value))),
        _ => Err(CliError::InvalidInput(format!(
            "keyword argument '{}' is not NAME=VALUE",
            pair
        ))),
    }
}

/// Strings print raw; everything else prints as JSON.
pub fn render_value(value: &Json, pretty: bool) -> String {
    match value {
        Json::String(text) => text.clone(),
        other => render_json(other, pretty),
    }
}

pub fn render_json(value: &Json, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_params_prefer_json() {
        assert_eq!(parse_param("3"), json!(3));
        assert_eq!(parse_param("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_param("\"quoted\""), json!("quoted"));
        assert_eq!(parse_param("dude"), json!("dude"));
        assert_eq!(parse_param("null"), Json::Null);
    }

    #[test]
    fn test_keywords_split_on_first_equals() {
        assert_eq!(parse_keyword("sep==").unwrap(), ("sep".to_string(), json!("=")));
        assert_eq!(parse_keyword("n=4").unwrap(), ("n".to_string(), json!(4)));
        assert!(parse_keyword("=4").is_err());
        assert!(parse_keyword("flag").is_err());
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("Hello World!"), false), "Hello World!");
        assert_eq!(render_value(&json!({"a": [1]}), false), r#"{"a":[1]}"#);
        assert_eq!(render_value(&Json::Null, false), "null");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = DescriptorInput::from_file("/nonexistent/fn.json")
            .load()
            .unwrap_err();
        assert_eq!(err.code(), -32601);
    }
}
