//! CLI configuration and settings management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smr_runner::{EnvironmentOverlay, InterpreterGeneration, DEFAULT_MAX_DEPTH};

use crate::{CliError, Result};

pub const LOCAL_CONFIG: &str = "smrun.toml";

/// CLI configuration loaded from a config file, falling back to defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Interpreter and environment settings
    pub runtime: RuntimeConfig,

    /// Output settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter generation, `current` or `legacy`
    pub generation: String,

    /// Default wall-clock limit for `run`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Maximum call depth inside one invocation
    pub max_depth: usize,

    /// Globals visible to every invoked function
    pub globals: BTreeMap<String, Json>,

    /// Fault classes invoked functions may raise, as `module.Name`
    pub fault_classes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print the full response envelope instead of the bare result
    pub json: bool,

    /// Indent JSON output
    pub pretty: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            generation: InterpreterGeneration::default().to_string(),
            timeout_secs: None,
            max_depth: DEFAULT_MAX_DEPTH,
            globals: BTreeMap::new(),
            fault_classes: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn generation(&self) -> Result<InterpreterGeneration> {
        self.generation.parse().map_err(|_| {
            CliError::Config(format!(
                "unknown interpreter generation '{}', expected 'current' or 'legacy'",
                self.generation
            ))
        })
    }

    pub fn overlay(&self) -> EnvironmentOverlay {
        EnvironmentOverlay {
            globals: self.globals.clone(),
            fault_classes: self.fault_classes.clone(),
        }
    }
}

impl CliConfig {
    /// Load configuration from `config_path`, or from the first config file
    /// found in the standard locations
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "loading config");
                return Self::load_from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// `./smrun.toml`, `~/.smrun.toml`, then the user config directory
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".smrun.toml"));
        }
        if let Some(path) = Self::default_config_path() {
            paths.push(path);
        }
        paths
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.runtime.generation()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, content)
            .map_err(|e| CliError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get the default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("smrun").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.runtime.generation().unwrap(), InterpreterGeneration::Current);
        assert_eq!(config.runtime.timeout_secs, None);
        assert!(config.runtime.overlay().is_empty());
        assert!(!config.output.json);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
[runtime]
generation = "legacy"
fault_classes = ["billing.QuotaExceeded"]

[runtime.globals]
factor = 3
label = "x"
"#,
        )
        .unwrap();
        assert_eq!(config.runtime.generation().unwrap(), InterpreterGeneration::Legacy);
        assert_eq!(config.runtime.max_depth, RuntimeConfig::default().max_depth);
        let overlay = config.runtime.overlay();
        assert_eq!(overlay.globals["factor"], json!(3));
        assert_eq!(overlay.globals["label"], json!("x"));
        assert_eq!(overlay.fault_classes, vec!["billing.QuotaExceeded"]);
        assert_eq!(config.output, OutputConfig::default());
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = CliConfig::default();
        config.runtime.timeout_secs = Some(5);
        config.output.pretty = true;
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = CliConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config, loaded_config);
    }

    #[test]
    fn test_unknown_generation_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[runtime]\ngeneration = \"py2\"\n").unwrap();
        let err = CliConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("py2"));
    }
}
