//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `MIGRATOR_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::HistoryPolicy;
use crate::error::ConfigError;
use crate::llm::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::session::{SessionLimits, DEFAULT_ITERATION_CAP};
use crate::tools::DispatchLimits;
use crate::validation::RETRY_CAP;

/// Configuration for a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Model identifier sent to the chat endpoint.
    pub model: String,
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Maximum actions per session.
    pub iteration_cap: u32,
    /// Default timeout for `run_command`.
    pub command_timeout_secs: u64,
    /// Timeout for one run of the test command.
    pub validation_timeout_secs: u64,
    pub history_max_chars: usize,
    pub history_keep_recent: usize,
    /// Where remote repositories are cloned.
    pub clone_dir: PathBuf,
    /// Overrides build-tool detection.
    pub test_command: Option<String>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        let history = HistoryPolicy::default();
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            temperature: 0.1,
            max_tokens: 8192,
            iteration_cap: DEFAULT_ITERATION_CAP,
            command_timeout_secs: 300,
            validation_timeout_secs: 1800,
            history_max_chars: history.max_chars,
            history_keep_recent: history.keep_recent,
            clone_dir: std::env::temp_dir(),
            test_command: None,
        }
    }
}

impl MigratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Overlay `MIGRATOR_*` environment variables.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`, keyed by their `MIGRATOR_*` name.
    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(val) = lookup("MIGRATOR_MODEL") {
            self.model = val;
        }

        if let Some(val) = lookup("MIGRATOR_TEMPERATURE") {
            self.temperature = parse_env_value(&val, "MIGRATOR_TEMPERATURE")?;
        }

        if let Some(val) = lookup("MIGRATOR_MAX_TOKENS") {
            self.max_tokens = parse_env_value(&val, "MIGRATOR_MAX_TOKENS")?;
        }

        if let Some(val) = lookup("MIGRATOR_MAX_ITERATIONS") {
            self.iteration_cap = parse_env_value(&val, "MIGRATOR_MAX_ITERATIONS")?;
        }

        if let Some(val) = lookup("MIGRATOR_COMMAND_TIMEOUT_SECS") {
            self.command_timeout_secs = parse_env_value(&val, "MIGRATOR_COMMAND_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("MIGRATOR_VALIDATION_TIMEOUT_SECS") {
            self.validation_timeout_secs =
                parse_env_value(&val, "MIGRATOR_VALIDATION_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("MIGRATOR_HISTORY_MAX_CHARS") {
            self.history_max_chars = parse_env_value(&val, "MIGRATOR_HISTORY_MAX_CHARS")?;
        }

        if let Some(val) = lookup("MIGRATOR_HISTORY_KEEP_RECENT") {
            self.history_keep_recent = parse_env_value(&val, "MIGRATOR_HISTORY_KEEP_RECENT")?;
        }

        if let Some(val) = lookup("MIGRATOR_CLONE_DIR") {
            self.clone_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("MIGRATOR_TEST_COMMAND") {
            self.test_command = Some(val);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "api_base must be an http(s) URL, got '{}'",
                self.api_base
            )));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be at least 1".to_string(),
            ));
        }

        if self.iteration_cap == 0 {
            return Err(ConfigError::ValidationFailed(
                "iteration_cap must be at least 1".to_string(),
            ));
        }

        if self.command_timeout_secs == 0 || self.validation_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeouts must be at least 1 second".to_string(),
            ));
        }

        if self.history_max_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "history_max_chars must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Session budgets derived from this configuration.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            iteration_cap: self.iteration_cap,
            retry_cap: RETRY_CAP,
            validation_timeout: Duration::from_secs(self.validation_timeout_secs),
            history: HistoryPolicy {
                max_chars: self.history_max_chars,
                keep_recent: self.history_keep_recent,
            },
            dispatch: DispatchLimits {
                command_timeout: Duration::from_secs(self.command_timeout_secs),
                ..DispatchLimits::default()
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_iteration_cap(mut self, cap: u32) -> Self {
        self.iteration_cap = cap;
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }

    pub fn with_clone_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_dir = dir.into();
        self
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
