//! Error types for java-migrator operations.
//!
//! Defines error types for the subsystems that can fail outright:
//! - Reasoning-engine (LLM) calls
//! - Runtime configuration
//! - Repository resolution and cloning
//! - Report rendering and persistence
//! - Session setup
//!
//! Tool failures are not listed here: the dispatcher converts them into failed
//! `ActionResult`s, see [`crate::tools::ToolError`].

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENROUTER_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty response from model '{0}'")]
    EmptyResponse(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while resolving the target repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Repository locator is empty")]
    EmptyLocator,

    #[error("Cannot derive a directory name from locator '{0}'")]
    UnnamedLocator(String),

    #[error("git clone of '{locator}' failed (exit code {code}): {stderr}")]
    CloneFailed {
        locator: String,
        code: i32,
        stderr: String,
    },

    #[error("No test command: '{0}' has no pom.xml or build.gradle; pass --test-command")]
    UnknownBuildTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while rendering or writing the report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Tera template rendering error: {0}")]
    Tera(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that prevent a session from starting at all.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Working directory '{path}' is not usable: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory '{0}' is not a directory")]
    NotADirectory(String),
}
