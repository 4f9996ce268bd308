//! CLI definition and the top-level migration command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use crate::config::MigratorConfig;
use crate::driver::{Driver, DriverConfig, FinalReport};
use crate::engine::LlmEngine;
use crate::error::LlmError;
use crate::llm::LiteLlmClient;
use crate::prompts;
use crate::repo;

/// Migrate a Java 11 repository to Java 21 with an auditable change ledger.
#[derive(Parser, Debug)]
#[command(name = "java-migrator")]
#[command(about = "Migrate a Java 11 repository to Java 21 with an LLM-driven, test-validated agent loop")]
#[command(version)]
#[command(
    long_about = "java-migrator drives a reasoning model through a bounded tool loop (shell, file, search, change logging) \
against a local checkout, validates the result with the project's test command, and writes MIGRATION_REPORT.md \
to the repository root.\n\nExit codes: 0 migration completed, 2 budget exhausted (manual follow-up needed), 1 fatal.\n\n\
Example usage:\n  java-migrator https://github.com/acme/shapes.git\n  java-migrator ./petclinic --test-command \"mvn -q verify\""
)]
pub struct Cli {
    /// Repository to migrate: a local directory or a git URL.
    #[arg(value_name = "REPOSITORY")]
    pub repository: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Model identifier for the reasoning engine.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// API key for the chat endpoint.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API base URL (OpenRouter by default, or a LiteLLM proxy).
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: Option<String>,

    /// Maximum number of actions before the session is stopped.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Test command used for validation (default: detected from pom.xml / build.gradle).
    #[arg(long)]
    pub test_command: Option<String>,

    /// Directory remote repositories are cloned into.
    #[arg(long)]
    pub clone_dir: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Print the final summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run a migration with parsed arguments. Returns the process exit code.
///
/// Errors are reserved for failures before the session starts (bad
/// configuration, missing credential, clone failure, unknown build tool).
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    let config = build_config(&cli)?;

    let api_key = cli
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or(LlmError::MissingApiKey)?;

    let resolved = repo::resolve(&cli.repository, &config.clone_dir)
        .await
        .with_context(|| format!("Failed to resolve repository '{}'", cli.repository))?;

    let override_command = config.test_command.as_deref();
    let (build_tool, test_command) = repo::resolve_test_command(&resolved.path, override_command)?;

    info!(
        repository = %resolved.locator,
        path = %resolved.path.display(),
        cloned = resolved.cloned,
        build_tool = %build_tool,
        test_command = %test_command,
        model = %config.model,
        "Starting migration"
    );

    let client = LiteLlmClient::new(config.api_base.clone(), Some(api_key), config.model.clone())?;
    let engine = LlmEngine::new(Arc::new(client), config.model.clone())
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    let root = resolved.path.display().to_string();
    let driver_config = DriverConfig::new(
        prompts::build_system_prompt(&root, build_tool, &test_command),
        test_command.clone(),
    )
    .with_limits(config.session_limits())
    .with_repository_label(resolved.locator.clone());

    let driver = Driver::new(Arc::new(engine), driver_config);
    let report = driver
        .run(
            &prompts::build_initial_message(&root, &test_command),
            &resolved.path,
        )
        .await;

    if cli.json {
        let json_output = serde_json::to_string_pretty(&report)?;
        println!("{}", json_output);
    } else {
        print_summary(&report);
    }

    Ok(report.exit_code())
}

/// Defaults, then the config file, then environment, then flags.
fn build_config(cli: &Cli) -> anyhow::Result<MigratorConfig> {
    let mut config = match &cli.config {
        Some(path) => MigratorConfig::from_file(path)?,
        None => MigratorConfig::default(),
    }
    .apply_env()?;

    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(cap) = cli.max_iterations {
        config.iteration_cap = cap;
    }
    if let Some(command) = &cli.test_command {
        config.test_command = Some(command.clone());
    }
    if let Some(dir) = &cli.clone_dir {
        config.clone_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(report: &FinalReport) {
    println!("\n=== Migration Summary ===");
    println!("Repository:   {}", report.repository);
    println!("Status:       {}", report.status);
    println!("Iterations:   {} / {}", report.iterations, report.iteration_cap);
    println!("Fix attempts: {} / {}", report.retries, report.retry_cap);
    println!("Changes:      {}", report.ledger.len());
    match &report.validation {
        Some(outcome) => println!("Tests:        {}", outcome.status_line()),
        None => println!("Tests:        not run"),
    }
    for (category, count) in report.ledger.counts() {
        if count > 0 {
            println!("  {:<20} {}", category.as_str(), count);
        }
    }
    if let Some(error) = &report.fatal_error {
        println!("Error:        {}", error);
    }
    if let Some(artifact) = &report.artifact {
        println!("Report:       {}", artifact.report_path.display());
    }
    if let Some(outcome) = &report.validation {
        for failure in outcome.failures.iter().take(10) {
            println!("  FAILED {}: {}", failure.test_name, failure.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_positional_and_flags() {
        let cli = Cli::try_parse_from([
            "java-migrator",
            "https://github.com/acme/shapes.git",
            "--model",
            "openai/gpt-4.1",
            "--max-iterations",
            "12",
            "--test-command",
            "mvn -q verify",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.repository, "https://github.com/acme/shapes.git");
        assert_eq!(cli.model.as_deref(), Some("openai/gpt-4.1"));
        assert_eq!(cli.max_iterations, Some(12));
        assert!(cli.json);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_requires_repository() {
        assert!(Cli::try_parse_from(["java-migrator"]).is_err());
    }

    #[test]
    fn test_cli_help_flag() {
        let err = Cli::try_parse_from(["java-migrator", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "java-migrator",
            "./repo",
            "--max-iterations",
            "7",
            "--clone-dir",
            "/work",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.iteration_cap, 7);
        assert_eq!(config.clone_dir, PathBuf::from("/work"));
    }

    #[test]
    fn test_invalid_flag_value_rejected() {
        let cli = Cli::try_parse_from(["java-migrator", "./repo", "--max-iterations", "0"]).unwrap();
        assert!(build_config(&cli).is_err());
    }
}
