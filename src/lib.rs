//! java-migrator: a tool-orchestration and validation loop that migrates Java 11
//! repositories to Java 21.
//!
//! A [`driver::Driver`] asks a [`engine::ReasoningEngine`] for the next action,
//! executes it through the [`tools::Dispatcher`] inside the session's working
//! directory, feeds the result back, and validates the repository with its test
//! command once the engine signals completion. Every change is recorded in a
//! [`ledger::ChangeLedger`] and rendered into `MIGRATION_REPORT.md`.

pub mod cli;
pub mod config;
pub mod conversation;
pub mod driver;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod prompts;
pub mod repo;
pub mod report;
pub mod session;
pub mod tools;
pub mod validation;

// Re-export commonly used types
pub use driver::{Driver, DriverConfig, FinalReport};
pub use engine::{EngineReply, ReasoningEngine};
pub use error::{ConfigError, LlmError, RepoError, ReportError, SessionError};
pub use session::SessionStatus;
