//! The conversation driver: request, execute, observe, validate.
//!
//! ```text
//! Idle -> AwaitingAction -> Executing -> Observing -> AwaitingAction
//!                 |                          |
//!                 +-- Completion ------------+-- cap --> Validating
//! Validating -> AwaitingAction (fix request, within retry budget)
//!            -> Terminal(Completed | Exhausted)
//! AwaitingAction -> Terminal(Fatal) on engine error
//! ```
//!
//! Everything is awaited in sequence; no two operations are ever in flight.
//! Both budgets are checked only between operations.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::conversation::Conversation;
use crate::engine::{EngineReply, ReasoningEngine};
use crate::ledger::ChangeLedger;
use crate::prompts;
use crate::report::{self, BackupEntry, ReportArtifact, ReportHeader, ReportInputs};
use crate::session::{Session, SessionLimits, SessionStatus};
use crate::tools::{Action, Dispatcher};
use crate::validation::{validate, RetryDecision, ValidationOutcome};

/// Driver states.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverState {
    Idle,
    AwaitingAction,
    Executing(Action),
    /// An observation is ready to be appended to the history.
    Observing(String),
    Validating,
    Terminal(SessionStatus),
}

/// Static inputs of one run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub system_prompt: String,
    pub test_command: String,
    pub limits: SessionLimits,
    /// Shown in the report; defaults to the repository path.
    pub repository_label: Option<String>,
    /// Write MIGRATION_REPORT.md and its sidecar at the end.
    pub write_artifacts: bool,
}

impl DriverConfig {
    pub fn new(system_prompt: impl Into<String>, test_command: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            test_command: test_command.into(),
            limits: SessionLimits::default(),
            repository_label: None,
            write_artifacts: true,
        }
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_repository_label(mut self, label: impl Into<String>) -> Self {
        self.repository_label = Some(label.into());
        self
    }

    pub fn with_write_artifacts(mut self, write: bool) -> Self {
        self.write_artifacts = write;
        self
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub session_id: String,
    pub repository: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub iteration_cap: u32,
    pub retries: u32,
    pub retry_cap: u32,
    pub engine_summary: Option<String>,
    pub validation: Option<ValidationOutcome>,
    pub ledger: ChangeLedger,
    /// Rendered report text; empty if rendering failed.
    pub report: String,
    pub artifact: Option<ReportArtifact>,
    pub fatal_error: Option<String>,
}

impl FinalReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Runs one session against a reasoning engine.
pub struct Driver {
    engine: Arc<dyn ReasoningEngine>,
    dispatcher: Dispatcher,
    config: DriverConfig,
}

impl Driver {
    pub fn new(engine: Arc<dyn ReasoningEngine>, config: DriverConfig) -> Self {
        Self {
            engine,
            dispatcher: Dispatcher::new(config.limits.dispatch.clone()),
            config,
        }
    }

    /// Drive the session to a terminal status and report on it.
    pub async fn run(&self, initial_prompt: &str, repository_path: &Path) -> FinalReport {
        let repository = self
            .config
            .repository_label
            .clone()
            .unwrap_or_else(|| repository_path.display().to_string());

        let mut session = match Session::new(repository_path, self.config.limits.clone()) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Session could not start");
                return self.unstarted(repository, e.to_string());
            }
        };

        let mut conversation = Conversation::new(
            self.config.system_prompt.clone(),
            initial_prompt,
            self.config.limits.history,
        );

        info!(
            session_id = %session.id,
            root = %session.root().display(),
            iteration_cap = session.iteration_cap(),
            retry_cap = session.retry.cap(),
            "Session started"
        );

        let mut engine_summary = None;
        let mut last_validation: Option<ValidationOutcome> = None;
        let mut fatal_error = None;
        let mut cap_reached = false;
        let mut state = DriverState::Idle;

        loop {
            debug!(state = state_name(&state), iteration = session.iteration_count(), "Driver state");
            state = match state {
                DriverState::Idle => DriverState::AwaitingAction,

                DriverState::AwaitingAction => {
                    if !session.has_budget() {
                        cap_reached = true;
                        DriverState::Validating
                    } else {
                        match self.engine.next_action(&conversation.messages()).await {
                            Ok(EngineReply::Action(action)) => {
                                conversation.push_assistant(action_message(&action));
                                DriverState::Executing(action)
                            }
                            Ok(EngineReply::Completion { summary }) => {
                                info!(iteration = session.iteration_count(), "Engine signalled completion");
                                conversation.push_assistant(summary.clone());
                                engine_summary = Some(summary);
                                DriverState::Validating
                            }
                            Ok(EngineReply::Invalid { reason }) => {
                                warn!(iteration = session.iteration_count(), reason = %reason, "Unusable tool call");
                                DriverState::Observing(prompts::build_invalid_call_observation(&reason))
                            }
                            Err(e) => {
                                error!(iteration = session.iteration_count(), error = %e, "Reasoning engine failed");
                                fatal_error = Some(e.to_string());
                                DriverState::Terminal(SessionStatus::Fatal)
                            }
                        }
                    }
                }

                DriverState::Executing(action) => {
                    info!(
                        iteration = session.iteration_count() + 1,
                        action_id = %action.id,
                        kind = action.kind.name(),
                        mutation = action.kind.is_mutation(),
                        target = %action.kind.summary(),
                        "Executing action"
                    );
                    let result = self
                        .dispatcher
                        .dispatch(&action, &mut session.workspace, &mut session.ledger)
                        .await;
                    DriverState::Observing(result.to_observation(&action))
                }

                DriverState::Observing(observation) => {
                    conversation.push_user(observation);
                    let iteration = session.record_iteration();
                    if session.has_budget() {
                        DriverState::AwaitingAction
                    } else {
                        warn!(iteration, cap = session.iteration_cap(), "Iteration cap reached");
                        conversation.push_user(prompts::ITERATION_LIMIT_NOTICE);
                        cap_reached = true;
                        DriverState::Validating
                    }
                }

                DriverState::Validating => {
                    let outcome = validate(
                        session.root(),
                        &self.config.test_command,
                        session.limits.validation_timeout,
                    )
                    .await;
                    let next = if cap_reached {
                        DriverState::Terminal(SessionStatus::Exhausted)
                    } else if outcome.passed {
                        DriverState::Terminal(SessionStatus::Completed)
                    } else {
                        match session.retry.on_failure() {
                            RetryDecision::Retry { attempt } => {
                                info!(attempt, cap = session.retry.cap(), "Validation failed, requesting fix");
                                conversation.push_user(prompts::build_fix_request(
                                    &outcome,
                                    attempt,
                                    session.retry.cap(),
                                ));
                                DriverState::AwaitingAction
                            }
                            RetryDecision::Exhausted => {
                                warn!(retries = session.retry_count(), "Retry budget exhausted");
                                DriverState::Terminal(SessionStatus::Exhausted)
                            }
                        }
                    };
                    last_validation = Some(outcome);
                    next
                }

                DriverState::Terminal(status) => {
                    session.finish(status);
                    break;
                }
            };
        }

        info!(
            session_id = %session.id,
            status = %session.status(),
            iterations = session.iteration_count(),
            retries = session.retry_count(),
            changes = session.ledger.len(),
            "Session finished"
        );

        self.finalize(session, repository, engine_summary, last_validation, fatal_error)
    }

    fn finalize(
        &self,
        session: Session,
        repository: String,
        engine_summary: Option<String>,
        validation: Option<ValidationOutcome>,
        fatal_error: Option<String>,
    ) -> FinalReport {
        let backups = session
            .workspace
            .backups()
            .iter()
            .map(|(file, backup)| BackupEntry {
                file: session.workspace.relative_display(file),
                backup: session.workspace.relative_display(backup),
            })
            .collect();

        let inputs = ReportInputs {
            header: ReportHeader {
                repository: repository.clone(),
                session_id: session.id.clone(),
                status: session.status(),
                generated_at: Utc::now(),
                iterations: session.iteration_count(),
                iteration_cap: session.iteration_cap(),
                retries: session.retry_count(),
                retry_cap: session.retry.cap(),
                engine_summary: engine_summary.clone(),
                fatal_error: fatal_error.clone(),
                backups,
            },
            ledger: session.ledger.clone(),
            validation: validation.clone(),
        };

        let report = report::render(&inputs.ledger, inputs.validation.as_ref(), &inputs.header)
            .unwrap_or_else(|e| {
                error!(error = %e, "Report rendering failed");
                String::new()
            });

        let artifact = if self.config.write_artifacts {
            match report::write_report(session.root(), &inputs) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    error!(error = %e, "Report could not be written");
                    None
                }
            }
        } else {
            None
        };

        FinalReport {
            session_id: session.id.clone(),
            repository,
            status: session.status(),
            iterations: session.iteration_count(),
            iteration_cap: session.iteration_cap(),
            retries: session.retry_count(),
            retry_cap: session.retry.cap(),
            engine_summary,
            validation,
            ledger: inputs.ledger,
            report,
            artifact,
            fatal_error,
        }
    }

    fn unstarted(&self, repository: String, reason: String) -> FinalReport {
        FinalReport {
            session_id: String::new(),
            repository,
            status: SessionStatus::Fatal,
            iterations: 0,
            iteration_cap: self.config.limits.iteration_cap,
            retries: 0,
            retry_cap: self.config.limits.retry_cap,
            engine_summary: None,
            validation: None,
            ledger: ChangeLedger::new(),
            report: String::new(),
            artifact: None,
            fatal_error: Some(reason),
        }
    }
}

fn state_name(state: &DriverState) -> &'static str {
    match state {
        DriverState::Idle => "idle",
        DriverState::AwaitingAction => "awaiting_action",
        DriverState::Executing(_) => "executing",
        DriverState::Observing(_) => "observing",
        DriverState::Validating => "validating",
        DriverState::Terminal(_) => "terminal",
    }
}

/// The action as the assistant turn recorded in history.
fn action_message(action: &Action) -> String {
    match serde_json::to_value(&action.kind) {
        Ok(Value::Object(mut map)) => {
            map.insert("id".to_string(), Value::String(action.id.clone()));
            Value::Object(map).to_string()
        }
        _ => action.kind.summary(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ActionKind;

    #[test]
    fn test_action_message_round_trips_through_parser() {
        let action = Action::with_id(
            "call-7",
            ActionKind::ReadFile {
                path: "pom.xml".to_string(),
            },
        );
        let message = action_message(&action);
        let parsed = crate::engine::ActionParser::new().parse(&message);
        assert_eq!(parsed, EngineReply::Action(action));
    }

    #[test]
    fn test_config_builders() {
        let config = DriverConfig::new("sys", "mvn -q test")
            .with_repository_label("acme/shapes")
            .with_write_artifacts(false);
        assert_eq!(config.repository_label.as_deref(), Some("acme/shapes"));
        assert!(!config.write_artifacts);
        assert_eq!(config.limits.iteration_cap, 80);
    }
}
