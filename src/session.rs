//! The per-invocation unit of work.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::HistoryPolicy;
use crate::error::SessionError;
use crate::ledger::ChangeLedger;
use crate::tools::{DispatchLimits, Workspace};
use crate::validation::{RetryController, RETRY_CAP};

/// Default number of actions a session may execute.
pub const DEFAULT_ITERATION_CAP: u32 = 80;

/// Terminal (or current) status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    /// Completion signalled and validation passed.
    Completed,
    /// Iteration or retry budget spent; needs manual follow-up.
    Exhausted,
    /// The session could not continue.
    Fatal,
}

impl SessionStatus {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionStatus::Completed => 0,
            SessionStatus::Exhausted => 2,
            SessionStatus::Running | SessionStatus::Fatal => 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Budgets and limits for one session.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub iteration_cap: u32,
    pub retry_cap: u32,
    pub validation_timeout: Duration,
    pub history: HistoryPolicy,
    pub dispatch: DispatchLimits,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            iteration_cap: DEFAULT_ITERATION_CAP,
            retry_cap: RETRY_CAP,
            validation_timeout: crate::validation::DEFAULT_VALIDATION_TIMEOUT,
            history: HistoryPolicy::default(),
            dispatch: DispatchLimits::default(),
        }
    }
}

/// Context owned by the driver for the lifetime of one run.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub workspace: Workspace,
    pub ledger: ChangeLedger,
    pub retry: RetryController,
    pub limits: SessionLimits,
    iteration_count: u32,
    status: SessionStatus,
}

impl Session {
    pub fn new(working_dir: &Path, limits: SessionLimits) -> Result<Self, SessionError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace: Workspace::new(working_dir)?,
            ledger: ChangeLedger::new(),
            retry: RetryController::new(limits.retry_cap),
            limits,
            iteration_count: 0,
            status: SessionStatus::Running,
        })
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn iteration_cap(&self) -> u32 {
        self.limits.iteration_cap
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.retry_count()
    }

    /// Whether another action may be issued.
    pub fn has_budget(&self) -> bool {
        self.iteration_count < self.limits.iteration_cap
    }

    /// Count one executed action. Saturates at the cap.
    pub fn record_iteration(&mut self) -> u32 {
        if self.has_budget() {
            self.iteration_count += 1;
        }
        self.iteration_count
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to a terminal status. The first terminal status sticks.
    pub fn finish(&mut self, status: SessionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }
}
