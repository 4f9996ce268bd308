//! Action definitions and the dispatcher that executes them.
//!
//! The reasoning engine may request exactly six kinds of operation, modelled
//! as the closed [`ActionKind`] enum. [`Dispatcher::dispatch`] matches on it
//! exhaustively, so adding or auditing a kind is a compile-time change.
//!
//! Every failure inside an operation (bad path, missing file, non-zero exit,
//! invalid pattern) is turned into a failed [`ActionResult`] here and fed back
//! to the conversation; nothing below this module aborts the session.

pub mod command;
pub mod file;
pub mod search;
pub mod workspace;

pub use command::{execute_shell, CommandOutput};
pub use search::SearchMatch;
pub use workspace::Workspace;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{ChangeCategory, ChangeLedger, ChangeRecord};

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The path resolves outside the session's working directory.
    #[error("Path containment violation: '{0}' resolves outside the working directory")]
    PathOutsideRoot(String),

    /// The target does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// File system error.
    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// Backup could not be taken or verified; the target was left untouched.
    #[error("Backup failed for '{path}': {reason}")]
    BackupFailed { path: String, reason: String },

    /// Search pattern does not compile.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Change category outside the fixed set.
    #[error("{0}")]
    InvalidCategory(#[from] crate::ledger::UnknownCategory),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::FilesystemError(err.to_string())
    }
}

/// Outcome of executing one action. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    success: bool,
    output: String,
    error: Option<String>,
}

impl ActionResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Create a failed result that still carries output (e.g. a non-zero exit).
    pub fn partial(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Render the result as the observation text appended to the conversation.
    pub fn to_observation(&self, action: &Action) -> String {
        let name = action.kind.name();
        if self.success {
            format!("Tool '{}' [{}] succeeded:\n{}", name, action.id, self.output)
        } else {
            let mut text = format!(
                "Tool '{}' [{}] failed: {}",
                name,
                action.id,
                self.error.as_deref().unwrap_or("Unknown error")
            );
            if !self.output.is_empty() {
                text.push('\n');
                text.push_str(&self.output);
            }
            text
        }
    }
}

fn default_scope() -> String {
    ".".to_string()
}

/// The fixed set of operations the reasoning engine may request.
///
/// Wire format: `{"tool": "<kind>", "arguments": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ActionKind {
    #[serde(alias = "run_shell", alias = "bash")]
    RunCommand {
        command: String,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default, alias = "timeout")]
        timeout_secs: Option<u64>,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListDirectory {
        #[serde(default = "default_scope")]
        path: String,
        #[serde(default)]
        max_depth: Option<usize>,
    },
    #[serde(alias = "search")]
    SearchInFiles {
        pattern: String,
        #[serde(default, alias = "directory")]
        path: Option<String>,
        #[serde(default)]
        file_extension: Option<String>,
    },
    LogChange {
        category: String,
        file: String,
        #[serde(default)]
        change_type: Option<String>,
        description: String,
        #[serde(default)]
        before: Option<String>,
        #[serde(default)]
        after: Option<String>,
        #[serde(default)]
        revert_hint: Option<String>,
    },
}

impl ActionKind {
    /// Wire name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::RunCommand { .. } => "run_command",
            ActionKind::ReadFile { .. } => "read_file",
            ActionKind::WriteFile { .. } => "write_file",
            ActionKind::ListDirectory { .. } => "list_directory",
            ActionKind::SearchInFiles { .. } => "search_in_files",
            ActionKind::LogChange { .. } => "log_change",
        }
    }

    /// Whether executing this kind may change the working directory.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ActionKind::RunCommand { .. } | ActionKind::WriteFile { .. }
        )
    }

    /// Short one-line description for logs.
    pub fn summary(&self) -> String {
        match self {
            ActionKind::RunCommand { command, .. } => format!("$ {}", truncate(command, 120)),
            ActionKind::ReadFile { path } => path.clone(),
            ActionKind::WriteFile { path, content } => format!("{} ({} bytes)", path, content.len()),
            ActionKind::ListDirectory { path, .. } => path.clone(),
            ActionKind::SearchInFiles { pattern, path, .. } => {
                format!("/{}/ in {}", pattern, path.as_deref().unwrap_or("."))
            }
            ActionKind::LogChange { category, file, .. } => format!("{} {}", category, file),
        }
    }

    /// JSON description of every kind, handed to the reasoning engine.
    pub fn catalog() -> Value {
        serde_json::json!([
            {
                "tool": "run_command",
                "description": "Run a shell command in the repository root (git, mvn, gradle, sed, grep, find, javac). Non-zero exit is reported as a failure with its output.",
                "arguments": {
                    "command": "string, required",
                    "working_dir": "string, optional, relative to the repository root",
                    "timeout_secs": "integer, optional, default 300"
                }
            },
            {
                "tool": "read_file",
                "description": "Read a text file. Long files are truncated.",
                "arguments": { "path": "string, required" }
            },
            {
                "tool": "write_file",
                "description": "Create or overwrite a file. The previous content is backed up to <path>.bak first.",
                "arguments": { "path": "string, required", "content": "string, required" }
            },
            {
                "tool": "list_directory",
                "description": "List entries below a directory, sorted, skipping .git/target/build directories.",
                "arguments": { "path": "string, default \".\"", "max_depth": "integer, optional, default 4" }
            },
            {
                "tool": "search_in_files",
                "description": "Regex search across files; returns file:line: text for each match.",
                "arguments": {
                    "pattern": "string, required, regex",
                    "path": "string, optional scope",
                    "file_extension": "string, optional, e.g. .java"
                }
            },
            {
                "tool": "log_change",
                "description": "Record a migration change in the audit ledger. Call after every file you modify.",
                "arguments": {
                    "category": "BUILD_CONFIG | CODE_MODERNIZATION | DEPENDENCY | SPRING_BOOT | BUG_FIX | TEST_FIX",
                    "file": "string, required",
                    "change_type": "string, optional short label, e.g. Record Class",
                    "description": "string, required",
                    "before": "string, optional snippet",
                    "after": "string, optional snippet",
                    "revert_hint": "string, optional"
                }
            }
        ])
    }
}

/// A requested operation with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Opaque correlation id.
    pub id: String,
    /// What to do.
    pub kind: ActionKind,
}

impl Action {
    /// Create an action with a fresh correlation id.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: format!("act-{}", uuid::Uuid::new_v4().simple()),
            kind,
        }
    }

    /// Create an action with a caller-supplied correlation id.
    pub fn with_id(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Output and size limits applied by the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchLimits {
    /// Default `run_command` timeout.
    pub command_timeout: Duration,
    /// Upper bound for a caller-requested timeout.
    pub max_command_timeout: Duration,
    /// Characters of stdout kept per command.
    pub stdout_limit: usize,
    /// Characters of stderr kept per command.
    pub stderr_limit: usize,
    /// Characters of file content returned by `read_file`.
    pub read_limit: usize,
    /// Default `list_directory` depth.
    pub list_depth: usize,
    /// Maximum `list_directory` entries.
    pub list_limit: usize,
    /// Maximum `search_in_files` matches.
    pub search_limit: usize,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            max_command_timeout: Duration::from_secs(1800),
            stdout_limit: 8000,
            stderr_limit: 4000,
            read_limit: 6000,
            list_depth: 4,
            list_limit: 300,
            search_limit: 100,
        }
    }
}

/// Executes actions against a session's workspace and ledger.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(limits: DispatchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DispatchLimits {
        &self.limits
    }

    /// Execute one action. Never fails: errors become failed results.
    pub async fn dispatch(
        &self,
        action: &Action,
        workspace: &mut Workspace,
        ledger: &mut ChangeLedger,
    ) -> ActionResult {
        debug!(action_id = %action.id, kind = action.kind.name(), "Dispatching action");

        let outcome = match &action.kind {
            ActionKind::RunCommand {
                command,
                working_dir,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.limits.command_timeout)
                    .min(self.limits.max_command_timeout);
                command::run_command(workspace, command, working_dir.as_deref(), timeout, &self.limits)
                    .await
            }
            ActionKind::ReadFile { path } => file::read_file(workspace, path, self.limits.read_limit),
            ActionKind::WriteFile { path, content } => file::write_file(workspace, path, content),
            ActionKind::ListDirectory { path, max_depth } => file::list_directory(
                workspace,
                path,
                max_depth.unwrap_or(self.limits.list_depth),
                self.limits.list_limit,
            ),
            ActionKind::SearchInFiles {
                pattern,
                path,
                file_extension,
            } => search::search_in_files(
                workspace,
                pattern,
                path.as_deref(),
                file_extension.as_deref(),
                self.limits.search_limit,
            ),
            ActionKind::LogChange {
                category,
                file,
                change_type,
                description,
                before,
                after,
                revert_hint,
            } => log_change(
                workspace,
                ledger,
                LogChangeRequest {
                    category,
                    file,
                    change_type: change_type.as_deref(),
                    description,
                    before: before.as_deref(),
                    after: after.as_deref(),
                    revert_hint: revert_hint.as_deref(),
                },
            ),
        };

        match outcome {
            Ok(result) => {
                if !result.is_success() {
                    info!(
                        action_id = %action.id,
                        kind = action.kind.name(),
                        error = result.error().unwrap_or_default(),
                        "Action reported failure"
                    );
                }
                result
            }
            Err(err) => {
                warn!(action_id = %action.id, kind = action.kind.name(), error = %err, "Action rejected");
                ActionResult::failure(err.to_string())
            }
        }
    }
}

struct LogChangeRequest<'a> {
    category: &'a str,
    file: &'a str,
    change_type: Option<&'a str>,
    description: &'a str,
    before: Option<&'a str>,
    after: Option<&'a str>,
    revert_hint: Option<&'a str>,
}

fn log_change(
    workspace: &Workspace,
    ledger: &mut ChangeLedger,
    request: LogChangeRequest<'_>,
) -> Result<ActionResult, ToolError> {
    // Validate everything before touching the ledger.
    let category = ChangeCategory::from_str(request.category)?;
    let resolved = workspace.resolve(request.file)?;
    let file = workspace.relative_display(&resolved);

    if request.description.trim().is_empty() {
        return Err(ToolError::InvalidParameters(
            "description cannot be empty".to_string(),
        ));
    }

    let revert_hint = match request.revert_hint {
        Some(hint) if !hint.trim().is_empty() => hint.to_string(),
        _ => match workspace.backup_for(&resolved) {
            Some(backup) => format!(
                "cp '{}' '{}'",
                workspace.relative_display(backup),
                file
            ),
            None => format!("git checkout -- '{}'", file),
        },
    };

    let mut record = ChangeRecord::new(category, &file, request.description)
        .with_revert_hint(revert_hint);
    if let Some(change_type) = request.change_type {
        record = record.with_change_type(change_type);
    }
    if let Some(before) = request.before {
        record = record.with_before(before);
    }
    if let Some(after) = request.after {
        record = record.with_after(after);
    }

    let sequence = ledger.append(record);
    info!(category = %category, file = %file, sequence, "Change logged");

    Ok(ActionResult::success(format!(
        "Logged {} change #{} for {}",
        category, sequence, file
    )))
}

/// Truncate to at most `max` bytes on a char boundary, marking the cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

/// Keep the last `max` bytes, marking the cut. Test runners print failures last.
pub(crate) fn truncate_tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut start = s.len() - max;
        while !s.is_char_boundary(start) && start < s.len() {
            start += 1;
        }
        format!("[truncated] ...{}", &s[start..])
    }
}
