//! Shell command execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{truncate, ActionResult, DispatchLimits, ToolError, Workspace};

/// Captured result of a shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal or by the timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout and stderr joined, as a test runner prints them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Run `command` through `sh -c` in `cwd`, killing it after `timeout`.
///
/// The shell leads its own process group. The whole group is killed before
/// this returns, so nothing the command started outlives it.
///
/// Only spawn failures are errors; non-zero exits and timeouts are reported
/// in the returned [`CommandOutput`].
pub async fn execute_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    debug!(command = %command, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "Executing shell command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to spawn '{}': {}", command, e)))?;
    let pgid = child.id();

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    kill_process_group(pgid);

    match result {
        Ok(Ok(output)) => Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!(
            "Failed to collect output of '{}': {}",
            command, e
        ))),
        Err(_) => Ok(CommandOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }),
    }
}

/// SIGKILL every process left in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else { return };
    // ESRCH just means the group is already gone.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        debug!(pgid, "Killed leftover processes");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}

pub(super) async fn run_command(
    workspace: &Workspace,
    command: &str,
    working_dir: Option<&str>,
    timeout: Duration,
    limits: &DispatchLimits,
) -> Result<ActionResult, ToolError> {
    if command.trim().is_empty() {
        return Err(ToolError::InvalidParameters(
            "command cannot be empty".to_string(),
        ));
    }

    let cwd = match working_dir {
        Some(dir) => workspace.resolve(dir)?,
        None => workspace.root().to_path_buf(),
    };
    if !cwd.is_dir() {
        return Err(ToolError::NotFound(format!(
            "working directory '{}'",
            workspace.relative_display(&cwd)
        )));
    }

    let output = execute_shell(command, &cwd, timeout).await?;
    if output.timed_out {
        return Ok(ActionResult::failure(format!(
            "Command timed out after {} seconds",
            timeout.as_secs()
        )));
    }

    let mut text = String::new();
    if !output.stdout.is_empty() {
        text.push_str("STDOUT:\n");
        text.push_str(&truncate(&output.stdout, limits.stdout_limit));
    }
    if !output.stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str("STDERR:\n");
        text.push_str(&truncate(&output.stderr, limits.stderr_limit));
    }

    match output.exit_code {
        Some(0) => {
            if text.is_empty() {
                text.push_str("(no output)");
            }
            Ok(ActionResult::success(text))
        }
        Some(code) => Ok(ActionResult::partial(text, format!("exit code {}", code))),
        None => Ok(ActionResult::partial(text, "terminated by signal")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_execute_shell_captures_streams() {
        let dir = TempDir::new().unwrap();
        let output = execute_shell("echo out; echo err >&2; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.succeeded());
        assert_eq!(output.combined(), "out\n\nerr\n");
    }

    #[tokio::test]
    async fn test_execute_shell_timeout() {
        let dir = TempDir::new().unwrap();
        let output = execute_shell("sleep 5", dir.path(), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_nested_processes() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let result = run_command(
            &ws,
            "sh -c 'sleep 1; echo late > marker.txt'; true",
            None,
            Duration::from_millis(200),
            &DispatchLimits::default(),
        )
        .await
        .unwrap();
        assert!(!result.is_success());
        assert!(result.error().unwrap_or_default().contains("timed out"));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!dir.path().join("marker.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_processes_do_not_outlive_command() {
        let dir = TempDir::new().unwrap();
        let output = execute_shell(
            "(sleep 1; touch marker.txt) > /dev/null 2>&1 & echo started",
            dir.path(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(output.succeeded());
        assert_eq!(output.stdout.trim(), "started");

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!dir.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit_is_failure_with_output() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let result = run_command(
            &ws,
            "echo compiling; exit 1",
            None,
            Duration::from_secs(10),
            &DispatchLimits::default(),
        )
        .await
        .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("exit code 1"));
        assert!(result.output().contains("compiling"));
    }

    #[tokio::test]
    async fn test_run_command_in_subdirectory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("module")).unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let result = run_command(
            &ws,
            "pwd",
            Some("module"),
            Duration::from_secs(10),
            &DispatchLimits::default(),
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert!(result.output().trim_end().ends_with("module"));
    }

    #[tokio::test]
    async fn test_run_command_truncates_stdout() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let limits = DispatchLimits {
            stdout_limit: 10,
            ..DispatchLimits::default()
        };
        let result = run_command(
            &ws,
            "printf 'abcdefghijklmnopqrstuvwxyz'",
            None,
            Duration::from_secs(10),
            &limits,
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert!(result.output().contains("abcdefghij... [truncated]"));
    }

    #[tokio::test]
    async fn test_run_command_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let err = run_command(&ws, "  ", None, Duration::from_secs(1), &DispatchLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
