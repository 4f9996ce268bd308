//! Test-command validation and the bounded fix-retry budget.
//!
//! [`validate`] runs the project's test command once and turns its exit code
//! and output into a [`ValidationOutcome`]. [`RetryController`] only decides
//! whether another fix attempt is allowed; it never looks at what failed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tools::{execute_shell, truncate_tail};

/// Maximum number of fix attempts after failed validation.
pub const RETRY_CAP: u32 = 3;

/// Default timeout for one test run.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(1800);

/// Characters of test output kept on the outcome (the tail).
const OUTPUT_LIMIT: usize = 8000;

/// One failing test or compilation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    /// `Class.method` for tests, `File.java:line` for compile errors.
    pub test_name: String,
    pub message: String,
}

impl FailureDescriptor {
    pub fn new(test_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            message: message.into(),
        }
    }
}

/// Result of one test-command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Tail of combined stdout and stderr.
    pub output: String,
    /// Empty when `passed`.
    pub failures: Vec<FailureDescriptor>,
}

impl ValidationOutcome {
    /// Build an outcome from a finished run.
    pub fn from_run(
        command: &str,
        exit_code: Option<i32>,
        timed_out: bool,
        output: &str,
    ) -> Self {
        let passed = !timed_out
            && exit_code == Some(0)
            && !output.contains("BUILD FAILURE")
            && !output.contains("BUILD FAILED");

        let failures = if passed {
            Vec::new()
        } else {
            let mut found = parse_failures(output);
            if found.is_empty() {
                found.push(generic_failure(command, exit_code, timed_out, output));
            }
            found
        };

        Self {
            passed,
            command: command.to_string(),
            exit_code,
            timed_out,
            output: truncate_tail(output, OUTPUT_LIMIT),
            failures,
        }
    }

    /// Short human-readable status line.
    pub fn status_line(&self) -> String {
        if self.passed {
            "PASSED".to_string()
        } else if self.timed_out {
            "FAILED (timed out)".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("FAILED (exit code {}, {} failure(s))", code, self.failures.len()),
                None => format!("FAILED ({} failure(s))", self.failures.len()),
            }
        }
    }
}

/// Run `test_command` in `repository_path` and classify the result.
///
/// Never errors: a command that cannot even be spawned is a failed outcome.
pub async fn validate(
    repository_path: &Path,
    test_command: &str,
    timeout: Duration,
) -> ValidationOutcome {
    info!(command = %test_command, path = %repository_path.display(), "Running validation");

    let outcome = match execute_shell(test_command, repository_path, timeout).await {
        Ok(output) => ValidationOutcome::from_run(
            test_command,
            output.exit_code,
            output.timed_out,
            &output.combined(),
        ),
        Err(e) => {
            warn!(error = %e, "Test command could not be started");
            ValidationOutcome::from_run(test_command, None, false, &e.to_string())
        }
    };

    info!(
        passed = outcome.passed,
        exit_code = ?outcome.exit_code,
        failures = outcome.failures.len(),
        "Validation finished"
    );
    outcome
}

fn surefire_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\[ERROR\]\s+)?(?:[A-Za-z_][\w$]*\.)*([A-Z][\w$]*)\.([a-z_$][\w$]*):(\d+)\s+(.+)$")
            .expect("valid surefire summary regex")
    })
}

fn surefire_legacy_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\[ERROR\]\s+)?([\w$]+)\((?:[\w$]+\.)*([\w$]+)\)\s+Time elapsed:.*<<<\s*(FAILURE|ERROR)!")
            .expect("valid surefire test regex")
    })
}

fn surefire_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\[ERROR\]\s+)?(?:[\w$]+\.)*([A-Z][\w$]*)\.([\w$]+)\s+Time elapsed:.*<<<\s*(FAILURE|ERROR)!")
            .expect("valid surefire test regex")
    })
}

fn gradle_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[\w$]+\.)*([A-Z][\w$]*) > ([\w$]+)(?:\(\))? FAILED\s*$")
            .expect("valid gradle test regex")
    })
}

fn javac_maven_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[ERROR\]\s+(?:.*[/\\])?([\w$]+\.java):\[(\d+),\d+\]\s*(.*)$")
            .expect("valid javac regex")
    })
}

fn javac_plain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:.*[/\\])?([\w$]+\.java):(\d+): error: (.*)$").expect("valid javac regex")
    })
}

/// Extract failure descriptors from test-runner output, de-duplicated by
/// name in first-seen order.
pub fn parse_failures(output: &str) -> Vec<FailureDescriptor> {
    let lines: Vec<&str> = output.lines().collect();
    let mut seen = HashSet::new();
    let mut failures = Vec::new();

    let next_message = |index: usize, fallback: &str| -> String {
        lines
            .iter()
            .skip(index + 1)
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };

    for (index, line) in lines.iter().enumerate() {
        let descriptor = if let Some(caps) = javac_maven_re().captures(line) {
            Some(FailureDescriptor::new(
                format!("{}:{}", &caps[1], &caps[2]),
                caps[3].trim(),
            ))
        } else if let Some(caps) = javac_plain_re().captures(line) {
            Some(FailureDescriptor::new(
                format!("{}:{}", &caps[1], &caps[2]),
                caps[3].trim(),
            ))
        } else if let Some(caps) = gradle_test_re().captures(line) {
            Some(FailureDescriptor::new(
                format!("{}.{}", &caps[1], &caps[2]),
                next_message(index, "FAILED"),
            ))
        } else if let Some(caps) = surefire_legacy_test_re().captures(line) {
            Some(FailureDescriptor::new(
                format!("{}.{}", &caps[2], &caps[1]),
                next_message(index, &caps[3]),
            ))
        } else if let Some(caps) = surefire_test_re().captures(line) {
            Some(FailureDescriptor::new(
                format!("{}.{}", &caps[1], &caps[2]),
                next_message(index, &caps[3]),
            ))
        } else if let Some(caps) = surefire_summary_re().captures(line) {
            // `Shape.java:12 ...` is a file reference, not a test.
            if &caps[2] == "java" {
                None
            } else {
                Some(FailureDescriptor::new(
                    format!("{}.{}", &caps[1], &caps[2]),
                    caps[4].trim(),
                ))
            }
        } else {
            None
        };

        if let Some(descriptor) = descriptor {
            if seen.insert(descriptor.test_name.clone()) {
                failures.push(descriptor);
            }
        }
    }

    failures
}

fn generic_failure(
    command: &str,
    exit_code: Option<i32>,
    timed_out: bool,
    output: &str,
) -> FailureDescriptor {
    let last_line = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("(no output)");
    let message = if timed_out {
        format!("timed out; last output: {}", last_line)
    } else {
        match exit_code {
            Some(code) => format!("exit code {}; last output: {}", code, last_line),
            None => format!("terminated; last output: {}", last_line),
        }
    };
    FailureDescriptor::new(command, message)
}

/// Whether another fix attempt is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Ask for a fix; `attempt` is the new retry count.
    Retry { attempt: u32 },
    /// The budget is spent.
    Exhausted,
}

/// Counts fix attempts against a fixed cap. The count never exceeds the cap.
#[derive(Debug, Clone)]
pub struct RetryController {
    cap: u32,
    count: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RETRY_CAP)
    }
}

impl RetryController {
    pub fn new(cap: u32) -> Self {
        Self { cap, count: 0 }
    }

    /// Register a failed validation.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.count >= self.cap {
            return RetryDecision::Exhausted;
        }
        self.count += 1;
        RetryDecision::Retry {
            attempt: self.count,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.count
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }
}
