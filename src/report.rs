//! Migration report rendering and persistence.
//!
//! [`render`] is pure: the same ledger, validation outcome and header always
//! produce the same text. [`write_report`] stores the rendered report and a
//! JSON sidecar with its inputs, from which [`regenerate`] reproduces the
//! report without re-running the session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{info, warn};

use crate::error::ReportError;
use crate::ledger::{ChangeLedger, ChangeRecord};
use crate::session::SessionStatus;
use crate::tools::file::write_durably;
use crate::validation::{FailureDescriptor, ValidationOutcome};

/// Report file name in the repository root.
pub const REPORT_FILE_NAME: &str = "MIGRATION_REPORT.md";

/// Sidecar holding the report inputs.
pub const LEDGER_FILE_NAME: &str = "MIGRATION_LEDGER.json";

const REPORT_TEMPLATE: &str = r#"# Java 11 to 21 Migration Report

**Repository:** {{ header.repository }}
**Session:** {{ header.session_id }}
**Generated:** {{ generated_at }}
**Status:** {{ header.status }}
**Tests:** {{ tests_label }}
**Total Changes:** {{ total }}
**Iterations:** {{ header.iterations }} / {{ header.iteration_cap }}
**Fix Attempts:** {{ header.retries }} / {{ header.retry_cap }}
{% if header.fatal_error %}
**Fatal Error:** {{ header.fatal_error }}
{% endif %}{% if header.engine_summary %}
## Agent Summary

{{ header.engine_summary }}
{% endif %}
---
{% for section in sections %}
## {{ section.title }}
{% for record in section.records %}
### {{ record.sequence }}. `{{ record.file_name }}`{% if record.change_type %} - {{ record.change_type }}{% endif %}

**File:** `{{ record.file }}`
**Recorded:** {{ record.recorded_at }}

{{ record.description }}
{% if record.before %}
**Before:**
{{ record.fence }}java
{{ record.before }}
{{ record.fence }}
{% endif %}{% if record.after %}
**After:**
{{ record.fence }}java
{{ record.after }}
{{ record.fence }}
{% endif %}
**Revert:** `{{ record.revert_hint }}`
{% endfor %}{% endfor %}
## Summary

| Category | Changes |
|---|---|
{% for row in counts %}| {{ row.title }} | {{ row.count }} |
{% endfor %}| **Total** | **{{ total }}** |

## Validation

{% if validation %}**Command:** `{{ validation.command }}`
**Result:** {{ validation.status_line }}
{% if validation.failures | length > 0 %}
**Failures:**

{% for failure in validation.failures %}- `{{ failure.test_name }}`: {{ failure.message }}
{% endfor %}{% endif %}{% if not validation.passed %}
**Output (tail):**

{{ validation.fence }}
{{ validation.output }}
{{ validation.fence }}
{% endif %}{% else %}Tests were not run.
{% endif %}
## How to Revert

```bash
git diff HEAD             # review all changes
git checkout -- <file>    # revert one file
git checkout .            # revert everything
```
{% if header.backups | length > 0 %}
Backups of overwritten files (content before the last write):

{% for backup in header.backups %}- `{{ backup.backup }}` restores `{{ backup.file }}`
{% endfor %}{% endif %}
## Changed Files

{% for file in changed_files %}- `{{ file }}`
{% endfor %}{% if changed_files | length == 0 %}No files were changed.
{% endif %}"#;

/// A backup taken during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub file: String,
    pub backup: String,
}

/// Session facts shown at the top of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub repository: String,
    pub session_id: String,
    pub status: SessionStatus,
    pub generated_at: DateTime<Utc>,
    pub iterations: u32,
    pub iteration_cap: u32,
    pub retries: u32,
    pub retry_cap: u32,
    pub engine_summary: Option<String>,
    pub fatal_error: Option<String>,
    pub backups: Vec<BackupEntry>,
}

/// Everything [`render`] needs; persisted as the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInputs {
    pub header: ReportHeader,
    pub ledger: ChangeLedger,
    pub validation: Option<ValidationOutcome>,
}

/// Where the artifacts were written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportArtifact {
    pub report_path: PathBuf,
    pub ledger_path: PathBuf,
}

#[derive(Serialize)]
struct RecordView<'a> {
    sequence: usize,
    file: &'a str,
    file_name: &'a str,
    change_type: Option<&'a str>,
    description: &'a str,
    before: Option<&'a str>,
    after: Option<&'a str>,
    revert_hint: &'a str,
    recorded_at: String,
    fence: String,
}

impl<'a> From<&'a ChangeRecord> for RecordView<'a> {
    fn from(record: &'a ChangeRecord) -> Self {
        let file_name = Path::new(&record.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&record.file);
        Self {
            sequence: record.sequence,
            file: &record.file,
            file_name,
            change_type: record.change_type.as_deref(),
            description: &record.description,
            before: record.before.as_deref(),
            after: record.after.as_deref(),
            revert_hint: &record.revert_hint,
            recorded_at: record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            fence: code_fence(&[record.before.as_deref(), record.after.as_deref()]),
        }
    }
}

#[derive(Serialize)]
struct SectionView<'a> {
    title: &'static str,
    records: Vec<RecordView<'a>>,
}

#[derive(Serialize)]
struct CountRow {
    title: &'static str,
    count: usize,
}

#[derive(Serialize)]
struct ValidationView<'a> {
    command: &'a str,
    passed: bool,
    status_line: String,
    failures: &'a [FailureDescriptor],
    output: &'a str,
    fence: String,
}

/// A backtick fence longer than any backtick run in `snippets`.
fn code_fence(snippets: &[Option<&str>]) -> String {
    let longest = snippets
        .iter()
        .flatten()
        .copied()
        .flat_map(|text| text.split(|c: char| c != '`'))
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

/// Render the report. Categories appear in fixed order, records in ledger
/// order within each category.
pub fn render(
    ledger: &ChangeLedger,
    validation: Option<&ValidationOutcome>,
    header: &ReportHeader,
) -> Result<String, ReportError> {
    let sections: Vec<SectionView<'_>> = crate::ledger::ChangeCategory::ALL
        .into_iter()
        .map(|category| SectionView {
            title: category.title(),
            records: ledger
                .by_category(category)
                .into_iter()
                .map(RecordView::from)
                .collect(),
        })
        .filter(|section| !section.records.is_empty())
        .collect();

    let counts: Vec<CountRow> = ledger
        .counts()
        .into_iter()
        .map(|(category, count)| CountRow {
            title: category.title(),
            count,
        })
        .collect();

    let validation_view = validation.map(|outcome| ValidationView {
        command: &outcome.command,
        passed: outcome.passed,
        status_line: outcome.status_line(),
        failures: &outcome.failures,
        output: outcome.output.trim_end(),
        fence: code_fence(&[Some(outcome.output.as_str())]),
    });

    let tests_label = match validation {
        Some(outcome) if outcome.passed => "PASSED",
        Some(_) => "FAILED",
        None => "not run",
    };

    let mut context = Context::new();
    context.insert("header", header);
    context.insert(
        "generated_at",
        &header.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
    );
    context.insert("tests_label", tests_label);
    context.insert("total", &ledger.len());
    context.insert("sections", &sections);
    context.insert("counts", &counts);
    context.insert("validation", &validation_view);
    context.insert("changed_files", &ledger.changed_files());

    Ok(Tera::one_off(REPORT_TEMPLATE, &context, false)?)
}

/// Render and write the report plus its JSON sidecar into `root`.
///
/// Falls back to the system temp directory when `root` is not writable.
pub fn write_report(root: &Path, inputs: &ReportInputs) -> Result<ReportArtifact, ReportError> {
    let text = render(&inputs.ledger, inputs.validation.as_ref(), &inputs.header)?;
    let sidecar = serde_json::to_string_pretty(inputs)?;

    match write_pair(root, REPORT_FILE_NAME, LEDGER_FILE_NAME, &text, &sidecar) {
        Ok(artifact) => Ok(artifact),
        Err(e) => {
            let fallback = std::env::temp_dir();
            warn!(
                root = %root.display(),
                fallback = %fallback.display(),
                error = %e,
                "Repository root not writable, writing report to temp dir"
            );
            let id = &inputs.header.session_id;
            write_pair(
                &fallback,
                &format!("MIGRATION_REPORT-{}.md", id),
                &format!("MIGRATION_LEDGER-{}.json", id),
                &text,
                &sidecar,
            )
        }
    }
}

fn write_pair(
    dir: &Path,
    report_name: &str,
    ledger_name: &str,
    text: &str,
    sidecar: &str,
) -> Result<ReportArtifact, ReportError> {
    let report_path = dir.join(report_name);
    let ledger_path = dir.join(ledger_name);
    write_durably(&report_path, text.as_bytes())?;
    write_durably(&ledger_path, sidecar.as_bytes())?;
    info!(report = %report_path.display(), "Migration report written");
    Ok(ReportArtifact {
        report_path,
        ledger_path,
    })
}

/// Re-render a report from a sidecar written by [`write_report`].
pub fn regenerate(sidecar: &Path) -> Result<String, ReportError> {
    let content = std::fs::read_to_string(sidecar)?;
    let inputs: ReportInputs = serde_json::from_str(&content)?;
    render(&inputs.ledger, inputs.validation.as_ref(), &inputs.header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ChangeCategory;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn header(status: SessionStatus) -> ReportHeader {
        ReportHeader {
            repository: "https://github.com/acme/shapes".to_string(),
            session_id: "session-1".to_string(),
            status,
            generated_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap(),
            iterations: 12,
            iteration_cap: 80,
            retries: 1,
            retry_cap: 3,
            engine_summary: None,
            fatal_error: None,
            backups: vec![BackupEntry {
                file: "pom.xml".to_string(),
                backup: "pom.xml.bak".to_string(),
            }],
        }
    }

    fn ledger() -> ChangeLedger {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap();
        let mut ledger = ChangeLedger::new();
        ledger.append(
            ChangeRecord::new(ChangeCategory::CodeModernization, "src/main/java/Point.java", "Point is now a record")
                .with_change_type("Record Class")
                .with_recorded_at(at),
        );
        ledger.append(
            ChangeRecord::new(ChangeCategory::BuildConfig, "pom.xml", "Java 21")
                .with_before("<java.version>11</java.version>")
                .with_after("<java.version>21</java.version>")
                .with_revert_hint("cp 'pom.xml.bak' 'pom.xml'")
                .with_recorded_at(at),
        );
        ledger.append(
            ChangeRecord::new(ChangeCategory::CodeModernization, "src/main/java/Shape.java", "instanceof pattern")
                .with_recorded_at(at),
        );
        ledger
    }

    #[test]
    fn test_render_groups_by_category_in_fixed_order() {
        let text = render(&ledger(), None, &header(SessionStatus::Exhausted)).unwrap();

        let build = text.find("## Build Configuration").unwrap();
        let code = text.find("## Code Modernization").unwrap();
        assert!(build < code);
        assert!(!text.contains("## Spring Boot"));

        let point = text.find("`Point.java` - Record Class").unwrap();
        let shape = text.find("`Shape.java`").unwrap();
        assert!(point < shape);

        assert!(text.contains("<java.version>11</java.version>"));
        assert!(text.contains("**Status:** exhausted"));
        assert!(text.contains("**Tests:** not run"));
        assert!(text.contains("| Code Modernization | 2 |"));
        assert!(text.contains("| **Total** | **3** |"));
        assert!(text.contains("Tests were not run."));
        assert!(text.contains("`pom.xml.bak` restores `pom.xml`"));
        assert!(text.contains("- `src/main/java/Point.java`"));
    }

    #[test]
    fn test_code_fence_outgrows_embedded_backticks() {
        assert_eq!(code_fence(&[None, None]), "```");
        assert_eq!(code_fence(&[Some("int x = 1;")]), "```");
        assert_eq!(code_fence(&[Some("/** ```java */"), Some("a ```` b")]), "`````");
    }

    #[test]
    fn test_render_snippet_with_fence_keeps_structure() {
        let mut ledger = ChangeLedger::new();
        ledger.append(
            ChangeRecord::new(ChangeCategory::CodeModernization, "src/main/java/Doc.java", "Javadoc sample")
                .with_before("/**\n * ```\n * old()\n * ```\n */")
                .with_after("/** new() */")
                .with_recorded_at(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()),
        );
        let text = render(&ledger, None, &header(SessionStatus::Completed)).unwrap();

        assert!(text.contains("````java\n/**\n * ```\n"));
        assert!(text.contains("/** new() */\n````\n"));
        // Headings after the snippet are still outside any fence.
        let summary = text.find("\n## Summary").unwrap();
        let opens = text[..summary].matches("````java").count();
        let total = text[..summary].matches("````").count();
        assert_eq!(total, opens * 2);
    }

    #[test]
    fn test_render_is_deterministic() {
        let ledger = ledger();
        let header = header(SessionStatus::Completed);
        let outcome = ValidationOutcome::from_run("mvn -q test", Some(0), false, "ok");
        let first = render(&ledger, Some(&outcome), &header).unwrap();
        let second = render(&ledger, Some(&outcome), &header).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("**Result:** PASSED"));
    }

    #[test]
    fn test_render_failed_validation_lists_failures() {
        let outcome = ValidationOutcome::from_run(
            "mvn -q test",
            Some(1),
            false,
            "ShapeServiceTest.testArea:42 expected:<4.0> but was:<0.0>\nBUILD FAILURE",
        );
        let text = render(&ledger(), Some(&outcome), &header(SessionStatus::Exhausted)).unwrap();
        assert!(text.contains("**Tests:** FAILED"));
        assert!(text.contains("- `ShapeServiceTest.testArea`: expected:<4.0> but was:<0.0>"));
        assert!(text.contains("**Output (tail):**"));
    }

    #[test]
    fn test_render_empty_ledger() {
        let mut header = header(SessionStatus::Fatal);
        header.fatal_error = Some("HTTP request failed".to_string());
        header.backups.clear();
        let text = render(&ChangeLedger::new(), None, &header).unwrap();
        assert!(text.contains("**Total Changes:** 0"));
        assert!(text.contains("**Fatal Error:** HTTP request failed"));
        assert!(text.contains("No files were changed."));
    }

    #[test]
    fn test_write_and_regenerate() {
        let dir = TempDir::new().unwrap();
        let inputs = ReportInputs {
            header: header(SessionStatus::Completed),
            ledger: ledger(),
            validation: Some(ValidationOutcome::from_run("mvn -q test", Some(0), false, "")),
        };

        let artifact = write_report(dir.path(), &inputs).unwrap();
        assert_eq!(artifact.report_path, dir.path().join(REPORT_FILE_NAME));
        let written = std::fs::read_to_string(&artifact.report_path).unwrap();
        let regenerated = regenerate(&artifact.ledger_path).unwrap();
        assert_eq!(written, regenerated);
    }
}
