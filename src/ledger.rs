//! Append-only audit ledger of migration changes.
//!
//! Records are kept in insertion order and never removed or reordered.
//! Duplicate-looking records (same file, same category) are all kept, each
//! one being a separate decision by the reasoning engine.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ReportError;
use crate::tools::file::write_durably;

/// Migration area a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCategory {
    BuildConfig,
    CodeModernization,
    Dependency,
    SpringBoot,
    BugFix,
    TestFix,
}

impl ChangeCategory {
    /// All categories in report order.
    pub const ALL: [ChangeCategory; 6] = [
        ChangeCategory::BuildConfig,
        ChangeCategory::CodeModernization,
        ChangeCategory::Dependency,
        ChangeCategory::SpringBoot,
        ChangeCategory::BugFix,
        ChangeCategory::TestFix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::BuildConfig => "BUILD_CONFIG",
            ChangeCategory::CodeModernization => "CODE_MODERNIZATION",
            ChangeCategory::Dependency => "DEPENDENCY",
            ChangeCategory::SpringBoot => "SPRING_BOOT",
            ChangeCategory::BugFix => "BUG_FIX",
            ChangeCategory::TestFix => "TEST_FIX",
        }
    }

    /// Section heading used in the report.
    pub fn title(&self) -> &'static str {
        match self {
            ChangeCategory::BuildConfig => "Build Configuration",
            ChangeCategory::CodeModernization => "Code Modernization",
            ChangeCategory::Dependency => "Dependency Upgrades",
            ChangeCategory::SpringBoot => "Spring Boot 2 to 3 Migration",
            ChangeCategory::BugFix => "Bug Fixes",
            ChangeCategory::TestFix => "Test Fixes",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category string outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown change category '{0}', expected one of BUILD_CONFIG, CODE_MODERNIZATION, DEPENDENCY, SPRING_BOOT, BUG_FIX, TEST_FIX")]
pub struct UnknownCategory(pub String);

impl FromStr for ChangeCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        ChangeCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// 1-based position in the ledger, assigned on append.
    pub sequence: usize,
    pub category: ChangeCategory,
    /// Path relative to the repository root.
    pub file: String,
    /// Short label such as "Record Class".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// How to undo this change.
    pub revert_hint: String,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(
        category: ChangeCategory,
        file: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let file = file.into();
        Self {
            sequence: 0,
            category,
            revert_hint: format!("git checkout -- '{}'", file),
            file,
            change_type: None,
            description: description.into(),
            before: None,
            after: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_change_type(mut self, change_type: impl Into<String>) -> Self {
        self.change_type = Some(change_type.into());
        self
    }

    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn with_revert_hint(mut self, hint: impl Into<String>) -> Self {
        self.revert_hint = hint.into();
        self
    }

    pub fn with_recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = at;
        self
    }
}

/// Append-only, single-writer change log for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedger {
    records: Vec<ChangeRecord>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning its sequence number. Returns the sequence.
    pub fn append(&mut self, mut record: ChangeRecord) -> usize {
        record.sequence = self.records.len() + 1;
        let sequence = record.sequence;
        self.records.push(record);
        sequence
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one category, in ledger order.
    pub fn by_category(&self, category: ChangeCategory) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.category == category)
            .collect()
    }

    /// Count per category, in report order, including zeros.
    pub fn counts(&self) -> Vec<(ChangeCategory, usize)> {
        ChangeCategory::ALL
            .into_iter()
            .map(|category| {
                let count = self.records.iter().filter(|r| r.category == category).count();
                (category, count)
            })
            .collect()
    }

    /// Distinct changed files, sorted.
    pub fn changed_files(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.file.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Persist as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        write_durably(path, json.as_bytes())?;
        Ok(())
    }

    /// Load a ledger previously written by [`ChangeLedger::save`].
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_category_parsing() {
        assert_eq!(
            "BUILD_CONFIG".parse::<ChangeCategory>().unwrap(),
            ChangeCategory::BuildConfig
        );
        assert_eq!(
            "spring-boot".parse::<ChangeCategory>().unwrap(),
            ChangeCategory::SpringBoot
        );
        assert_eq!(
            " test_fix ".parse::<ChangeCategory>().unwrap(),
            ChangeCategory::TestFix
        );
        let err = "STYLE".parse::<ChangeCategory>().unwrap_err();
        assert_eq!(err, UnknownCategory("STYLE".to_string()));
    }

    #[test]
    fn test_category_serde_uses_wire_names() {
        let json = serde_json::to_string(&ChangeCategory::CodeModernization).unwrap();
        assert_eq!(json, "\"CODE_MODERNIZATION\"");
        for category in ChangeCategory::ALL {
            assert_eq!(category.to_string(), category.as_str());
        }
    }

    #[test]
    fn test_append_keeps_order_and_duplicates() {
        let mut ledger = ChangeLedger::new();
        let first = ledger.append(ChangeRecord::new(ChangeCategory::Dependency, "pom.xml", "Lombok 1.18.30"));
        let second = ledger.append(ChangeRecord::new(ChangeCategory::Dependency, "pom.xml", "Lombok 1.18.30"));
        let third = ledger.append(ChangeRecord::new(ChangeCategory::BuildConfig, "pom.xml", "release 21"));

        assert_eq!((first, second, third), (1, 2, 3));
        assert_eq!(ledger.len(), 3);
        let sequences: Vec<usize> = ledger.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(ledger.by_category(ChangeCategory::Dependency).len(), 2);
    }

    #[test]
    fn test_counts_and_changed_files() {
        let mut ledger = ChangeLedger::new();
        ledger.append(ChangeRecord::new(ChangeCategory::TestFix, "src/test/B.java", "fix"));
        ledger.append(ChangeRecord::new(ChangeCategory::BuildConfig, "pom.xml", "bump"));
        ledger.append(ChangeRecord::new(ChangeCategory::TestFix, "src/test/A.java", "fix"));

        let counts = ledger.counts();
        assert_eq!(counts.len(), 6);
        assert_eq!(counts[0], (ChangeCategory::BuildConfig, 1));
        assert_eq!(counts[5], (ChangeCategory::TestFix, 2));
        assert_eq!(
            ledger.changed_files(),
            vec!["pom.xml", "src/test/A.java", "src/test/B.java"]
        );
    }

    #[test]
    fn test_default_revert_hint() {
        let record = ChangeRecord::new(ChangeCategory::BugFix, "A.java", "npe");
        assert_eq!(record.revert_hint, "git checkout -- 'A.java'");
        let record = record.with_revert_hint("cp A.java.bak A.java");
        assert_eq!(record.revert_hint, "cp A.java.bak A.java");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = ChangeLedger::new();
        ledger.append(
            ChangeRecord::new(ChangeCategory::SpringBoot, "Config.java", "javax to jakarta")
                .with_change_type("javax->jakarta")
                .with_before("import javax.servlet.Filter;")
                .with_after("import jakarta.servlet.Filter;"),
        );

        ledger.save(&path).unwrap();
        let loaded = ChangeLedger::load(&path).unwrap();
        assert_eq!(loaded, ledger);
    }
}
