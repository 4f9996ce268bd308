//! Regex search across the working directory.

use std::fs;

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::file::is_excluded;
use super::{truncate, ActionResult, ToolError, Workspace};

/// Longest matching line echoed back, in bytes.
const MAX_LINE_LENGTH: usize = 200;

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Path relative to the workspace root.
    pub file: String,
    /// 1-based line number.
    pub line_number: usize,
    pub line: String,
}

/// Find every line matching `pattern`, files in path order.
pub fn find_matches(
    workspace: &Workspace,
    pattern: &str,
    scope: Option<&str>,
    file_extension: Option<&str>,
    limit: usize,
) -> Result<(Vec<SearchMatch>, bool), ToolError> {
    let regex = Regex::new(pattern).map_err(|e| ToolError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let root = workspace.resolve(scope.unwrap_or("."))?;
    if !root.exists() {
        return Err(ToolError::NotFound(format!(
            "Search path '{}'",
            scope.unwrap_or(".")
        )));
    }

    let extension = file_extension.map(|ext| ext.trim_start_matches('.').to_string());

    let mut matches = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ext) = &extension {
            let matches_ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == ext)
                .unwrap_or(false);
            if !matches_ext {
                continue;
            }
        }

        // Binary and unreadable files are skipped.
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };

        for (index, line) in content.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if matches.len() >= limit {
                return Ok((matches, true));
            }
            matches.push(SearchMatch {
                file: workspace.relative_display(entry.path()),
                line_number: index + 1,
                line: truncate(line.trim(), MAX_LINE_LENGTH),
            });
        }
    }

    Ok((matches, false))
}

pub(super) fn search_in_files(
    workspace: &Workspace,
    pattern: &str,
    scope: Option<&str>,
    file_extension: Option<&str>,
    limit: usize,
) -> Result<ActionResult, ToolError> {
    let (matches, truncated) = find_matches(workspace, pattern, scope, file_extension, limit)?;

    if matches.is_empty() {
        return Ok(ActionResult::success(format!(
            "No matches found for pattern '{}'",
            pattern
        )));
    }

    let mut output: Vec<String> = matches
        .iter()
        .map(|m| format!("{}:{}: {}", m.file, m.line_number, m.line))
        .collect();
    if truncated {
        output.push(format!("... (results truncated at {} matches)", limit));
    }
    Ok(ActionResult::success(output.join("\n")))
}
