//! File operations: read, backed-up write, directory listing.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ActionResult, ToolError, Workspace};

/// Directories never descended into by listing or search.
pub const EXCLUDED_DIRS: &[&str] = &[".git", "target", ".gradle", "build", "node_modules"];

/// Suffix of the single-slot backup kept beside each overwritten file.
pub const BACKUP_SUFFIX: &str = ".bak";

pub(super) fn read_file(
    workspace: &Workspace,
    path: &str,
    limit: usize,
) -> Result<ActionResult, ToolError> {
    let resolved = workspace.resolve(path)?;
    if !resolved.exists() {
        return Err(ToolError::NotFound(format!("File '{}'", path)));
    }
    if resolved.is_dir() {
        return Err(ToolError::InvalidParameters(format!(
            "'{}' is a directory, use list_directory",
            path
        )));
    }

    let bytes = fs::read(&resolved)?;
    let content = String::from_utf8_lossy(&bytes);
    debug!(path = %path, bytes = bytes.len(), "Read file");

    if content.len() <= limit {
        return Ok(ActionResult::success(content.into_owned()));
    }

    let mut end = limit;
    while !content.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    let total_lines = content.lines().count();
    Ok(ActionResult::success(format!(
        "{}\n... [truncated: file has {} lines total]",
        &content[..end],
        total_lines
    )))
}

pub(super) fn write_file(
    workspace: &mut Workspace,
    path: &str,
    content: &str,
) -> Result<ActionResult, ToolError> {
    let resolved = workspace.resolve(path)?;
    if resolved.is_dir() {
        return Err(ToolError::InvalidParameters(format!(
            "'{}' is a directory",
            path
        )));
    }

    let mut backup = None;
    if resolved.exists() {
        let original = fs::read(&resolved)?;
        let backup_path = backup_path_for(&resolved);
        backup_verified(&workspace.relative_display(&resolved), &backup_path, &original)?;
        workspace.record_backup(resolved.clone(), backup_path.clone());
        backup = Some(backup_path);
    }

    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)?;
    }
    write_durably(&resolved, content.as_bytes())?;

    let shown = workspace.relative_display(&resolved);
    info!(path = %shown, bytes = content.len(), backed_up = backup.is_some(), "File written");

    let message = match backup {
        Some(backup) => format!(
            "Wrote {} bytes to {} (previous content saved to {})",
            content.len(),
            shown,
            workspace.relative_display(&backup)
        ),
        None => format!("Wrote {} bytes to new file {}", content.len(), shown),
    };
    Ok(ActionResult::success(message))
}

/// `<file>.bak` next to `original`.
pub fn backup_path_for(original: &Path) -> PathBuf {
    let mut name = original
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(BACKUP_SUFFIX);
    original.with_file_name(name)
}

/// Durably write the backup, then re-read it and compare digests.
/// The caller must not touch the original unless this returns `Ok`.
/// `original` is the root-relative name used in error messages.
fn backup_verified(original: &str, backup: &Path, content: &[u8]) -> Result<(), ToolError> {
    let failed = |reason: String| ToolError::BackupFailed {
        path: original.to_string(),
        reason,
    };

    write_durably(backup, content).map_err(|e| failed(e.to_string()))?;

    let expected = hex::encode(Sha256::digest(content));
    let written = fs::read(backup).map_err(|e| failed(e.to_string()))?;
    let actual = hex::encode(Sha256::digest(&written));
    if expected != actual {
        return Err(failed(format!(
            "digest mismatch (expected {}, found {})",
            expected, actual
        )));
    }

    debug!(backup = %backup.display(), sha256 = %expected, "Backup verified");
    Ok(())
}

/// Write `content` to `path` atomically and flush it to disk.
///
/// Data goes to a temp file in the same directory, is fsynced, renamed over
/// the target, and the directory entry is fsynced. An existing target keeps
/// its permissions.
pub fn write_durably(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Directory fsync is not supported everywhere; the rename is already done.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

pub(super) fn list_directory(
    workspace: &Workspace,
    path: &str,
    max_depth: usize,
    limit: usize,
) -> Result<ActionResult, ToolError> {
    let resolved = workspace.resolve(path)?;
    if !resolved.exists() {
        return Err(ToolError::NotFound(format!("Directory '{}'", path)));
    }
    if !resolved.is_dir() {
        return Err(ToolError::InvalidParameters(format!(
            "'{}' is not a directory",
            path
        )));
    }

    let walker = WalkDir::new(&resolved)
        .min_depth(1)
        .max_depth(max_depth.max(1))
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry));

    let mut lines = Vec::new();
    let mut truncated = false;
    for entry in walker.filter_map(|e| e.ok()) {
        if lines.len() >= limit {
            truncated = true;
            break;
        }
        let kind = if entry.path_is_symlink() {
            "symlink"
        } else if entry.file_type().is_dir() {
            "dir"
        } else {
            "file"
        };
        lines.push(format!("{} {}", kind, workspace.relative_display(entry.path())));
    }

    if lines.is_empty() {
        return Ok(ActionResult::success("(empty directory)"));
    }
    if truncated {
        lines.push(format!("... (listing truncated at {} entries)", limit));
    }
    Ok(ActionResult::success(lines.join("\n")))
}

pub(super) fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}
