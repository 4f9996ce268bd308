//! Path containment for a session's working directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::ToolError;
use crate::error::SessionError;

/// The directory a session is allowed to touch, plus the backups taken in it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    /// Original file -> its `.bak` sibling, for every file overwritten so far.
    backups: BTreeMap<PathBuf, PathBuf>,
}

impl Workspace {
    /// Open a workspace rooted at `root`. The root is canonicalized once here.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SessionError> {
        let raw = root.as_ref();
        let root = raw.canonicalize().map_err(|source| SessionError::Workspace {
            path: raw.display().to_string(),
            source,
        })?;
        if !root.is_dir() {
            return Err(SessionError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            root,
            backups: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path against the root.
    ///
    /// Rejects anything that lands outside the root, either lexically
    /// (`..`, absolute paths) or through a symlink in an existing ancestor.
    /// The target itself does not need to exist.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(raw.trim());
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(ToolError::PathOutsideRoot(raw.to_string()));
        }

        // Canonicalize the deepest existing ancestor so a symlink inside the
        // tree cannot point the rest of the path elsewhere. Dangling links
        // count as existing and fail to canonicalize.
        let mut existing = normalized.as_path();
        let mut remainder = Vec::new();
        while existing.symlink_metadata().is_err() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    remainder.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut resolved = existing
            .canonicalize()
            .map_err(|e| ToolError::FilesystemError(e.to_string()))?;
        if !resolved.starts_with(&self.root) {
            return Err(ToolError::PathOutsideRoot(raw.to_string()));
        }
        for part in remainder.into_iter().rev() {
            resolved.push(part);
        }
        Ok(resolved)
    }

    /// Path relative to the root, for display. Falls back to the full path.
    pub fn relative_display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    /// Remember that `original` was backed up to `backup`.
    pub fn record_backup(&mut self, original: PathBuf, backup: PathBuf) {
        self.backups.insert(original, backup);
    }

    /// The backup taken for `original`, if it has ever been overwritten.
    pub fn backup_for(&self, original: &Path) -> Option<&PathBuf> {
        self.backups.get(original)
    }

    /// All backups taken so far, ordered by original path.
    pub fn backups(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.backups
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
