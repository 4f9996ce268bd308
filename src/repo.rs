//! Repository locator resolution, cloning and build-tool detection.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::error::RepoError;

/// Build system of the target repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    Maven,
    Gradle,
    Unknown,
}

impl BuildTool {
    /// Detect from the files in the repository root.
    pub fn detect(root: &Path) -> Self {
        if root.join("pom.xml").is_file() {
            BuildTool::Maven
        } else if root.join("build.gradle").is_file() || root.join("build.gradle.kts").is_file() {
            BuildTool::Gradle
        } else {
            BuildTool::Unknown
        }
    }

    /// The command that runs the test suite, if the tool is known.
    pub fn test_command(&self, root: &Path) -> Option<String> {
        match self {
            BuildTool::Maven => Some("mvn -q test".to_string()),
            BuildTool::Gradle if root.join("gradlew").is_file() => {
                Some("./gradlew test --no-daemon".to_string())
            }
            BuildTool::Gradle => Some("gradle test --no-daemon".to_string()),
            BuildTool::Unknown => None,
        }
    }
}

impl fmt::Display for BuildTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildTool::Maven => "maven",
            BuildTool::Gradle => "gradle",
            BuildTool::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A repository ready to be migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    /// What the user passed.
    pub locator: String,
    /// Local checkout.
    pub path: PathBuf,
    /// Whether this run cloned it.
    pub cloned: bool,
}

/// Directory name for a locator: last path segment without `.git`.
pub fn repo_name(locator: &str) -> Result<String, RepoError> {
    let trimmed = locator.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':', '\\'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        return Err(RepoError::UnnamedLocator(locator.to_string()));
    }
    Ok(name.to_string())
}

/// Use a local directory in place, or clone the locator into `clone_dir`.
///
/// An existing checkout at the clone target is reused.
pub async fn resolve(locator: &str, clone_dir: &Path) -> Result<ResolvedRepository, RepoError> {
    let locator = locator.trim();
    if locator.is_empty() {
        return Err(RepoError::EmptyLocator);
    }

    let local = Path::new(locator);
    if local.is_dir() {
        return Ok(ResolvedRepository {
            locator: locator.to_string(),
            path: local.canonicalize()?,
            cloned: false,
        });
    }

    let target = clone_dir.join(repo_name(locator)?);
    if target.join(".git").is_dir() {
        info!(path = %target.display(), "Reusing existing checkout");
        return Ok(ResolvedRepository {
            locator: locator.to_string(),
            path: target,
            cloned: false,
        });
    }

    tokio::fs::create_dir_all(clone_dir).await?;
    info!(locator = %locator, target = %target.display(), "Cloning repository");

    let output = Command::new("git")
        .arg("clone")
        .arg(locator)
        .arg(&target)
        .output()
        .await?;

    if !output.status.success() {
        return Err(RepoError::CloneFailed {
            locator: locator.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(ResolvedRepository {
        locator: locator.to_string(),
        path: target,
        cloned: true,
    })
}

/// Pick the test command: the override if given, else the build tool's.
pub fn resolve_test_command(
    root: &Path,
    override_command: Option<&str>,
) -> Result<(BuildTool, String), RepoError> {
    let tool = BuildTool::detect(root);
    if let Some(command) = override_command.map(str::trim).filter(|c| !c.is_empty()) {
        return Ok((tool, command.to_string()));
    }
    tool.test_command(root)
        .map(|command| (tool, command))
        .ok_or_else(|| RepoError::UnknownBuildTool(root.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://github.com/acme/shapes.git").unwrap(), "shapes");
        assert_eq!(repo_name("https://github.com/acme/shapes/").unwrap(), "shapes");
        assert_eq!(repo_name("git@github.com:acme/petclinic.git").unwrap(), "petclinic");
        assert!(matches!(repo_name("https://host/.."), Err(RepoError::UnnamedLocator(_))));
    }

    #[test]
    fn test_detect_build_tool() {
        let dir = TempDir::new().unwrap();
        assert_eq!(BuildTool::detect(dir.path()), BuildTool::Unknown);
        assert_eq!(BuildTool::Unknown.test_command(dir.path()), None);

        fs::write(dir.path().join("build.gradle.kts"), "").unwrap();
        assert_eq!(BuildTool::detect(dir.path()), BuildTool::Gradle);
        assert_eq!(
            BuildTool::Gradle.test_command(dir.path()).unwrap(),
            "gradle test --no-daemon"
        );
        fs::write(dir.path().join("gradlew"), "").unwrap();
        assert_eq!(
            BuildTool::Gradle.test_command(dir.path()).unwrap(),
            "./gradlew test --no-daemon"
        );

        fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        assert_eq!(BuildTool::detect(dir.path()), BuildTool::Maven);
    }

    #[test]
    fn test_resolve_test_command_override_and_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve_test_command(dir.path(), None),
            Err(RepoError::UnknownBuildTool(_))
        ));
        let (tool, command) = resolve_test_command(dir.path(), Some("make test")).unwrap();
        assert_eq!(tool, BuildTool::Unknown);
        assert_eq!(command, "make test");
    }

    #[tokio::test]
    async fn test_resolve_local_directory_in_place() {
        let dir = TempDir::new().unwrap();
        let clone_dir = TempDir::new().unwrap();
        let resolved = resolve(dir.path().to_str().unwrap(), clone_dir.path())
            .await
            .unwrap();
        assert!(!resolved.cloned);
        assert_eq!(resolved.path, dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_empty_locator() {
        let clone_dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve("  ", clone_dir.path()).await,
            Err(RepoError::EmptyLocator)
        ));
    }
}
