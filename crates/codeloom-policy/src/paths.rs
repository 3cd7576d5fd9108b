//! Path validation: confinement to the workspace plus a sensitive-directory
//! block list. Every tool that receives a path goes through [`validate_path`].

use crate::PolicyError;
use std::path::{Component, Path, PathBuf};

/// Characters never valid in a workspace path (NUL plus the Windows-reserved
/// set).
const FORBIDDEN_PATH_CHARS: &[char] = &['\0', '<', '>', '"', '|', '?', '*'];

/// Directory roots no tool may touch even when the workspace encloses them:
/// system roots, user key stores, cloud credential caches, and platform
/// application-data roots.
const SENSITIVE_SYSTEM_ROOTS: &[&str] = &[
    "/etc", "/sys", "/proc", "/boot", "/dev",
    "C:\\Windows", "C:\\Program Files", "C:\\Program Files (x86)",
];

const SENSITIVE_HOME_SUBDIRS: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".aws",
    ".azure",
    ".kube",
    ".config/gcloud",
];

/// Validate a user-supplied path against the workspace root.
///
/// Steps, in order: reject empty; reject forbidden characters and literal
/// `..`; normalize; resolve workspace-relative; confirm confinement; check
/// the sensitive-directory list. Returns the normalized absolute path.
pub fn validate_path(raw: &str, workspace: &Path) -> Result<PathBuf, PolicyError> {
    if raw.trim().is_empty() {
        return Err(PolicyError::EmptyPath);
    }
    if raw.chars().any(|ch| FORBIDDEN_PATH_CHARS.contains(&ch)) {
        return Err(PolicyError::PathCharacters(raw.to_string()));
    }
    if Path::new(raw)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PolicyError::PathTraversal(raw.to_string()));
    }

    let workspace_root = normalize(workspace);
    let candidate = Path::new(raw);
    let resolved = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&workspace_root.join(candidate))
    };

    if !resolved.starts_with(&workspace_root) {
        return Err(PolicyError::OutsideWorkspace(raw.to_string()));
    }

    for sensitive in sensitive_directories() {
        if path_starts_with(&resolved, &sensitive, !case_sensitive_filesystem()) {
            return Err(PolicyError::SensitivePath(raw.to_string()));
        }
    }

    Ok(resolved)
}

/// Lexical normalization: drop `.` components, collapse separators. `..` is
/// rejected upstream, so it never reaches here.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn case_sensitive_filesystem() -> bool {
    !cfg!(any(target_os = "windows", target_os = "macos"))
}

fn path_starts_with(path: &Path, prefix: &Path, ignore_case: bool) -> bool {
    if !ignore_case {
        return path.starts_with(prefix);
    }
    let mut path_parts = path.components();
    for prefix_part in prefix.components() {
        match path_parts.next() {
            Some(part)
                if part
                    .as_os_str()
                    .to_string_lossy()
                    .eq_ignore_ascii_case(&prefix_part.as_os_str().to_string_lossy()) => {}
            _ => return false,
        }
    }
    true
}

/// The compiled sensitive-directory list for this host.
pub fn sensitive_directories() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = SENSITIVE_SYSTEM_ROOTS.iter().map(PathBuf::from).collect();
    if let Some(home) = home_dir() {
        for sub in SENSITIVE_HOME_SUBDIRS {
            dirs.push(home.join(sub));
        }
    }
    if let Ok(appdata) = std::env::var("APPDATA") {
        dirs.push(PathBuf::from(appdata));
    }
    dirs
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn workspace() -> PathBuf {
        PathBuf::from("/ws/project")
    }

    #[test]
    fn relative_path_resolves_under_workspace() {
        let resolved = validate_path("src/main.rs", &workspace()).expect("valid");
        assert_eq!(resolved, PathBuf::from("/ws/project/src/main.rs"));
    }

    #[test]
    fn absolute_path_inside_workspace_is_accepted() {
        let resolved = validate_path("/ws/project/a.txt", &workspace()).expect("valid");
        assert_eq!(resolved, PathBuf::from("/ws/project/a.txt"));
    }

    #[test]
    fn empty_and_whitespace_paths_are_rejected() {
        assert_eq!(validate_path("", &workspace()), Err(PolicyError::EmptyPath));
        assert_eq!(
            validate_path("   ", &workspace()),
            Err(PolicyError::EmptyPath)
        );
    }

    #[test]
    fn parent_traversal_is_rejected() {
        assert!(matches!(
            validate_path("../outside.txt", &workspace()),
            Err(PolicyError::PathTraversal(_))
        ));
        assert!(matches!(
            validate_path("src/../../etc/passwd", &workspace()),
            Err(PolicyError::PathTraversal(_))
        ));
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        for raw in ["a\0b", "a<b", "what?.txt", "star*.rs"] {
            assert!(matches!(
                validate_path(raw, &workspace()),
                Err(PolicyError::PathCharacters(_))
            ));
        }
    }

    #[test]
    fn absolute_path_outside_workspace_is_rejected() {
        assert!(matches!(
            validate_path("/tmp/elsewhere", &workspace()),
            Err(PolicyError::OutsideWorkspace(_))
        ));
    }

    #[test]
    fn sensitive_directory_is_blocked_even_inside_workspace() {
        // A workspace rooted at / encloses /etc.
        let root = PathBuf::from("/");
        assert!(matches!(
            validate_path("/etc/passwd", &root),
            Err(PolicyError::SensitivePath(_))
        ));
    }

    #[test]
    fn curdir_components_are_normalized_away() {
        let resolved = validate_path("./src/./lib.rs", &workspace()).expect("valid");
        assert_eq!(resolved, PathBuf::from("/ws/project/src/lib.rs"));
    }

    proptest! {
        #[test]
        fn successful_validation_stays_under_workspace(raw in "[a-zA-Z0-9_./-]{1,40}") {
            let ws = workspace();
            if let Ok(resolved) = validate_path(&raw, &ws) {
                prop_assert!(resolved.starts_with(&ws));
            }
        }
    }
}
