//! Workspace walking and the grep/file search engines.

use crate::ToolError;
use ignore::WalkBuilder;
use regex::RegexBuilder;
use std::path::{Path, PathBuf};

/// Directories never entered by search or listing.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "out",
    ".cache",
    "__pycache__",
    ".venv",
    "venv",
    "coverage",
    ".next",
    ".codeloom",
];

/// Extensions treated as binary and skipped by grep.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "rar", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "wasm", "woff", "woff2",
    "ttf", "eot", "otf", "mp3", "mp4", "avi", "mov", "sqlite", "db", "bin", "lock",
];

/// Hard cap on search results.
pub const MAX_RESULTS: usize = 200;
/// Grep output lines are truncated at this many characters.
pub const MAX_LINE_CHARS: usize = 500;

pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Simple glob matching: `*.ext`, `**/*.ext`, `*name*`, plain substring.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return true;
    }
    if let Some(rest) = pattern.strip_prefix("**/") {
        return wildcard_match(rest, base_name(candidate)) || wildcard_match(rest, candidate);
    }
    if pattern.contains('*') {
        wildcard_match(pattern, candidate) || wildcard_match(pattern, base_name(candidate))
    } else {
        candidate.contains(pattern)
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Iterative `*`-only wildcard matcher with backtracking.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_t = 0usize;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Walk files under `root`, skipping the exclusion set. `max_depth` counts
/// from `root` (None = unlimited).
pub fn walk_tree(root: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .follow_links(false)
        .require_git(false)
        .max_depth(max_depth);
    builder.filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !(entry.file_type().is_some_and(|t| t.is_dir()) && is_excluded_dir(&name))
    });

    let mut paths = Vec::new();
    for entry in builder.build().flatten() {
        paths.push(entry.path().to_path_buf());
    }
    paths.sort();
    paths
}

pub struct GrepRequest<'a> {
    pub pattern: &'a str,
    pub root: &'a Path,
    pub workspace: &'a Path,
    /// Comma-separated glob list.
    pub include: Option<&'a str>,
    pub fixed_strings: bool,
    pub case_sensitive: bool,
}

pub struct GrepResult {
    /// `file:line: content` rows.
    pub lines: Vec<String>,
    pub truncated: bool,
}

/// Regex (or fixed-string) search over the workspace tree.
pub fn grep(request: &GrepRequest<'_>) -> Result<GrepResult, ToolError> {
    let source = if request.fixed_strings {
        regex::escape(request.pattern)
    } else {
        request.pattern.to_string()
    };
    let matcher = RegexBuilder::new(&source)
        .case_insensitive(!request.case_sensitive)
        .build()
        .map_err(|err| ToolError::Other(format!("invalid pattern '{}': {err}", request.pattern)))?;

    let includes: Vec<&str> = request
        .include
        .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let mut lines = Vec::new();
    let mut truncated = false;

    'files: for path in walk_tree(request.root, None) {
        if !path.is_file() || has_binary_extension(&path) {
            continue;
        }
        let rel = relative_display(&path, request.workspace);
        if !includes.is_empty() && !includes.iter().any(|glob| glob_match(glob, &rel)) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue; // unreadable or non-utf8
        };
        for (idx, line) in content.lines().enumerate() {
            if matcher.is_match(line) {
                lines.push(format!("{rel}:{}: {}", idx + 1, clip(line, MAX_LINE_CHARS)));
                if lines.len() >= MAX_RESULTS {
                    truncated = true;
                    break 'files;
                }
            }
        }
    }

    Ok(GrepResult { lines, truncated })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundEntry {
    pub path: String,
    pub is_dir: bool,
}

/// Name-pattern search with a depth limit. Directories sort before files,
/// then lexicographically. Capped at [`MAX_RESULTS`].
pub fn find_entries(
    root: &Path,
    workspace: &Path,
    pattern: &str,
    kind: &str,
    max_depth: usize,
) -> Vec<FoundEntry> {
    let mut entries = Vec::new();
    for path in walk_tree(root, Some(max_depth)) {
        if path == root {
            continue;
        }
        let is_dir = path.is_dir();
        match kind {
            "file" if is_dir => continue,
            "directory" if !is_dir => continue,
            _ => {}
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !glob_match(pattern, &name) {
            continue;
        }
        entries.push(FoundEntry {
            path: relative_display(&path, workspace),
            is_dir,
        });
    }
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.path.cmp(&b.path)));
    entries.truncate(MAX_RESULTS);
    entries
}

pub fn relative_display(path: &Path, workspace: &Path) -> String {
    path.strip_prefix(workspace)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn clip(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        line.chars().take(max_chars).collect()
    }
}
