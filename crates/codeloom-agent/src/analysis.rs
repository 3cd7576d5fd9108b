//! Shallow import analysis: a per-file dependency graph used to answer
//! "what is affected if I modify X". Not on the agent loop's critical path.

use codeloom_tools::search;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct FileNode {
    pub language: String,
    /// Outbound imports, workspace-relative.
    pub imports: Vec<String>,
    /// Inbound edges, filled by the second pass.
    pub used_by: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, FileNode>,
}

impl DependencyGraph {
    /// Scan the workspace and build the graph: one pass extracting imports,
    /// a second pass populating `used_by`.
    pub fn build(workspace: &Path) -> Self {
        let mut nodes: BTreeMap<String, FileNode> = BTreeMap::new();

        for path in search::walk_tree(workspace, None) {
            if !path.is_file() {
                continue;
            }
            let Some(language) = language_of(&path) else {
                continue;
            };
            let rel = search::relative_display(&path, workspace);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let imports = extract_imports(language, &content, &rel, workspace);
            nodes.insert(
                rel,
                FileNode {
                    language: language.to_string(),
                    imports,
                    used_by: Vec::new(),
                },
            );
        }

        // Second pass: invert the edges.
        let edges: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|(from, node)| {
                node.imports
                    .iter()
                    .map(|to| (from.clone(), to.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (from, to) in edges {
            if let Some(target) = nodes.get_mut(&to) {
                target.used_by.push(from);
            }
        }

        Self { nodes }
    }

    pub fn node(&self, rel: &str) -> Option<&FileNode> {
        self.nodes.get(rel)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every file that transitively depends on `rel`.
    pub fn impact_of(&self, rel: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([rel.to_string()]);
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for user in &node.used_by {
                    if seen.insert(user.clone()) {
                        queue.push_back(user.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }
}

fn language_of(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str())? {
        "rs" => Some("rust"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "py" => Some("python"),
        _ => None,
    }
}

fn extract_imports(language: &str, content: &str, rel: &str, workspace: &Path) -> Vec<String> {
    let mut imports = BTreeSet::new();
    let dir = Path::new(rel).parent().unwrap_or(Path::new(""));

    match language {
        "rust" => {
            let module = Regex::new(r"(?m)^\s*(?:pub\s+)?mod\s+([A-Za-z0-9_]+)\s*;").unwrap();
            for capture in module.captures_iter(content) {
                let name = &capture[1];
                for candidate in [
                    dir.join(format!("{name}.rs")),
                    dir.join(name).join("mod.rs"),
                ] {
                    let rel_candidate = candidate.to_string_lossy().replace('\\', "/");
                    if workspace.join(&candidate).is_file() {
                        imports.insert(rel_candidate);
                        break;
                    }
                }
            }
        }
        "javascript" | "typescript" => {
            let import = Regex::new(
                r#"(?:import\s[^'"]*from\s*|require\s*\(\s*)['"](\.{1,2}/[^'"]+)['"]"#,
            )
            .unwrap();
            for capture in import.captures_iter(content) {
                if let Some(target) = resolve_relative(workspace, dir, &capture[1]) {
                    imports.insert(target);
                }
            }
        }
        "python" => {
            let import = Regex::new(r"(?m)^\s*(?:from\s+([A-Za-z0-9_.]+)\s+import|import\s+([A-Za-z0-9_.]+))").unwrap();
            for capture in import.captures_iter(content) {
                let module = capture
                    .get(1)
                    .or_else(|| capture.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let candidate = dir.join(format!("{}.py", module.trim_start_matches('.').replace('.', "/")));
                if workspace.join(&candidate).is_file() {
                    imports.insert(candidate.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        _ => {}
    }

    imports.remove(rel);
    imports.into_iter().collect()
}

/// Resolve `./x` / `../x` against the importing file's directory, trying the
/// usual extension candidates.
fn resolve_relative(workspace: &Path, dir: &Path, spec: &str) -> Option<String> {
    let joined = normalize(&dir.join(spec));
    let candidates = [
        joined.clone(),
        format!("{joined}.js"),
        format!("{joined}.ts"),
        format!("{joined}.jsx"),
        format!("{joined}.tsx"),
        format!("{joined}/index.js"),
        format!("{joined}/index.ts"),
    ];
    candidates
        .into_iter()
        .find(|candidate| workspace.join(candidate).is_file())
}

/// Lexically resolve `.` and `..` segments in a relative path.
fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                parts.pop();
            }
            other => parts.push(other.as_os_str().to_string_lossy().to_string()),
        }
    }
    parts.join("/")
}
