//! The built-in tool set: read, write, list, run, apply-diff, grep-search,
//! file-search. Every handler validates its path arguments through the
//! policy validator and converts I/O failures into typed errors at the
//! boundary.

use crate::{
    BackupStore, CommandRunner, IoKind, Tool, ToolError, ToolSuccess, patch, search,
};
use codeloom_core::{ExecutionContext, ParamType, ToolDefinition, ToolParameter};
use codeloom_policy::validate_path;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content heuristics that trigger a warning (never a refusal) on write.
const DANGEROUS_CONTENT_PATTERNS: &[&str] =
    &["<script>", "eval(", "rm -rf", "exec(", "DROP TABLE"];

/// Shared state captured by the built-in handlers.
pub struct ToolContext {
    pub ctx: ExecutionContext,
    pub runner: CommandRunner,
    pub backups: Arc<BackupStore>,
}

impl ToolContext {
    pub fn workspace(&self) -> &Path {
        &self.ctx.workspace
    }
}

/// Construct the built-in tool set over a shared context.
pub fn builtin_tools(context: &Arc<ToolContext>) -> Vec<Tool> {
    vec![
        read_file_tool(context.clone()),
        write_file_tool(context.clone()),
        list_directory_tool(context.clone()),
        run_command_tool(context.clone()),
        apply_diff_tool(context.clone()),
        grep_search_tool(context.clone()),
        file_search_tool(context.clone()),
    ]
}

// ── argument helpers ──

fn required_str<'a>(args: &'a Map<String, Value>, tool: &str, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::MissingParameter {
            tool: tool.to_string(),
            parameter: key.to_string(),
        })
}

fn str_or<'a>(args: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

fn bool_or(args: &Map<String, Value>, key: &str, default: bool) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

fn u64_or(args: &Map<String, Value>, key: &str, default: u64) -> u64 {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn string_vec(args: &Map<String, Value>, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            // A lone string argument is accepted as a single-element vector.
            vec![s.clone()]
        }
        _ => Vec::new(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn relative_to(path: &Path, workspace: &Path) -> String {
    search::relative_display(path, workspace)
}

// ── read_file ──

fn read_file_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "read_file".to_string(),
        description: "Read a file from the workspace".to_string(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "workspace-relative file path"),
            ToolParameter::optional("encoding", ParamType::String, "text encoding")
                .with_default(json!("utf-8")),
        ],
        safe: true,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let raw = required_str(args, "read_file", "path")?;
            let encoding = str_or(args, "encoding", "utf-8");
            if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
                return Err(ToolError::Other(format!(
                    "unsupported encoding '{encoding}'"
                )));
            }
            let resolved = validate_path(raw, context.workspace())?;
            let bytes = fs::read(&resolved).map_err(|err| ToolError::io(&err, raw))?;
            let content = String::from_utf8_lossy(&bytes).to_string();
            // Pinned rule: a zero-byte file reports one line.
            let lines = content.split('\n').count();
            Ok(ToolSuccess::new(content.clone())
                .meta("path", resolved.to_string_lossy().to_string())
                .meta("relative_path", relative_to(&resolved, context.workspace()))
                .meta("size", bytes.len() as u64)
                .meta("lines", lines as u64)
                .meta("sha256", sha256_hex(&bytes)))
        }),
    )
}

// ── write_file ──

fn write_file_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "write_file".to_string(),
        description: "Write content to a file, creating it if needed".to_string(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "workspace-relative file path"),
            ToolParameter::required("content", ParamType::String, "full file content"),
            ToolParameter::optional(
                "create_dirs",
                ParamType::Boolean,
                "create missing parent directories",
            )
            .with_default(json!(true)),
        ],
        safe: false,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let raw = required_str(args, "write_file", "path")?;
            let content = required_str(args, "write_file", "content")?;
            let create_dirs = bool_or(args, "create_dirs", true);
            let resolved = validate_path(raw, context.workspace())?;

            let warnings: Vec<String> = DANGEROUS_CONTENT_PATTERNS
                .iter()
                .filter(|pattern| content.contains(*pattern))
                .map(|pattern| format!("content matches dangerous pattern {pattern:?}"))
                .collect();

            let existed = resolved.exists();
            if existed {
                if let Ok(original) = fs::read(&resolved) {
                    context.backups.record(&resolved, &original, "write_file");
                }
            }

            if let Some(parent) = resolved.parent() {
                if !parent.exists() {
                    if create_dirs {
                        fs::create_dir_all(parent).map_err(|err| ToolError::io(&err, raw))?;
                    } else {
                        return Err(ToolError::Io {
                            kind: IoKind::NotFound,
                            path: raw.to_string(),
                            message: "parent directory does not exist".to_string(),
                        });
                    }
                }
            }

            fs::write(&resolved, content).map_err(|err| ToolError::io(&err, raw))?;

            // Pinned rule: empty content reports zero lines.
            let lines = if content.is_empty() {
                0
            } else {
                content.matches('\n').count() + 1
            };

            let mut success = ToolSuccess::new(format!("wrote {} bytes to {raw}", content.len()))
                .meta("path", resolved.to_string_lossy().to_string())
                .meta("size", content.len() as u64)
                .meta("lines", lines as u64)
                .meta("created", !existed)
                .meta("sha256", sha256_hex(content.as_bytes()));
            if !warnings.is_empty() {
                success = success.meta("warnings", warnings);
            }
            Ok(success)
        }),
    )
}

// ── list_directory ──

fn list_directory_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "list_directory".to_string(),
        description: "List directory entries".to_string(),
        parameters: vec![
            ToolParameter::optional("path", ParamType::String, "directory to list")
                .with_default(json!(".")),
            ToolParameter::optional("recursive", ParamType::Boolean, "descend into subdirectories"),
            ToolParameter::optional("max_depth", ParamType::Number, "recursion depth limit"),
        ],
        safe: true,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let raw = str_or(args, "path", ".");
            let recursive = bool_or(args, "recursive", false);
            let max_depth = u64_or(args, "max_depth", 10) as usize;
            let resolved = validate_path(raw, context.workspace())?;

            let depth = if recursive { Some(max_depth) } else { Some(1) };
            let mut rows = Vec::new();
            for path in search::walk_tree(&resolved, depth) {
                if path == resolved {
                    continue;
                }
                let rel = relative_to(&path, context.workspace());
                if path.is_dir() {
                    rows.push(format!("{rel}/"));
                } else {
                    rows.push(rel);
                }
            }
            rows.sort();
            let count = rows.len();
            Ok(ToolSuccess::new(rows.join("\n")).meta("entries", count as u64))
        }),
    )
}

// ── run_command ──

fn run_command_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "run_command".to_string(),
        description: "Execute a command in the workspace".to_string(),
        parameters: vec![
            ToolParameter::required("command", ParamType::String, "command to execute"),
            ToolParameter::optional("args", ParamType::Array, "argument vector"),
            ToolParameter::optional("cwd", ParamType::String, "working directory"),
        ],
        safe: false,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let command = required_str(args, "run_command", "command")?;
            let argv = string_vec(args, "args");
            let cwd: Option<PathBuf> = match args.get("cwd").and_then(|v| v.as_str()) {
                Some(dir) => Some(validate_path(dir, context.workspace())?),
                None => None,
            };

            let output =
                context
                    .runner
                    .run(command, &argv, cwd.as_deref(), context.ctx.mode)?;

            if output.timed_out {
                return Err(ToolError::CommandTimeout(
                    context.runner.policy().max_command_duration_ms,
                ));
            }
            match output.exit_code {
                Some(0) => Ok(ToolSuccess::new(output.stdout.clone())
                    .meta("exit_code", 0)
                    .meta("stderr", output.stderr.clone())),
                code => Err(ToolError::CommandFailed {
                    exit_code: code.unwrap_or(-1),
                    tail: output.tail(2000),
                }),
            }
        }),
    )
}

// ── apply_diff ──

fn apply_diff_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "apply_diff".to_string(),
        description: "Apply a unified diff to a file".to_string(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "target file path"),
            ToolParameter::required("diff", ParamType::String, "unified diff text"),
            ToolParameter::optional("create_backup", ParamType::Boolean, "write a .backup sibling")
                .with_default(json!(true)),
        ],
        safe: false,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let raw = required_str(args, "apply_diff", "path")?;
            let diff = required_str(args, "apply_diff", "diff")?;
            let create_backup = bool_or(args, "create_backup", true);
            let resolved = validate_path(raw, context.workspace())?;

            let existed = resolved.exists();
            let original = if existed {
                fs::read_to_string(&resolved).map_err(|err| ToolError::io(&err, raw))?
            } else if patch::declares_creation(diff) {
                String::new()
            } else {
                return Err(ToolError::Io {
                    kind: IoKind::NotFound,
                    path: raw.to_string(),
                    message: "file does not exist and diff does not declare creation".to_string(),
                });
            };

            let applied = patch::apply_unified(&original, diff)?;

            let mut backup_path: Option<PathBuf> = None;
            if existed {
                context
                    .backups
                    .record(&resolved, original.as_bytes(), "apply_diff");
                if create_backup {
                    let sibling = PathBuf::from(format!("{}.backup", resolved.display()));
                    fs::write(&sibling, &original).map_err(|err| ToolError::io(&err, raw))?;
                    backup_path = Some(sibling);
                }
            }

            if !existed {
                if let Some(parent) = resolved.parent() {
                    fs::create_dir_all(parent).map_err(|err| ToolError::io(&err, raw))?;
                }
            }
            if let Err(err) = fs::write(&resolved, &applied.content) {
                // Best-effort rollback from the sibling backup.
                if let Some(ref sibling) = backup_path {
                    if let Ok(saved) = fs::read(sibling) {
                        let _ = fs::write(&resolved, saved);
                    }
                }
                return Err(ToolError::io(&err, raw));
            }

            Ok(ToolSuccess::new(format!(
                "patched {raw}: +{} -{}",
                applied.added, applied.removed
            ))
            .meta("linesAdded", applied.added as u64)
            .meta("linesRemoved", applied.removed as u64)
            .meta("originalSize", original.len() as u64)
            .meta("patchedSize", applied.content.len() as u64)
            .meta("fileCreated", !existed)
            .meta(
                "backup",
                backup_path
                    .map(|p| Value::from(p.to_string_lossy().to_string()))
                    .unwrap_or(Value::Null),
            ))
        }),
    )
}

// ── grep_search ──

fn grep_search_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "grep_search".to_string(),
        description: "Search file contents by regex or fixed string".to_string(),
        parameters: vec![
            ToolParameter::required("pattern", ParamType::String, "search pattern"),
            ToolParameter::optional("path", ParamType::String, "directory to search")
                .with_default(json!(".")),
            ToolParameter::optional("include", ParamType::String, "comma-separated glob filter"),
            ToolParameter::optional("fixed_strings", ParamType::Boolean, "treat pattern literally")
                .with_default(json!(false)),
            ToolParameter::optional("case_sensitive", ParamType::Boolean, "match case")
                .with_default(json!(false)),
        ],
        safe: true,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let pattern = required_str(args, "grep_search", "pattern")?;
            let raw_path = str_or(args, "path", ".");
            let resolved = validate_path(raw_path, context.workspace())?;
            let result = search::grep(&search::GrepRequest {
                pattern,
                root: &resolved,
                workspace: context.workspace(),
                include: args.get("include").and_then(|v| v.as_str()),
                fixed_strings: bool_or(args, "fixed_strings", false),
                case_sensitive: bool_or(args, "case_sensitive", false),
            })?;
            let count = result.lines.len();
            Ok(ToolSuccess::new(result.lines.join("\n"))
                .meta("matches", count as u64)
                .meta("truncated", result.truncated))
        }),
    )
}

// ── file_search ──

fn file_search_tool(context: Arc<ToolContext>) -> Tool {
    let definition = ToolDefinition {
        name: "file_search".to_string(),
        description: "Find files and directories by name pattern".to_string(),
        parameters: vec![
            ToolParameter::required("pattern", ParamType::String, "name pattern"),
            ToolParameter::optional("path", ParamType::String, "directory to search")
                .with_default(json!(".")),
            ToolParameter::optional("type", ParamType::String, "file, directory, or any")
                .with_default(json!("any")),
            ToolParameter::optional("max_depth", ParamType::Number, "depth limit")
                .with_default(json!(10)),
        ],
        safe: true,
    };
    Tool::new(
        definition,
        Arc::new(move |args| {
            let pattern = required_str(args, "file_search", "pattern")?;
            let raw_path = str_or(args, "path", ".");
            let kind = str_or(args, "type", "any");
            let max_depth = u64_or(args, "max_depth", 10) as usize;
            let resolved = validate_path(raw_path, context.workspace())?;
            let entries =
                search::find_entries(&resolved, context.workspace(), pattern, kind, max_depth);
            let rows: Vec<String> = entries
                .iter()
                .map(|entry| {
                    if entry.is_dir {
                        format!("{}/", entry.path)
                    } else {
                        entry.path.clone()
                    }
                })
                .collect();
            let count = rows.len();
            Ok(ToolSuccess::new(rows.join("\n")).meta("results", count as u64))
        }),
    )
}
