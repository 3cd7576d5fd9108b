pub mod backup;
pub mod builtins;
pub mod patch;
pub mod runner;
pub mod search;

use codeloom_core::{ExecutionContext, SafetyMode, ToolCall, ToolDefinition, ToolOutcome};
use codeloom_policy::PolicyError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use backup::BackupStore;
pub use builtins::{ToolContext, builtin_tools};
pub use runner::{CommandOutput, CommandRunner};

/// Sub-kinds of I/O failure surfaced to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Permission,
    NotFound,
    OutOfSpace,
    ReadOnly,
    Other,
}

impl IoKind {
    pub fn classify(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied => IoKind::Permission,
            ErrorKind::NotFound => IoKind::NotFound,
            ErrorKind::StorageFull => IoKind::OutOfSpace,
            ErrorKind::ReadOnlyFilesystem => IoKind::ReadOnly,
            _ => IoKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IoKind::Permission => "permission denied",
            IoKind::NotFound => "not found",
            IoKind::OutOfSpace => "out of space",
            IoKind::ReadOnly => "read-only filesystem",
            IoKind::Other => "i/o error",
        }
    }
}

/// Typed failures produced inside tool handlers. Everything flattens into
/// `ToolOutcome::Failure` at the executor boundary; nothing here escapes as
/// a panic or an unchecked error.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("missing required parameter '{parameter}' for tool '{tool}'")]
    MissingParameter { tool: String, parameter: String },
    #[error("blocked by policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("{} on '{path}': {message}", .kind.as_str())]
    Io {
        kind: IoKind,
        path: String,
        message: String,
    },
    #[error("patch format error: {0}")]
    PatchFormat(String),
    #[error("command timed out after {0} ms")]
    CommandTimeout(u64),
    #[error("command exited with code {exit_code}: {tail}")]
    CommandFailed { exit_code: i32, tail: String },
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn io(err: &std::io::Error, path: &str) -> Self {
        ToolError::Io {
            kind: IoKind::classify(err),
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Payload of a successful tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolSuccess {
    pub output: String,
    pub metadata: serde_json::Map<String, Value>,
}

impl ToolSuccess {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

impl From<ToolSuccess> for ToolOutcome {
    fn from(success: ToolSuccess) -> Self {
        ToolOutcome::Success {
            output: success.output,
            metadata: success.metadata,
        }
    }
}

/// Handler signature: synchronous from the caller's view, owns no state
/// beyond what its closure captured at registration time.
pub type ToolHandler =
    Arc<dyn Fn(&serde_json::Map<String, Value>) -> Result<ToolSuccess, ToolError> + Send + Sync>;

/// A tool is its typed definition plus a handler.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl Tool {
    pub fn new(definition: ToolDefinition, handler: ToolHandler) -> Self {
        Self {
            definition,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Registry of tools by unique name. Populated at startup, read-only while
/// the agent loop runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        let name = tool.definition.name.clone();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// User's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    /// Terminate the session gracefully.
    Quit,
}

/// Diff preview attached to write-style approval prompts.
#[derive(Debug, Clone)]
pub struct DiffPreview {
    pub target: String,
    pub new_file: bool,
    pub added: usize,
    pub removed: usize,
    /// Full unified diff, present only for small existing files.
    pub full_diff: Option<String>,
}

/// Seam for interactive approval. The CLI renders the `y/n/d/q` prompt;
/// tests script decisions directly.
pub trait ApprovalHandler: Send + Sync {
    fn approve(&self, call: &ToolCall, preview: Option<&DiffPreview>) -> ApprovalDecision;
}

/// Result of driving one call through the executor.
#[derive(Debug, Clone)]
pub enum Execution {
    Completed(ToolOutcome),
    /// The user answered `q` at an approval prompt.
    QuitRequested,
}

impl Execution {
    pub fn outcome(&self) -> Option<&ToolOutcome> {
        match self {
            Execution::Completed(outcome) => Some(outcome),
            Execution::QuitRequested => None,
        }
    }
}

/// Files under this many lines get a full diff preview; larger ones get
/// `+N/-N` statistics only.
const FULL_DIFF_PREVIEW_MAX_LINES: usize = 50;

/// Validates parameters, applies the approval policy per call, invokes the
/// handler, and flattens every failure into a `ToolOutcome`.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    ctx: ExecutionContext,
    approval: Option<Arc<dyn ApprovalHandler>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ExecutionContext) -> Self {
        Self {
            registry,
            ctx,
            approval: None,
        }
    }

    pub fn with_approval(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn set_mode(&mut self, mode: SafetyMode) {
        self.ctx.mode = mode;
    }

    /// Drive one tool call: resolve, validate, approve, invoke, report.
    pub fn execute(&self, call: &ToolCall) -> Execution {
        let Some(tool) = self.registry.get(&call.name) else {
            return Execution::Completed(ToolOutcome::failure(
                ToolError::UnknownTool(call.name.clone()).to_string(),
            ));
        };

        for parameter in tool.definition.required_parameters() {
            if !call.args.contains_key(&parameter.name) {
                return Execution::Completed(ToolOutcome::failure(
                    ToolError::MissingParameter {
                        tool: call.name.clone(),
                        parameter: parameter.name.clone(),
                    }
                    .to_string(),
                ));
            }
        }

        if self.ctx.mode == SafetyMode::DryRun {
            return Execution::Completed(ToolOutcome::success("DRY-RUN; no effect"));
        }

        if self.ctx.mode == SafetyMode::Review && !tool.definition.safe {
            let preview = self.diff_preview(call);
            let decision = match &self.approval {
                Some(handler) => handler.approve(call, preview.as_ref()),
                // Non-interactive review sessions deny unsafe tools.
                None => ApprovalDecision::Denied,
            };
            match decision {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Denied => {
                    return Execution::Completed(ToolOutcome::failure(format!(
                        "tool '{}' denied by user",
                        call.name
                    )));
                }
                ApprovalDecision::Quit => return Execution::QuitRequested,
            }
        }

        match (tool.handler)(&call.args) {
            Ok(success) => Execution::Completed(success.into()),
            Err(err) => Execution::Completed(ToolOutcome::failure(err.to_string())),
        }
    }

    /// Compute the diff preview for write-style calls: full unified diff for
    /// small existing files, `+N/-N` statistics otherwise, "new file" when
    /// the target does not exist yet.
    fn diff_preview(&self, call: &ToolCall) -> Option<DiffPreview> {
        let (path, proposed) = match call.name.as_str() {
            "write_file" => {
                let path = call.str_arg("path")?;
                let content = call.str_arg("content")?.to_string();
                (path, content)
            }
            "apply_diff" => {
                let path = call.str_arg("path")?;
                let diff = call.str_arg("diff")?;
                let original = std::fs::read_to_string(
                    codeloom_policy::validate_path(path, &self.ctx.workspace).ok()?,
                )
                .unwrap_or_default();
                let applied = patch::apply_unified(&original, diff).ok()?;
                (path, applied.content)
            }
            _ => return None,
        };

        let resolved = codeloom_policy::validate_path(path, &self.ctx.workspace).ok()?;
        if !resolved.exists() {
            let added = if proposed.is_empty() {
                0
            } else {
                proposed.matches('\n').count() + 1
            };
            return Some(DiffPreview {
                target: path.to_string(),
                new_file: true,
                added,
                removed: 0,
                full_diff: None,
            });
        }

        let current = std::fs::read_to_string(&resolved).ok()?;
        let (added, removed) = patch::line_diff_stats(&current, &proposed);
        let full_diff = if current.lines().count() < FULL_DIFF_PREVIEW_MAX_LINES {
            Some(patch::generate_unified(path, &current, &proposed))
        } else {
            None
        };
        Some(DiffPreview {
            target: path.to_string(),
            new_file: false,
            added,
            removed,
            full_diff,
        })
    }
}
