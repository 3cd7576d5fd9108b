pub mod config;
pub mod tags;
pub mod token;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub type Result<T> = anyhow::Result<T>;

/// Role tag carried by every transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One transcript entry. Transcripts are ordered `Vec<Message>` whose first
/// element is always the system message, including after compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Semantic parameter types understood by the parser and the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Map a JSON-Schema `type` string onto the internal set. `integer`
    /// collapses into `number`; unknown types fall back to `string`.
    pub fn from_schema_type(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "number" | "integer" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Typed description of a tool. The `safe` flag marks a pure read-only
/// operation that never needs per-call approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub safe: bool,
}

impl ToolDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// A structured call extracted from model output by the tag parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: serde_json::Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success {
        output: String,
        #[serde(default)]
        metadata: serde_json::Map<String, Value>,
    },
    Failure {
        error: String,
    },
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        ToolOutcome::Success {
            output: output.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn success_with(
        output: impl Into<String>,
        metadata: serde_json::Map<String, Value>,
    ) -> Self {
        ToolOutcome::Success {
            output: output.into(),
            metadata,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolOutcome::Failure { error } => Some(error),
            ToolOutcome::Success { .. } => None,
        }
    }
}

/// Safety mode governing tool approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyMode {
    /// Nothing executes; every call short-circuits with a no-effect result.
    DryRun,
    /// Unsafe tools need explicit per-call approval.
    Review,
    /// Everything runs without prompting.
    AutoApply,
}

impl SafetyMode {
    pub fn from_str_lossy(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dry-run" | "dryrun" | "dry_run" => SafetyMode::DryRun,
            "auto-apply" | "autoapply" | "auto_apply" | "auto" => SafetyMode::AutoApply,
            _ => SafetyMode::Review,
        }
    }

    /// Read the mode from `CODELOOM_MODE`, defaulting to `review`.
    pub fn from_env() -> Self {
        std::env::var("CODELOOM_MODE")
            .map(|raw| Self::from_str_lossy(&raw))
            .unwrap_or(SafetyMode::Review)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyMode::DryRun => "dry-run",
            SafetyMode::Review => "review",
            SafetyMode::AutoApply => "auto-apply",
        }
    }
}

impl std::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ambient context threaded through the executor and tool handlers.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workspace: PathBuf,
    pub mode: SafetyMode,
    pub verbose: bool,
}

impl ExecutionContext {
    pub fn new(workspace: &Path, mode: SafetyMode) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            mode,
            verbose: false,
        }
    }
}
