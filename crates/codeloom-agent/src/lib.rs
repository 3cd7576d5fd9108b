//! The agent orchestrator: drives the LLM ↔ tool loop for one user turn.
//!
//! Each iteration asks the model for a (streamed) response, extracts tool
//! calls, executes them strictly in order, and feeds the results back as a
//! single user-role message. The loop ends when the model stops calling
//! tools or a stop condition fires.

pub mod analysis;
pub mod schema;
pub mod stream;

use anyhow::Result;
use codeloom_core::config::WorkspaceConfig;
use codeloom_core::{Message, SafetyMode, ToolCall, ToolOutcome, tags, token};
use codeloom_llm::LlmClient;
use codeloom_observe::Observer;
use codeloom_policy::SafetyPolicy;
use codeloom_tools::{BackupStore, CommandRunner, Execution, ToolExecutor, ToolRegistry};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stream::ActionTagFilter;

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const MAX_ITERATIONS_WARN_THRESHOLD: usize = 1000;
/// Context-window share that triggers auto-compression.
pub const COMPRESSION_THRESHOLD: f64 = 0.80;
/// Messages kept verbatim at the tail when compressing.
pub const COMPRESSION_KEEP_RECENT: usize = 6;
pub const CONSECUTIVE_FAILURE_LIMIT: usize = 3;
pub const TEST_COMMAND_TIMEOUT_MS: u64 = 60_000;

/// Callback receiving display-safe stream chunks (action blocks withheld).
pub type StreamCallback = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub auto_compress: bool,
    pub context_window_tokens: u64,
    pub stream: bool,
    pub test_command_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            auto_compress: true,
            context_window_tokens: 128_000,
            stream: true,
            test_command_timeout_ms: TEST_COMMAND_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model answered without tool calls.
    Stop,
    /// Dry-run mode ends the turn after the first iteration.
    DryRun,
    MaxIterations,
    /// The named tool failed three consecutive times.
    ConsecutiveFailures(String),
    /// The user answered `q` at an approval prompt.
    UserQuit,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub final_response: String,
    pub finish_reason: FinishReason,
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    backups: Arc<BackupStore>,
    workspace_config: WorkspaceConfig,
    test_runner: CommandRunner,
    config: OrchestratorConfig,
    transcript: Vec<Message>,
    stream_cb: Option<StreamCallback>,
    observer: Option<Arc<Observer>>,
    cancel: Arc<AtomicBool>,
    tools_injected: bool,
    warned_iterations: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        executor: ToolExecutor,
        backups: Arc<BackupStore>,
        workspace_config: WorkspaceConfig,
        workspace: &Path,
        system_prompt: &str,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            executor,
            backups,
            workspace_config,
            test_runner: CommandRunner::new(workspace, SafetyPolicy::default()),
            config,
            transcript: vec![Message::system(system_prompt)],
            stream_cb: None,
            observer: None,
            cancel: Arc::new(AtomicBool::new(false)),
            tools_injected: false,
            warned_iterations: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_stream_callback(&mut self, cb: StreamCallback) {
        self.stream_cb = Some(cb);
    }

    /// Flag checked between iterations; a higher layer sets it on Ctrl-C.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn definitions(&self) -> Vec<codeloom_core::ToolDefinition> {
        self.registry.definitions()
    }

    pub fn mode(&self) -> SafetyMode {
        self.executor.context().mode
    }

    pub fn set_mode(&mut self, mode: SafetyMode) {
        self.executor.set_mode(mode);
    }

    /// Run one turn: the user message plus however many iterations it takes
    /// to reach a response with no tool calls or a stop condition.
    pub fn run_turn(&mut self, user_message: &str) -> Result<TurnOutcome> {
        if self.config.max_iterations > MAX_ITERATIONS_WARN_THRESHOLD && !self.warned_iterations {
            self.warned_iterations = true;
            self.warn(&format!(
                "max_iterations={} is unusually high",
                self.config.max_iterations
            ));
        }

        self.inject_tool_definitions();
        self.transcript.push(Message::user(user_message));

        let definitions = self.registry.definitions();
        let schemas = schema::function_schemas(&definitions);

        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut failed_tool: Option<String> = None;
        let mut failure_streak = 0usize;
        let mut iterations = 0usize;

        while iterations < self.config.max_iterations {
            iterations += 1;

            if self.cancel.load(Ordering::SeqCst) {
                return Ok(TurnOutcome {
                    final_response: String::new(),
                    finish_reason: FinishReason::Cancelled,
                    iterations,
                    tool_calls,
                });
            }

            self.backups.evict_expired();

            if self.config.auto_compress {
                let estimate = token::estimate_transcript_tokens(&self.transcript);
                let threshold =
                    (self.config.context_window_tokens as f64 * COMPRESSION_THRESHOLD) as u64;
                if estimate >= threshold {
                    if let Some(hidden) = compress_transcript(&mut self.transcript) {
                        self.info(&format!("auto-compressed transcript: {hidden} messages"));
                    }
                }
            }

            let response = self.request_response(&schemas)?;
            let parsed = tags::parse_response(&response, &definitions);
            for warning in &parsed.warnings {
                self.warn(warning);
            }
            self.transcript.push(Message::assistant(response));

            if !parsed.has_calls() {
                return Ok(TurnOutcome {
                    final_response: parsed.text,
                    finish_reason: FinishReason::Stop,
                    iterations,
                    tool_calls,
                });
            }

            let mut blocks: Vec<String> = Vec::new();
            let mut any_write_succeeded = false;
            let mut stop: Option<FinishReason> = None;

            for call in &parsed.calls {
                match self.executor.execute(call) {
                    Execution::QuitRequested => {
                        stop = Some(FinishReason::UserQuit);
                        break;
                    }
                    Execution::Completed(outcome) => {
                        let success = outcome.is_success();
                        if success {
                            failure_streak = 0;
                            failed_tool = None;
                            if is_file_writing_tool(&call.name) {
                                any_write_succeeded = true;
                            }
                        } else if failed_tool.as_deref() == Some(call.name.as_str()) {
                            failure_streak += 1;
                        } else {
                            failed_tool = Some(call.name.clone());
                            failure_streak = 1;
                        }
                        tool_calls.push(ToolCallRecord {
                            tool: call.name.clone(),
                            success,
                        });
                        blocks.push(render_result_block(call, &outcome));
                        if !success && failure_streak >= CONSECUTIVE_FAILURE_LIMIT {
                            stop = Some(FinishReason::ConsecutiveFailures(call.name.clone()));
                            break;
                        }
                    }
                }
            }

            let mode = self.executor.context().mode;
            if any_write_succeeded && mode != SafetyMode::DryRun {
                if let Some(test_command) = self.workspace_config.test_command.clone() {
                    blocks.push(self.run_test_command(&test_command));
                }
            }

            if !blocks.is_empty() {
                let mut results = String::from("Tool results:\n\n");
                results.push_str(&blocks.join("\n\n"));
                results.push_str(
                    "\n\nPlease review these tool results and explain what they mean for the task.",
                );
                self.transcript.push(Message::user(results));
            }

            if let Some(reason) = stop {
                let final_response = match &reason {
                    FinishReason::ConsecutiveFailures(tool) => format!(
                        "tool '{tool}' failed {CONSECUTIVE_FAILURE_LIMIT} times in a row; \
                         stopping this turn. Suggestions: re-check the tool arguments, read \
                         the error output above, or try a different tool."
                    ),
                    _ => parsed.text,
                };
                return Ok(TurnOutcome {
                    final_response,
                    finish_reason: reason,
                    iterations,
                    tool_calls,
                });
            }

            if mode == SafetyMode::DryRun {
                return Ok(TurnOutcome {
                    final_response: parsed.text,
                    finish_reason: FinishReason::DryRun,
                    iterations,
                    tool_calls,
                });
            }
        }

        self.warn("max iterations reached; terminating turn");
        Ok(TurnOutcome {
            final_response: "Maximum iterations reached for this turn.".to_string(),
            finish_reason: FinishReason::MaxIterations,
            iterations,
            tool_calls,
        })
    }

    /// One LLM request, streamed when a callback is wired. Display chunks go
    /// through the action-tag filter; the captured text keeps everything.
    fn request_response(&mut self, schemas: &[Value]) -> Result<String> {
        if !self.config.stream || self.stream_cb.is_none() {
            return self.llm.chat(&self.transcript, Some(schemas));
        }
        let mut cb = self.stream_cb.take().expect("stream callback present");
        let mut filter = ActionTagFilter::new();
        let result = {
            let mut on_chunk = |chunk: &str| {
                let visible = filter.feed(chunk);
                if !visible.is_empty() {
                    cb(&visible);
                }
            };
            self.llm
                .chat_stream(&self.transcript, Some(schemas), &mut on_chunk)
        };
        let tail = filter.finish();
        if !tail.is_empty() {
            cb(&tail);
        }
        self.stream_cb = Some(cb);
        result
    }

    /// Augment the system message once per session with the tool listing,
    /// the tag-format instructions, and any workspace notes.
    fn inject_tool_definitions(&mut self) {
        if self.tools_injected {
            return;
        }
        self.tools_injected = true;
        let definitions = self.registry.definitions();
        let mut addition = schema::render_tool_instructions(&definitions);
        if !self.workspace_config.include_paths.is_empty() {
            addition.push_str(&format!(
                "\nWhen searching or listing, prefer these paths: {}\n",
                self.workspace_config.include_paths.join(", ")
            ));
        }
        if !self.workspace_config.exclude_paths.is_empty() {
            addition.push_str(&format!(
                "Avoid these paths unless asked: {}\n",
                self.workspace_config.exclude_paths.join(", ")
            ));
        }
        if let Some(notes) = &self.workspace_config.notes {
            addition.push_str(&format!("\n## Workspace notes\n{notes}\n"));
        }
        if let Some(first) = self.transcript.first_mut() {
            first.content.push_str(&addition);
        }
    }

    fn run_test_command(&self, command: &str) -> String {
        let mode = self.executor.context().mode;
        match self
            .test_runner
            .run_shell_line(command, self.config.test_command_timeout_ms, mode)
        {
            Ok(output) => {
                let mut block = format!("Test command: {command}\n");
                if output.timed_out {
                    block.push_str("Result: timed out\n");
                } else {
                    block.push_str(&format!(
                        "Result: exit code {}\n",
                        output.exit_code.unwrap_or(-1)
                    ));
                }
                let tail = output.tail(2000);
                if !tail.trim().is_empty() {
                    block.push_str(&format!("Output:\n{tail}"));
                }
                block
            }
            Err(err) => format!("Test command: {command}\nResult: failed to run ({err})"),
        }
    }

    fn info(&self, msg: &str) {
        if let Some(observer) = &self.observer {
            observer.info(msg);
        }
    }

    fn warn(&self, msg: &str) {
        if let Some(observer) = &self.observer {
            observer.warn(msg);
        }
    }
}

/// Rewrite the transcript to `[system, "[history compressed: N messages]",
/// …last 6]`, preserving the first system message verbatim. Returns how many
/// messages were hidden, or `None` when the transcript is already compact
/// (re-running on a compressed transcript is a no-op).
pub fn compress_transcript(transcript: &mut Vec<Message>) -> Option<usize> {
    if transcript.len() <= COMPRESSION_KEEP_RECENT + 2 {
        return None;
    }
    let system = transcript[0].clone();
    let recent: Vec<Message> = transcript[transcript.len() - COMPRESSION_KEEP_RECENT..].to_vec();
    let hidden = transcript.len() - 1 - COMPRESSION_KEEP_RECENT;
    let marker = Message::system(format!("[history compressed: {hidden} messages]"));
    transcript.clear();
    transcript.push(system);
    transcript.push(marker);
    transcript.extend(recent);
    Some(hidden)
}

fn is_file_writing_tool(name: &str) -> bool {
    matches!(name, "write_file" | "apply_diff")
}

fn render_result_block(call: &ToolCall, outcome: &ToolOutcome) -> String {
    match outcome {
        ToolOutcome::Success { output, metadata } => {
            let mut block = format!("Tool: {}\nStatus: success\n", call.name);
            if !metadata.is_empty() {
                block.push_str(&format!(
                    "Metadata: {}\n",
                    serde_json::to_string(metadata).unwrap_or_default()
                ));
            }
            block.push_str(&format!("Output:\n{output}"));
            block
        }
        ToolOutcome::Failure { error } => {
            format!("Tool: {}\nStatus: failure\nError: {error}", call.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloom_core::{ExecutionContext, Role};
    use codeloom_testkit::{ScriptedLlm, TempWorkspace};
    use codeloom_tools::{ToolContext, builtin_tools};

    fn orchestrator_for(
        ws: &TempWorkspace,
        mode: SafetyMode,
        responses: Vec<&str>,
        workspace_config: WorkspaceConfig,
    ) -> (Orchestrator, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new(responses));
        let ctx = ExecutionContext::new(ws.path(), mode);
        let backups = Arc::new(BackupStore::new());
        let tool_context = Arc::new(ToolContext {
            ctx: ctx.clone(),
            runner: CommandRunner::new(ws.path(), SafetyPolicy::default()),
            backups: backups.clone(),
        });
        let mut registry = ToolRegistry::new();
        for tool in builtin_tools(&tool_context) {
            registry.register(tool).expect("register builtin");
        }
        let registry = Arc::new(registry);
        let executor = ToolExecutor::new(registry.clone(), ctx);
        let orchestrator = Orchestrator::new(
            llm.clone(),
            registry,
            executor,
            backups,
            workspace_config,
            ws.path(),
            "You are a coding agent.",
            OrchestratorConfig::default(),
        );
        (orchestrator, llm)
    }

    fn action(body: &str) -> String {
        format!("<action>{body}</action>")
    }

    #[test]
    fn single_file_read_turn() {
        let ws = TempWorkspace::new();
        ws.write("hello.txt", "hi");
        let read_call = action(
            "<invoke tool=\"read_file\"><param name=\"path\">hello.txt</param></invoke>",
        );
        let (mut orchestrator, llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&read_call, "The file contains a greeting."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("what is in hello.txt?").expect("turn");
        assert_eq!(outcome.final_response, "The file contains a greeting.");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].success);
        assert_eq!(llm.remaining(), 0);

        // The results block reached the model as a user-role message.
        let results = orchestrator
            .transcript()
            .iter()
            .find(|m| m.role == Role::User && m.content.starts_with("Tool results:"))
            .expect("results message");
        assert!(results.content.contains("Status: success"));
        assert!(results.content.contains("hi"));
        assert!(results.content.contains("explain"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn write_then_test_command_turn() {
        let ws = TempWorkspace::new();
        let write_call = action(
            "<invoke tool=\"write_file\"><param name=\"path\">ok.txt</param><param name=\"content\">ok</param></invoke>",
        );
        let config = WorkspaceConfig {
            test_command: Some("exit 0".to_string()),
            ..WorkspaceConfig::default()
        };
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&write_call, "Wrote the file and the tests passed."],
            config,
        );
        let outcome = orchestrator.run_turn("create ok.txt").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(ws.read("ok.txt"), "ok");
        let results = orchestrator
            .transcript()
            .iter()
            .find(|m| m.content.contains("Test command: exit 0"))
            .expect("test command block");
        assert!(results.content.contains("exit code 0"));
    }

    #[test]
    fn patch_creation_turn() {
        let ws = TempWorkspace::new();
        let diff = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n";
        let patch_call = format!(
            "<action><invoke tool=\"apply_diff\"><param name=\"path\">new.txt</param><param name=\"diff\">{diff}</param></invoke></action>",
        );
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&patch_call, "Created new.txt."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("create new.txt from a patch").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(ws.read("new.txt"), "hello\n");
        let results = orchestrator
            .transcript()
            .iter()
            .find(|m| m.content.contains("fileCreated"))
            .expect("metadata in results");
        assert!(results.content.contains("\"fileCreated\":true"));
    }

    #[test]
    fn policy_rejection_turn() {
        let ws = TempWorkspace::new();
        let rm_call = action(
            "<invoke tool=\"run_command\"><param name=\"command\">rm</param><param name=\"args\">[\"-rf\", \"/\"]</param></invoke>",
        );
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&rm_call, "That command is not allowed."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("delete everything").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(!outcome.tool_calls[0].success);
        let results = orchestrator
            .transcript()
            .iter()
            .find(|m| m.content.contains("blocked by policy"))
            .expect("policy rejection surfaced");
        assert!(results.content.contains("Status: failure"));
    }

    #[test]
    fn injection_attempt_turn() {
        let ws = TempWorkspace::new();
        let ls_call = action(
            "<invoke tool=\"run_command\"><param name=\"command\">ls</param><param name=\"args\">[\"; rm -rf /\"]</param></invoke>",
        );
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&ls_call, "I will not run that."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("list files").expect("turn");
        assert!(!outcome.tool_calls[0].success);
        assert!(
            orchestrator
                .transcript()
                .iter()
                .any(|m| m.content.contains("metacharacter"))
        );
    }

    #[test]
    fn three_consecutive_failures_terminate_the_turn() {
        let ws = TempWorkspace::new();
        let read_missing = action(
            "<invoke tool=\"read_file\"><param name=\"path\">missing.txt</param></invoke>",
        );
        let (mut orchestrator, llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&read_missing, &read_missing, &read_missing],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("read missing.txt").expect("turn");
        assert_eq!(
            outcome.finish_reason,
            FinishReason::ConsecutiveFailures("read_file".to_string())
        );
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.tool_calls.len(), 3);
        assert!(outcome.final_response.contains("read_file"));
        assert!(outcome.final_response.contains("Suggestions"));
        // All three scripted responses were consumed; no fourth call issued.
        assert_eq!(llm.remaining(), 0);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let ws = TempWorkspace::new();
        ws.write("present.txt", "here");
        let read_missing = action(
            "<invoke tool=\"read_file\"><param name=\"path\">missing.txt</param></invoke>",
        );
        let read_present = action(
            "<invoke tool=\"read_file\"><param name=\"path\">present.txt</param></invoke>",
        );
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&read_missing, &read_missing, &read_present, "All done."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("poke around").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(outcome.iterations, 4);
    }

    #[test]
    fn dry_run_terminates_after_first_iteration_without_mutation() {
        let ws = TempWorkspace::new();
        let write_call = action(
            "<invoke tool=\"write_file\"><param name=\"path\">never.txt</param><param name=\"content\">x</param></invoke>",
        );
        let (mut orchestrator, llm) = orchestrator_for(
            &ws,
            SafetyMode::DryRun,
            vec![&write_call, "unused"],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("write a file").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::DryRun);
        assert_eq!(outcome.iterations, 1);
        assert!(!ws.exists("never.txt"));
        // The second scripted response was never requested.
        assert_eq!(llm.remaining(), 1);
    }

    #[test]
    fn transcript_shape_is_preserved() {
        let ws = TempWorkspace::new();
        ws.write("a.txt", "a");
        let read_call =
            action("<invoke tool=\"read_file\"><param name=\"path\">a.txt</param></invoke>");
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&read_call, "done"],
            WorkspaceConfig::default(),
        );
        orchestrator.run_turn("read it").expect("turn");
        let transcript = orchestrator.transcript();
        // system, user, assistant(call), user(results), assistant(final)
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript[0].role, Role::System);
        assert!(transcript[0].content.starts_with("You are a coding agent."));
    }

    #[test]
    fn stream_callback_never_sees_action_blocks() {
        use std::sync::Mutex;
        let ws = TempWorkspace::new();
        ws.write("a.txt", "a");
        let read_call = format!(
            "Reading now. {}",
            action("<invoke tool=\"read_file\"><param name=\"path\">a.txt</param></invoke>")
        );
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&read_call, "done"],
            WorkspaceConfig::default(),
        );
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        orchestrator.set_stream_callback(Box::new(move |chunk| {
            sink.lock().expect("sink").push_str(chunk);
        }));
        orchestrator.run_turn("read it").expect("turn");
        let visible = seen.lock().expect("seen").clone();
        assert!(visible.contains("Reading now."));
        assert!(!visible.contains("<action>"));
        assert!(!visible.contains("read_file"));
        assert!(visible.contains("done"));
    }

    #[test]
    fn compression_keeps_system_head_and_recent_tail() {
        let mut transcript = vec![Message::system("SYSTEM")];
        for i in 0..20 {
            transcript.push(Message::user(format!("m{i}")));
        }
        let hidden = compress_transcript(&mut transcript).expect("compressed");
        assert_eq!(hidden, 14);
        assert_eq!(transcript.len(), COMPRESSION_KEEP_RECENT + 2);
        assert_eq!(transcript[0].content, "SYSTEM");
        assert!(transcript[1].content.contains("history compressed: 14 messages"));
        assert_eq!(transcript.last().expect("tail").content, "m19");

        // Fixed point: compressing again is a no-op.
        let before = transcript.clone();
        assert!(compress_transcript(&mut transcript).is_none());
        assert_eq!(transcript.len(), before.len());
    }

    #[test]
    fn auto_compression_triggers_on_small_context_window() {
        let ws = TempWorkspace::new();
        ws.write("a.txt", "a");
        let read_call =
            action("<invoke tool=\"read_file\"><param name=\"path\">a.txt</param></invoke>");
        let responses = vec![
            read_call.as_str(),
            read_call.as_str(),
            read_call.as_str(),
            read_call.as_str(),
            "done",
        ];
        let (mut orchestrator, _llm) =
            orchestrator_for(&ws, SafetyMode::AutoApply, responses, WorkspaceConfig::default());
        orchestrator.config.context_window_tokens = 50;
        let outcome = orchestrator.run_turn("keep reading").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        let transcript = orchestrator.transcript();
        assert_eq!(transcript[0].role, Role::System);
        assert!(
            transcript
                .iter()
                .any(|m| m.content.contains("history compressed")),
            "expected a compression marker in the transcript"
        );
    }

    #[test]
    fn missing_required_parameter_surfaces_to_model() {
        let ws = TempWorkspace::new();
        let bad_call = action("<invoke tool=\"read_file\"></invoke>");
        let (mut orchestrator, _llm) = orchestrator_for(
            &ws,
            SafetyMode::AutoApply,
            vec![&bad_call, "I forgot the path."],
            WorkspaceConfig::default(),
        );
        let outcome = orchestrator.run_turn("read something").expect("turn");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert!(
            orchestrator
                .transcript()
                .iter()
                .any(|m| m.content.contains("missing required parameter"))
        );
    }
}
