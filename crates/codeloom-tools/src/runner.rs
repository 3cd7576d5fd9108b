//! Child-process execution under the safety policy.
//!
//! Commands run with the workspace as working directory and `MODE=<mode>` in
//! the environment. A shell is interposed only on Windows (script-file
//! extensions need one there); elsewhere the argv is executed directly, which
//! is why the argument filter in the policy runs even though no shell is
//! present. Output is drained on dedicated threads into capped buffers.

use crate::{IoKind, ToolError};
use codeloom_core::SafetyMode;
use codeloom_policy::SafetyPolicy;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Per-stream capture cap.
pub const OUTPUT_CAP_BYTES: usize = 10 * 1024 * 1024;
/// On overflow, the trailing portion kept.
pub const OUTPUT_RETAIN_BYTES: usize = 5 * 1024 * 1024;

/// Resolved result of one child run. Timeouts resolve (`timed_out = true`);
/// only spawn failures reject.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trailing slice of combined stderr/stdout for failure messages.
    pub fn tail(&self, max_chars: usize) -> String {
        let combined = format!("{}{}", self.stderr, self.stdout);
        let chars: Vec<char> = combined.chars().collect();
        if chars.len() <= max_chars {
            combined
        } else {
            chars[chars.len() - max_chars..].iter().collect()
        }
    }
}

pub struct CommandRunner {
    workspace: PathBuf,
    policy: SafetyPolicy,
}

impl CommandRunner {
    pub fn new(workspace: &Path, policy: SafetyPolicy) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            policy,
        }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Run `command` with `args` under the policy. The policy check happens
    /// before any process is spawned.
    pub fn run(
        &self,
        command: &str,
        args: &[String],
        cwd: Option<&Path>,
        mode: SafetyMode,
    ) -> Result<CommandOutput, ToolError> {
        self.policy.check_command(command, args)?;
        let dir = cwd.unwrap_or(&self.workspace);
        let child = spawn(command, args, dir, mode)
            .map_err(|err| ToolError::io(&err, command))?;
        self.capture(child, command, args, self.policy.max_command_duration_ms)
    }

    /// Run a user-authored shell line (e.g. the workspace `testCommand`).
    /// The line comes from trusted workspace configuration, not from the
    /// model, so the injection filter does not apply; the timeout still does.
    pub fn run_shell_line(
        &self,
        line: &str,
        timeout_ms: u64,
        mode: SafetyMode,
    ) -> Result<CommandOutput, ToolError> {
        let child = spawn_shell(line, &self.workspace, mode)
            .map_err(|err| ToolError::io(&err, line))?;
        self.capture(child, line, &[], timeout_ms)
    }

    fn capture(
        &self,
        mut child: Child,
        command: &str,
        args: &[String],
        timeout_ms: u64,
    ) -> Result<CommandOutput, ToolError> {
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_thread = stdout_pipe.map(|pipe| thread::spawn(move || drain(pipe)));
        let stderr_thread = stderr_pipe.map(|pipe| thread::spawn(move || drain(pipe)));

        let timeout = Duration::from_millis(timeout_ms);
        let (exit_code, timed_out) = match child
            .wait_timeout(timeout)
            .map_err(|err| ToolError::io(&err, command))?
        {
            Some(status) => (status.code(), false),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                (None, true)
            }
        };

        let stdout = stdout_thread
            .and_then(|t| t.join().ok())
            .unwrap_or_default();
        let stderr = stderr_thread
            .and_then(|t| t.join().ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            command: command.to_string(),
            args: args.to_vec(),
            exit_code,
            timed_out,
            stdout,
            stderr,
        })
    }
}

/// Append-only buffer that keeps at most [`OUTPUT_CAP_BYTES`], retaining the
/// trailing [`OUTPUT_RETAIN_BYTES`] on overflow.
struct CappedBuffer {
    data: Vec<u8>,
}

impl CappedBuffer {
    fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        if self.data.len() > OUTPUT_CAP_BYTES {
            let cut = self.data.len() - OUTPUT_RETAIN_BYTES;
            self.data.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }
}

fn drain(mut pipe: impl Read) -> String {
    let mut buffer = CappedBuffer::new();
    let mut chunk = [0_u8; 8192];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.push(&chunk[..n]),
        }
    }
    buffer.into_string()
}

#[cfg(target_os = "windows")]
fn spawn(
    command: &str,
    args: &[String],
    cwd: &Path,
    mode: SafetyMode,
) -> std::io::Result<Child> {
    // Script-file extensions only resolve through the shell here.
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(line);
    configure(&mut shell, cwd, mode);
    shell.spawn()
}

#[cfg(not(target_os = "windows"))]
fn spawn(
    command: &str,
    args: &[String],
    cwd: &Path,
    mode: SafetyMode,
) -> std::io::Result<Child> {
    let mut direct = Command::new(command);
    direct.args(args);
    configure(&mut direct, cwd, mode);
    direct.spawn()
}

#[cfg(target_os = "windows")]
fn spawn_shell(line: &str, cwd: &Path, mode: SafetyMode) -> std::io::Result<Child> {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(line);
    configure(&mut shell, cwd, mode);
    shell.spawn()
}

#[cfg(not(target_os = "windows"))]
fn spawn_shell(line: &str, cwd: &Path, mode: SafetyMode) -> std::io::Result<Child> {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(line);
    configure(&mut shell, cwd, mode);
    shell.spawn()
}

fn configure(command: &mut Command, cwd: &Path, mode: SafetyMode) {
    command
        .current_dir(cwd)
        .env("MODE", mode.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloom_policy::PolicyError;

    fn runner() -> (tempfile::TempDir, CommandRunner) {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(dir.path(), SafetyPolicy::default());
        (dir, runner)
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn runs_command_and_captures_stdout() {
        let (_dir, runner) = runner();
        let out = runner
            .run("echo", &["hello".to_string()], None, SafetyMode::AutoApply)
            .expect("run");
        assert_eq!(out.exit_code, Some(0));
        assert!(!out.timed_out);
        assert!(out.stdout.contains("hello"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn mode_is_visible_to_the_child() {
        let (_dir, runner) = runner();
        let out = runner
            .run_shell_line("echo $MODE", 10_000, SafetyMode::DryRun)
            .expect("run");
        assert!(out.stdout.contains("dry-run"));
    }

    #[test]
    fn denied_command_never_spawns() {
        let (_dir, runner) = runner();
        let err = runner
            .run("rm", &["-rf".to_string(), "/".to_string()], None, SafetyMode::AutoApply)
            .expect_err("policy");
        assert!(matches!(
            err,
            ToolError::Policy(PolicyError::CommandDenied(_))
        ));
    }

    #[test]
    fn injected_argument_never_spawns() {
        let (_dir, runner) = runner();
        let err = runner
            .run("ls", &["; rm -rf /".to_string()], None, SafetyMode::AutoApply)
            .expect_err("policy");
        assert!(matches!(
            err,
            ToolError::Policy(PolicyError::CommandInjection(_))
        ));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn timeout_resolves_with_timed_out_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let policy = SafetyPolicy {
            max_command_duration_ms: 200,
            ..SafetyPolicy::default()
        };
        let runner = CommandRunner::new(dir.path(), policy);
        let out = runner
            .run("sleep", &["5".to_string()], None, SafetyMode::AutoApply)
            .expect("resolve, not reject");
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
    }

    #[test]
    fn capped_buffer_retains_tail() {
        let mut buffer = CappedBuffer::new();
        // Fill past the cap with a recognizable tail.
        let filler = vec![b'a'; OUTPUT_CAP_BYTES];
        buffer.push(&filler);
        buffer.push(b"tail-marker");
        let s = buffer.into_string();
        assert!(s.len() <= OUTPUT_RETAIN_BYTES + 16);
        assert!(s.ends_with("tail-marker"));
    }

    #[test]
    fn tail_takes_trailing_characters() {
        let out = CommandOutput {
            command: "x".to_string(),
            args: vec![],
            exit_code: Some(1),
            timed_out: false,
            stdout: "abcdef".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.tail(3), "def");
    }
}
