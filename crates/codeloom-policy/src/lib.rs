pub mod paths;

use codeloom_core::SafetyMode;
use serde::{Deserialize, Serialize};

pub use paths::validate_path;

/// Default wall-clock cap for child commands (5 minutes).
pub const DEFAULT_MAX_COMMAND_DURATION_MS: u64 = 300_000;

/// Shell metacharacters that are never allowed in a command or its arguments,
/// even on platforms where no shell is interposed.
const FORBIDDEN_SHELL_TOKENS: &[&str] = &[";", "`", "$(", "${", "||", "&&", "\r", "\n"];

/// Script/binary extensions stripped during command-name normalization.
const STRIPPED_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat", ".sh", ".ps1"];

/// Commands refused regardless of allow-list: destructive filesystem
/// operations, system control, package managers, privilege changes,
/// network-fetch tools, and process killers.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rm", "rmdir", "del", "rd", "dd", "mkfs", "format", "fdisk", "shred",
    "shutdown", "reboot", "poweroff", "halt",
    "apt", "apt-get", "yum", "dnf", "pacman", "brew", "pip", "pip3", "gem",
    "sudo", "su", "doas", "runas",
    "curl", "wget",
    "kill", "killall", "pkill", "taskkill",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("command '{0}' is blocked by policy")]
    CommandDenied(String),
    #[error("command '{0}' is not on the allow-list")]
    CommandNotAllowed(String),
    #[error("forbidden shell metacharacter in '{0}'")]
    CommandInjection(String),
    #[error("path is empty")]
    EmptyPath,
    #[error("path '{0}' contains forbidden characters")]
    PathCharacters(String),
    #[error("path '{0}' escapes the workspace")]
    PathTraversal(String),
    #[error("path '{0}' resolves outside the workspace")]
    OutsideWorkspace(String),
    #[error("path '{0}' points into a sensitive directory")]
    SensitivePath(String),
}

impl PolicyError {
    /// True for the path-validation family of failures.
    pub fn is_path_error(&self) -> bool {
        matches!(
            self,
            PolicyError::EmptyPath
                | PolicyError::PathCharacters(_)
                | PolicyError::PathTraversal(_)
                | PolicyError::OutsideWorkspace(_)
                | PolicyError::SensitivePath(_)
        )
    }
}

/// The rule set distinguishing permitted from forbidden commands.
///
/// Deny-list takes precedence; a non-empty allow-list is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyPolicy {
    pub mode: SafetyMode,
    /// When non-empty, only these commands may run.
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub max_command_duration_ms: u64,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            mode: SafetyMode::Review,
            allowlist: Vec::new(),
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            max_command_duration_ms: DEFAULT_MAX_COMMAND_DURATION_MS,
        }
    }
}

impl SafetyPolicy {
    pub fn new(mode: SafetyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Check a command and its argument vector against the policy. Runs
    /// before any process is spawned.
    pub fn check_command(&self, command: &str, args: &[String]) -> Result<(), PolicyError> {
        if let Some(token) = first_forbidden_token(command) {
            return Err(PolicyError::CommandInjection(token));
        }
        for arg in args {
            if let Some(token) = first_forbidden_token(arg) {
                return Err(PolicyError::CommandInjection(token));
            }
        }

        let base = command_base_name(command);
        if base.is_empty() {
            return Err(PolicyError::CommandNotAllowed(command.to_string()));
        }

        if self
            .denylist
            .iter()
            .any(|entry| command_base_name(entry) == base || entry == command)
        {
            return Err(PolicyError::CommandDenied(base));
        }

        if !self.allowlist.is_empty()
            && !self
                .allowlist
                .iter()
                .any(|entry| command_base_name(entry) == base || entry == command)
        {
            return Err(PolicyError::CommandNotAllowed(base));
        }

        Ok(())
    }
}

/// Normalize a command string to its comparable base name: first
/// whitespace-separated token, path tail, known extensions stripped,
/// lowercased.
pub fn command_base_name(command: &str) -> String {
    let first = command.split_whitespace().next().unwrap_or_default();
    let tail = first
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(first)
        .to_ascii_lowercase();
    for ext in STRIPPED_EXTENSIONS {
        if let Some(stripped) = tail.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    tail
}

fn first_forbidden_token(value: &str) -> Option<String> {
    FORBIDDEN_SHELL_TOKENS
        .iter()
        .find(|token| value.contains(*token))
        .map(|token| format!("{token:?} in {value:?}"))
}

/// True when `value` contains any forbidden shell metacharacter.
pub fn contains_forbidden_shell_tokens(value: &str) -> bool {
    FORBIDDEN_SHELL_TOKENS
        .iter()
        .any(|token| value.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base_name_strips_path_and_extension() {
        assert_eq!(command_base_name("/usr/bin/RM"), "rm");
        assert_eq!(command_base_name("C:\\Tools\\Format.EXE"), "format");
        assert_eq!(command_base_name("deploy.sh --fast"), "deploy");
        assert_eq!(command_base_name("script.ps1"), "script");
    }

    #[test]
    fn denylist_takes_precedence_over_allowlist() {
        let policy = SafetyPolicy {
            allowlist: vec!["rm".to_string()],
            ..SafetyPolicy::default()
        };
        assert_eq!(
            policy.check_command("rm", &["-rf".to_string(), "/".to_string()]),
            Err(PolicyError::CommandDenied("rm".to_string()))
        );
    }

    #[test]
    fn nonempty_allowlist_is_authoritative() {
        let policy = SafetyPolicy {
            allowlist: vec!["cargo".to_string(), "git".to_string()],
            ..SafetyPolicy::default()
        };
        assert!(policy.check_command("cargo", &["check".to_string()]).is_ok());
        assert!(matches!(
            policy.check_command("make", &[]),
            Err(PolicyError::CommandNotAllowed(_))
        ));
    }

    #[test]
    fn legacy_exact_entries_still_match() {
        let policy = SafetyPolicy {
            allowlist: vec!["/opt/tools/builder".to_string()],
            ..SafetyPolicy::default()
        };
        assert!(policy.check_command("/opt/tools/builder", &[]).is_ok());
    }

    #[test]
    fn empty_allowlist_permits_unlisted_commands() {
        let policy = SafetyPolicy::default();
        assert!(policy.check_command("ls", &["-la".to_string()]).is_ok());
    }

    #[test]
    fn injection_in_argument_is_refused() {
        let policy = SafetyPolicy::default();
        assert!(matches!(
            policy.check_command("ls", &["; rm -rf /".to_string()]),
            Err(PolicyError::CommandInjection(_))
        ));
        assert!(matches!(
            policy.check_command("echo", &["$(whoami)".to_string()]),
            Err(PolicyError::CommandInjection(_))
        ));
        assert!(matches!(
            policy.check_command("echo", &["a && b".to_string()]),
            Err(PolicyError::CommandInjection(_))
        ));
    }

    #[test]
    fn injection_in_command_token_is_refused() {
        let policy = SafetyPolicy::default();
        assert!(matches!(
            policy.check_command("ls;id", &[]),
            Err(PolicyError::CommandInjection(_))
        ));
    }

    proptest! {
        #[test]
        fn any_argument_with_metacharacter_is_refused(
            prefix in "[a-zA-Z0-9 ./-]{0,12}",
            token in prop::sample::select(vec![";", "`", "$(", "${", "||", "&&", "\r", "\n"]),
            suffix in "[a-zA-Z0-9 ./-]{0,12}",
        ) {
            let policy = SafetyPolicy::default();
            let arg = format!("{prefix}{token}{suffix}");
            prop_assert!(matches!(
                policy.check_command("ls", std::slice::from_ref(&arg)),
                Err(PolicyError::CommandInjection(_))
            ));
        }
    }
}
