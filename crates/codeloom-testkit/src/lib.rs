//! Shared test helpers: a scripted LLM client that replays queued responses
//! and a temp-workspace builder.

use anyhow::{Result, anyhow};
use codeloom_core::Message;
use codeloom_llm::LlmClient;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// LLM client that pops one scripted response per call. Panics-by-error when
/// the script runs dry, which is what a test wants.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    pub calls_seen: Mutex<Vec<usize>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(ToString::to_string).collect()),
            calls_seen: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, messages: &[Message]) -> Result<String> {
        self.calls_seen
            .lock()
            .expect("calls seen")
            .push(messages.len());
        self.responses
            .lock()
            .expect("responses")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted LLM ran out of responses"))
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("responses").len()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat(&self, messages: &[Message], _tools: Option<&[Value]>) -> Result<String> {
        self.next(messages)
    }

    fn chat_stream(
        &self,
        messages: &[Message],
        _tools: Option<&[Value]>,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let full = self.next(messages)?;
        // Replay in small chunks so tag suppression across chunk boundaries
        // actually gets exercised.
        let chars: Vec<char> = full.chars().collect();
        for piece in chars.chunks(7) {
            let s: String = piece.iter().collect();
            on_chunk(&s);
        }
        Ok(full)
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }
}

/// A disposable workspace directory seeded with files.
pub struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp workspace"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dirs");
        }
        fs::write(&path, content).expect("seed file");
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.dir.path().join(rel)).expect("read file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
