//! The LLM transport: a chat-completions-style HTTP client plus an offline
//! fallback. The transport owns one normalization duty: native `tool_calls`
//! in responses are rewritten into `<action>` tag form before the text
//! reaches the caller, so the parser only ever sees one format.

use anyhow::{Result, anyhow};
use codeloom_core::config::{UserConfig, debug_log_path};
use codeloom_core::{Message, Role, ToolCall, tags};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const API_KEY_ENV: &str = "CODELOOM_API_KEY";
pub const DEBUG_ENV: &str = "CODELOOM_DEBUG";

/// Chat transport seam. Streaming hands chunks to the callback and returns
/// the full captured response (including normalized tool-call blocks).
pub trait LlmClient: Send + Sync {
    fn chat(&self, messages: &[Message], tools: Option<&[Value]>) -> Result<String>;
    fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String>;
    fn model_name(&self) -> String;
    fn list_models(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_seconds: 120,
            max_retries: 3,
            retry_base_ms: 400,
            temperature: 0.2,
        }
    }
}

impl LlmSettings {
    /// Persisted user config first, then the environment override.
    pub fn from_user_config(config: &UserConfig) -> Self {
        let mut settings = Self::default();
        if let Some(model) = &config.model {
            settings.model = model.clone();
        }
        if let Some(base_url) = &config.base_url {
            settings.base_url = base_url.trim_end_matches('/').to_string();
        }
        settings.api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| config.api_key.clone());
        settings
    }
}

pub struct HttpLlmClient {
    settings: LlmSettings,
    client: Client,
}

impl HttpLlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { settings, client })
    }

    fn api_key(&self) -> Result<&str> {
        self.settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key: set {API_KEY_ENV} or config.json"))
    }

    fn payload(&self, messages: &[Message], tools: Option<&[Value]>, stream: bool) -> Value {
        let mapped: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": role_name(m.role), "content": m.content }))
            .collect();
        let mut payload = json!({
            "model": self.settings.model,
            "messages": mapped,
            "temperature": self.settings.temperature,
            "stream": stream,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                payload["tools"] = Value::Array(tools.to_vec());
            }
        }
        payload
    }

    fn post_with_retries(&self, payload: &Value) -> Result<String> {
        let key = self.api_key()?;
        let url = format!("{}/chat/completions", self.settings.base_url);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=self.settings.max_retries {
            match self.client.post(&url).bearer_auth(key).json(payload).send() {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text()?;
                    if status.is_success() {
                        debug_log(&body);
                        return Ok(body);
                    }
                    let retriable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    last_err = Some(anyhow!("chat API error {status}: {body}"));
                    if !retriable || attempt == self.settings.max_retries {
                        break;
                    }
                }
                Err(err) => {
                    last_err = Some(anyhow!("chat request failed: {err}"));
                    if attempt == self.settings.max_retries {
                        break;
                    }
                }
            }
            let backoff = self
                .settings
                .retry_base_ms
                .saturating_mul(2_u64.pow(attempt as u32));
            std::thread::sleep(Duration::from_millis(backoff));
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat request failed")))
    }
}

impl LlmClient for HttpLlmClient {
    fn chat(&self, messages: &[Message], tools: Option<&[Value]>) -> Result<String> {
        let body = self.post_with_retries(&self.payload(messages, tools, false))?;
        let value: Value = serde_json::from_str(&body)?;
        let message = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .ok_or_else(|| anyhow!("unexpected payload: missing choices[0].message"))?;
        let text = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let calls = native_tool_calls(message.get("tool_calls"));
        Ok(combine_text_and_calls(text, &calls))
    }

    fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let key = self.api_key()?;
        let url = format!("{}/chat/completions", self.settings.base_url);
        let payload = self.payload(messages, tools, true);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&payload)
            .send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(anyhow!("chat API error {status}: {body}"));
        }

        let mut captured = String::new();
        // Streamed native tool calls arrive as indexed fragments.
        let mut pending_calls: Vec<(String, String)> = Vec::new();
        let mut reader = BufReader::new(resp);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    // Interrupted stream: hand back what arrived so the
                    // partial response can still be parsed.
                    if captured.is_empty() && pending_calls.is_empty() {
                        return Err(anyhow!("stream interrupted: {err}"));
                    }
                    break;
                }
            }
            let trimmed = line.trim();
            let Some(data) = trimmed.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                break;
            }
            let Ok(value) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            debug_log(data);
            let Some(delta) = value
                .get("choices")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|c| c.get("delta"))
            else {
                continue;
            };
            if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                captured.push_str(content);
                on_chunk(content);
            }
            if let Some(fragments) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                accumulate_call_fragments(&mut pending_calls, fragments);
            }
        }

        let calls: Vec<ToolCall> = pending_calls
            .iter()
            .filter_map(|(name, arguments)| decoded_call(name, arguments))
            .collect();
        Ok(combine_text_and_calls(captured, &calls))
    }

    fn model_name(&self) -> String {
        self.settings.model.clone()
    }

    fn list_models(&self) -> Result<Vec<String>> {
        let key = self.api_key()?;
        let url = format!("{}/models", self.settings.base_url);
        let value: Value = self
            .client
            .get(&url)
            .bearer_auth(key)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(value
            .get("data")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(|v| v.as_str()))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn role_name(role: Role) -> &'static str {
    // Tool results travel as user-role blocks in this system's transcript;
    // a literal tool role would require per-call ids the transcript does
    // not carry.
    match role {
        Role::Tool => "user",
        other => other.as_str(),
    }
}

/// Decode a response-side `tool_calls` array into internal calls.
fn native_tool_calls(raw: Option<&Value>) -> Vec<ToolCall> {
    let Some(entries) = raw.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let function = entry.get("function")?;
            let name = function.get("name")?.as_str()?;
            let arguments = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            decoded_call(name, arguments)
        })
        .collect()
}

fn decoded_call(name: &str, arguments: &str) -> Option<ToolCall> {
    let mut call = ToolCall::new(name);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(arguments) {
        call.args = map;
    }
    Some(call)
}

fn accumulate_call_fragments(pending: &mut Vec<(String, String)>, fragments: &[Value]) {
    for fragment in fragments {
        let index = fragment
            .get("index")
            .and_then(|v| v.as_u64())
            .unwrap_or(pending.len() as u64) as usize;
        while pending.len() <= index {
            pending.push((String::new(), String::new()));
        }
        if let Some(function) = fragment.get("function") {
            if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                pending[index].0.push_str(name);
            }
            if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                pending[index].1.push_str(args);
            }
        }
    }
}

/// Append normalized `<action>` blocks for native calls to the text body.
fn combine_text_and_calls(text: String, calls: &[ToolCall]) -> String {
    if calls.is_empty() {
        return text;
    }
    let block = tags::render_action(calls);
    if text.is_empty() {
        block
    } else {
        format!("{text}\n{block}")
    }
}

fn debug_log(payload: &str) {
    if std::env::var(DEBUG_ENV).is_err() {
        return;
    }
    let Some(path) = debug_log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{payload}"));
}

/// Deterministic keyless fallback: echoes the last user message. Useful for
/// smoke-testing the loop plumbing without network access.
#[derive(Debug, Default, Clone)]
pub struct OfflineClient;

impl LlmClient for OfflineClient {
    fn chat(&self, messages: &[Message], _tools: Option<&[Value]>) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(format!("(offline) {last_user}"))
    }

    fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let full = self.chat(messages, tools)?;
        on_chunk(&full);
        Ok(full)
    }

    fn model_name(&self) -> String {
        "offline".to_string()
    }

    fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["offline".to_string()])
    }
}
