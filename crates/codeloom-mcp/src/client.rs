//! Blocking MCP client over a child process's stdio.
//!
//! One pump thread per server owns the stdout reader, detects the framing
//! (LSP-style `Content-Length` headers or NDJSON) per message, and dispatches
//! responses to waiting callers through the pending-request table. Requests
//! are written in NDJSON unless the server has already spoken Content-Length.

use crate::McpError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use codeloom_core::config::McpServerConfig;
use codeloom_core::{ParamType, ToolParameter};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, mpsc::Sender<Result<Value, McpError>>>>>;

/// A tool advertised by a remote server, already mapped onto the internal
/// parameter model.
#[derive(Debug, Clone)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

pub struct McpClient {
    server: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    content_length_framing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Spawn the server process and start the stdout pump. Does not send
    /// any protocol message yet; call [`McpClient::initialize`] next.
    pub fn connect(server: &str, config: &McpServerConfig) -> Result<Arc<Self>, McpError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in &config.env {
            command.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|err| McpError::Spawn(format!("{}: {err}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("child stdout unavailable".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let framing = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(stdout, pending.clone(), framing.clone(), closed.clone());

        Ok(Arc::new(Self {
            server: server.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            content_length_framing: framing,
            closed,
            pump: Mutex::new(Some(pump)),
        }))
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// Perform the MCP handshake.
    pub fn initialize(&self) -> Result<(), McpError> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "codeloom",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )?;
        self.notify("notifications/initialized", json!({}))
    }

    /// Discover the server's tools.
    pub fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let result = self.request("tools/list", json!({}))?;
        let entries = result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(entries.iter().filter_map(remote_tool_from_entry).collect())
    }

    /// Invoke a remote tool. Returns the flattened text content and whether
    /// the server flagged the result as an error.
    pub fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<(String, bool), McpError> {
        let result = self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )?;
        let text = result
            .get("content")
            .and_then(|v| v.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok((text, is_error))
    }

    fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.pending
            .lock()
            .expect("pending table")
            .insert(id, tx);

        if let Err(err) = self.write_message(&JsonRpcRequest::call(id, method, params)) {
            self.pending.lock().expect("pending table").remove(&id);
            return Err(err);
        }

        // The pump may have drained the table before this entry landed.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().expect("pending table").remove(&id);
            return Err(McpError::Closed);
        }

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(result) => result,
            Err(_) => {
                self.pending.lock().expect("pending table").remove(&id);
                Err(McpError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                })
            }
        }
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_message(&JsonRpcRequest::notification(method, params))
    }

    fn write_message(&self, message: &JsonRpcRequest) -> Result<(), McpError> {
        let body = serde_json::to_string(message)
            .map_err(|err| McpError::Protocol(err.to_string()))?;
        let mut stdin = self.stdin.lock().expect("child stdin");
        let framed = if self.content_length_framing.load(Ordering::SeqCst) {
            format!("Content-Length: {}\r\n\r\n{body}", body.len())
        } else {
            format!("{body}\n")
        };
        stdin
            .write_all(framed.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|err| McpError::Io(err.to_string()))
    }

    /// Terminate the child and fail all in-flight requests.
    pub fn shutdown(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(pump) = self.pump.lock().expect("pump handle").take() {
            let _ = pump.join();
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_pump(
    stdout: impl Read + Send + 'static,
    pending: Pending,
    framing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_frame(&mut reader, &framing) {
                Ok(Some(document)) => dispatch(&pending, &document),
                Ok(None) => break, // EOF
                Err(_) => break,
            }
        }
        // Child closed: every pending request fails uniformly.
        closed.store(true, Ordering::SeqCst);
        let mut table = pending.lock().expect("pending table");
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(McpError::Closed));
        }
    })
}

/// Read one JSON document in whichever framing the server uses. `Ok(None)`
/// means clean EOF.
fn read_frame(
    reader: &mut impl BufRead,
    framing: &AtomicBool,
) -> std::io::Result<Option<String>> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(raw_len) = header_value(trimmed, "Content-Length") {
            framing.store(true, Ordering::SeqCst);
            let length: usize = raw_len.trim().parse().map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "bad Content-Length")
            })?;
            // Consume remaining headers up to the blank separator.
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header)? == 0 {
                    return Ok(None);
                }
                if header.trim().is_empty() {
                    break;
                }
            }
            let mut body = vec![0_u8; length];
            reader.read_exact(&mut body)?;
            return Ok(Some(String::from_utf8_lossy(&body).to_string()));
        }
        // NDJSON: the line is the document.
        return Ok(Some(trimmed.to_string()));
    }
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then_some(value)
}

fn dispatch(pending: &Pending, document: &str) {
    let Ok(response) = serde_json::from_str::<JsonRpcResponse>(document) else {
        return; // server-side notification or noise
    };
    let Some(id) = response.id_as_u64() else {
        return;
    };
    let Some(tx) = pending.lock().expect("pending table").remove(&id) else {
        return;
    };
    let message = match response.error {
        Some(err) => Err(McpError::Rpc {
            code: err.code,
            message: err.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = tx.send(message);
}

fn remote_tool_from_entry(entry: &Value) -> Option<RemoteTool> {
    let name = entry.get("name")?.as_str()?.to_string();
    let description = entry
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut parameters = Vec::new();
    if let Some(schema) = entry.get("inputSchema") {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (param_name, spec) in properties {
                let raw_type = spec.get("type").and_then(|v| v.as_str()).unwrap_or("string");
                let description = spec
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                parameters.push(ToolParameter {
                    name: param_name.clone(),
                    param_type: ParamType::from_schema_type(raw_type),
                    description,
                    required: required.contains(&param_name.as_str()),
                    default: spec.get("default").cloned(),
                });
            }
        }
    }

    Some(RemoteTool {
        name,
        description,
        parameters,
    })
}
