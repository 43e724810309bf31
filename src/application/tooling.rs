use crate::config::ServerConfig;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Error)]
pub enum ToolInvokeError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated { server: String },
}

impl ToolInvokeError {
    pub fn user_message(&self) -> String {
        match self {
            ToolInvokeError::Spawn { server, .. } => format!(
                "The '{server}' tool server could not be started. Check that it is installed and its command is runnable."
            ),
            ToolInvokeError::Transport { server, .. }
            | ToolInvokeError::Terminated { server } => format!(
                "The connection to the '{server}' tool server was lost. Try again."
            ),
            ToolInvokeError::InvalidJson { server, .. } => format!(
                "The '{server}' tool server sent a response that could not be read."
            ),
            ToolInvokeError::Rpc { server, message, .. } => {
                format!("The '{server}' tool server rejected the request: {message}")
            }
        }
    }
}

/// Raw outcome of a tool call: the MCP `content` array, untouched. The agent
/// decides whether to normalize it or pass the text through.
#[derive(Debug, Clone, Default)]
pub struct RawToolResult {
    pub content: Vec<Value>,
}

impl RawToolResult {
    /// Concatenated text chunks, for tools whose output is used verbatim.
    pub fn text(&self) -> String {
        let chunks: Vec<&str> = self
            .content
            .iter()
            .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
            .collect();
        chunks.join("\n")
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        server: &ServerConfig,
        tool: &str,
        arguments: Value,
    ) -> Result<RawToolResult, ToolInvokeError>;
}

/// Reaches a tool server over a stdio JSON-RPC transport. Every call opens a
/// fresh child process: initialize handshake, one `tools/call`, then reap.
pub struct StdioToolExecutor;

#[async_trait]
impl ToolExecutor for StdioToolExecutor {
    async fn execute(
        &self,
        server: &ServerConfig,
        tool: &str,
        arguments: Value,
    ) -> Result<RawToolResult, ToolInvokeError> {
        let mut session = StdioSession::spawn(server)?;
        let outcome = session.call_tool(tool, arguments).await;
        session.shutdown().await;
        outcome
    }
}

struct StdioSession {
    server: String,
    child: Child,
    writer: BufWriter<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl StdioSession {
    fn spawn(server: &ServerConfig) -> Result<Self, ToolInvokeError> {
        let mut command = Command::new(&server.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if !server.args.is_empty() {
            command.args(&server.args);
        }
        if let Some(dir) = &server.workdir {
            command.current_dir(dir);
        }
        for (key, value) in &server.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ToolInvokeError::Spawn {
            server: server.name.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| transport_error(&server.name, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| transport_error(&server.name, "failed to capture server stdout"))?;

        debug!(server = %server.name, command = %server.command, "Spawned MCP server process");
        Ok(Self {
            server: server.name.clone(),
            child,
            writer: BufWriter::new(stdin),
            lines: BufReader::new(stdout).lines(),
            next_id: 1,
        })
    }

    async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Value,
    ) -> Result<RawToolResult, ToolInvokeError> {
        self.initialize().await?;

        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
        });
        let result = self.send_request("tools/call", params).await?;
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(RawToolResult { content })
    }

    async fn initialize(&mut self) -> Result<(), ToolInvokeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        self.send_request("initialize", params).await?;
        self.send_notification("notifications/initialized", json!({}))
            .await
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, ToolInvokeError> {
        let id = format!("req-{}", self.next_id);
        self.next_id += 1;

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_message(&payload).await?;
        self.await_response(&id).await
    }

    async fn send_notification(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<(), ToolInvokeError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_message(&payload).await
    }

    /// Read line-framed messages until the response for `id` arrives. Server
    /// `ping` requests are answered in place; other server traffic is logged
    /// and skipped.
    async fn await_response(&mut self, id: &str) -> Result<Value, ToolInvokeError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|source| transport_error(&self.server, source.to_string()))?
                .ok_or_else(|| ToolInvokeError::Terminated {
                    server: self.server.clone(),
                })?;
            if line.trim().is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(source) => {
                    warn!(server = %self.server, line, %source, "Received invalid JSON from MCP server");
                    continue;
                }
            };

            if let Some(method) = value.get("method").and_then(Value::as_str) {
                if let Some(request_id) = value.get("id").cloned() {
                    self.answer_server_request(request_id, method).await?;
                } else {
                    debug!(server = %self.server, method, "Ignoring notification from server");
                }
                continue;
            }

            let matches = match value.get("id") {
                Some(Value::String(response_id)) => response_id == id,
                Some(Value::Number(number)) => number.to_string() == id,
                _ => false,
            };
            if !matches {
                debug!(server = %self.server, "Received response for unknown request");
                continue;
            }

            if let Some(error) = value.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(ToolInvokeError::Rpc {
                    server: self.server.clone(),
                    code,
                    message,
                });
            }

            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn answer_server_request(
        &mut self,
        id: Value,
        method: &str,
    ) -> Result<(), ToolInvokeError> {
        let payload = if method == "ping" {
            json!({ "jsonrpc": "2.0", "id": id, "result": {} })
        } else {
            warn!(server = %self.server, method, "Server sent unsupported request");
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("client does not implement method '{method}'"),
                },
            })
        };
        self.write_message(&payload).await
    }

    async fn write_message(&mut self, message: &Value) -> Result<(), ToolInvokeError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| ToolInvokeError::InvalidJson {
                server: self.server.clone(),
                source,
            })?;
        self.writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))
    }

    async fn shutdown(mut self) {
        if let Err(err) = self.child.kill().await {
            debug!(
                server = %self.server,
                %err,
                "failed to kill MCP server process (may have already exited)"
            );
        }
        let _ = self.child.wait().await;
    }
}

fn transport_error(server: &str, message: impl Into<String>) -> ToolInvokeError {
    ToolInvokeError::Transport {
        server: server.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_only_text_chunks() {
        let result = RawToolResult {
            content: vec![
                json!({"type": "text", "text": "first"}),
                json!({"type": "image", "data": "zz"}),
                json!({"type": "text", "text": "second"}),
            ],
        };
        assert_eq!(result.text(), "first\nsecond");
    }

    #[test]
    fn empty_content_yields_empty_text() {
        assert_eq!(RawToolResult::default().text(), "");
    }

    #[test]
    fn rpc_error_display_names_server_and_code() {
        let error = ToolInvokeError::Rpc {
            server: "codex".into(),
            code: -32601,
            message: "no such tool".into(),
        };
        let rendered = error.to_string();
        assert!(rendered.contains("codex"));
        assert!(rendered.contains("-32601"));
        assert!(rendered.contains("no such tool"));
    }
}
