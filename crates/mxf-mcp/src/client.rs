// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! One live tool-server child process.
//!
//! The client owns the process stdio: a writer task drains an outbox channel
//! into stdin (one frame per line), a reader task matches stdout lines to
//! pending requests by correlation id, and the child's stderr is forwarded
//! to the tracing log. Requests are serialized per subprocess by the adapter;
//! the pending map still supports overlap so a late response never pairs
//! with the wrong caller.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::descriptor::McpServerDescriptor;
use crate::protocol::{RpcRequest, RpcResponse, PROTOCOL_VERSION};
use crate::McpError;

/// Grace period between SIGTERM and SIGKILL on shutdown.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// One tool announced by a server's `tools/list`.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Handle to a running tool-server process.
pub struct McpClient {
    outbox: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    /// Cancelled when the process has exited (stdout EOF or reaped).
    exited: CancellationToken,
    pid: Option<u32>,
}

impl McpClient {
    /// Spawn the child process and wire up its stdio tasks.
    pub fn spawn(
        descriptor: &McpServerDescriptor,
        workdir: Option<&std::path::Path>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Protocol("child stderr not piped".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let exited = CancellationToken::new();
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);

        // Writer: outbox → child stdin, one line per frame.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = outbox_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader: child stdout → pending map.
        let reader_pending = Arc::clone(&pending);
        let reader_exited = exited.clone();
        let server_id = descriptor.server_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(resp) = RpcResponse::parse_line(&line) else {
                    debug!(server = %server_id, "skipping non-response line from server");
                    continue;
                };
                let waiter = reader_pending.lock().unwrap().remove(&resp.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => warn!(server = %server_id, id = resp.id, "response for unknown request id"),
                }
            }
            // EOF: the process is gone. Fail every pending request.
            reader_exited.cancel();
            reader_pending.lock().unwrap().clear();
        });

        // Stderr: forward to the log so operator output is not lost.
        let server_id = descriptor.server_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %server_id, "stderr: {line}");
            }
        });

        // Reaper: owns the child handle and observes its real exit.
        let reap_exited = exited.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            reap_exited.cancel();
        });

        Ok(Self {
            outbox: outbox_tx,
            pending,
            next_id: AtomicU64::new(1),
            exited,
            pid,
        })
    }

    /// True once the child has exited.
    pub fn is_down(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Resolves when the child exits.
    pub async fn wait_exited(&self) {
        self.exited.cancelled().await;
    }

    /// Issue one request and await its correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.is_down() {
            return Err(McpError::ServerDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = RpcRequest::new(id, method, params).to_line()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if self.outbox.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(McpError::ServerDown);
        }

        let outcome = tokio::select! {
            _ = self.exited.cancelled() => Err(McpError::ServerDown),
            resp = tokio::time::timeout(timeout, rx) => match resp {
                Ok(Ok(resp)) => resp.into_result(),
                Ok(Err(_)) => Err(McpError::ServerDown),
                Err(_) => Err(McpError::Timeout),
            },
        };
        if outcome.is_err() {
            self.pending.lock().unwrap().remove(&id);
        }
        outcome
    }

    /// Protocol handshake: version and capability exchange.
    pub async fn initialize(&self, timeout: Duration) -> Result<(), McpError> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "clientInfo": { "name": "mxf", "version": env!("CARGO_PKG_VERSION") },
            }),
            timeout,
        )
        .await
        .map(|_| ())
    }

    /// Fetch the announced tool manifest.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<McpToolInfo>, McpError> {
        let result = self.request("tools/list", Value::Null, timeout).await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| McpError::Protocol("tools/list result has no tools array".into()))?;

        let mut out = Vec::with_capacity(tools.len());
        for tool in tools {
            let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            out.push(McpToolInfo {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            });
        }
        Ok(out)
    }

    /// Invoke one tool. Returns the joined text content and the error flag.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<(String, bool), McpError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                timeout,
            )
            .await?;

        let text = match result.get("content").and_then(|c| c.as_array()) {
            Some(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            None => result.to_string(),
        };
        let is_error = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);
        Ok((text, is_error))
    }

    /// Graceful termination: SIGTERM, then SIGKILL after [`TERM_GRACE`].
    pub async fn terminate(&self) {
        if self.is_down() {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(TERM_GRACE, self.exited.cancelled())
                .await
                .is_ok()
            {
                return;
            }
            warn!(pid, "tool server ignored SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
        let _ = tokio::time::timeout(TERM_GRACE, self.exited.cancelled()).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A fake tool server in shell: answers every request line with a canned
    /// response whose id counts up from 1, matching the client's id sequence
    /// (requests are serialized, so the ids always line up).
    fn fake_server() -> McpServerDescriptor {
        McpServerDescriptor::new("fake", "sh").with_args([
            "-c",
            r#"i=1; while read line; do
                 echo "{\"jsonrpc\":\"2.0\",\"id\":$i,\"result\":{\"protocolVersion\":\"test\",\"tools\":[{\"name\":\"fake_echo\",\"description\":\"echoes input\",\"inputSchema\":{\"type\":\"object\"}}],\"content\":[{\"type\":\"text\",\"text\":\"ok\"}],\"isError\":false}}";
                 i=$((i+1));
               done"#,
        ])
    }

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn initialize_and_list_tools() {
        let client = McpClient::spawn(&fake_server(), None).unwrap();
        client.initialize(T).await.unwrap();
        let tools = client.list_tools(T).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "fake_echo");
        client.terminate().await;
    }

    #[tokio::test]
    async fn call_tool_returns_text_content() {
        let client = McpClient::spawn(&fake_server(), None).unwrap();
        let (text, is_error) = client
            .call_tool("fake_echo", serde_json::json!({"x": 1}), T)
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert!(!is_error);
        client.terminate().await;
    }

    #[tokio::test]
    async fn exited_server_fails_fast() {
        let descriptor = McpServerDescriptor::new("dead", "sh").with_args(["-c", "exit 0"]);
        let client = McpClient::spawn(&descriptor, None).unwrap();
        client.wait_exited().await;
        let err = client.request("tools/list", Value::Null, T).await.unwrap_err();
        assert!(matches!(err, McpError::ServerDown));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Reads but never answers.
        let descriptor = McpServerDescriptor::new("mute", "sh")
            .with_args(["-c", "while read line; do :; done"]);
        let client = McpClient::spawn(&descriptor, None).unwrap();
        let err = client
            .request("initialize", Value::Null, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout));
        client.terminate().await;
    }

    #[tokio::test]
    async fn terminate_reaps_the_child() {
        let client = McpClient::spawn(&fake_server(), None).unwrap();
        client.terminate().await;
        assert!(client.is_down());
    }
}
