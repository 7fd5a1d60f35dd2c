// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ErrorKind;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation id from the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub args: Value,
}

/// Identity of the caller, passed to every handler.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent_id: String,
    pub channel_id: String,
    pub task_id: Option<String>,
}

/// Where a registered tool resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Handled in-process by a registered [`Tool`].
    Internal,
    /// Proxied to a channel-scoped MCP tool server.
    ChannelMcp,
}

/// Public description of a registered tool, as exposed to agents and to the
/// prompt assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
    pub origin: ToolOrigin,
    /// MCP server id for `ChannelMcp` tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Safe to retry without side effects.
    pub idempotent: bool,
}

/// The result of executing a tool: either a payload or a categorized failure.
///
/// Failures here are data, not control flow — the executor hands them back
/// to the model as tool results so it can try an alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReturn {
    pub call_id: String,
    pub ok: bool,
    /// Result payload (`ok = true`) or a short failure description.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ToolReturn {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ok: true,
            content: content.into(),
            kind: None,
        }
    }

    pub fn err(call_id: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ok: false,
            content: detail.into(),
            kind: Some(kind),
        }
    }

    /// Serialize into the JSON object fed back to the model.
    pub fn to_result_json(&self) -> Value {
        if self.ok {
            serde_json::json!({ "ok": true, "result": self.content })
        } else {
            serde_json::json!({
                "ok": false,
                "kind": self.kind.map(|k| k.to_string()),
                "detail": self.content,
            })
        }
    }
}

/// Trait implemented by every internal tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    /// Terminal tools end the session; remaining calls in the same batch are
    /// discarded after one succeeds.
    fn terminal(&self) -> bool {
        false
    }
    /// Read-only tools that touch no shared state; a batch made up entirely
    /// of these runs concurrently.
    fn safe_parallel(&self) -> bool {
        false
    }
    /// Orchestration-class tools are refused on channels with system-LLM
    /// operations disabled.
    fn orchestration(&self) -> bool {
        false
    }
    /// Safe to retry without duplicating side effects.
    fn idempotent(&self) -> bool {
        false
    }
    /// Execute the tool. Failures are returned as [`ToolReturn::err`], never
    /// panicked or thrown.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
