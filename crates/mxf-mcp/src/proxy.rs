// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use mxf_tools::{ErrorKind, Tool, ToolCall, ToolContext, ToolReturn};

use crate::client::{McpClient, McpToolInfo};
use crate::McpError;

/// Shared slot holding the currently live client for one server, or `None`
/// while the supervisor is restarting it.
pub(crate) type ClientSlot = Arc<Mutex<Option<Arc<McpClient>>>>;

/// Registry entry that forwards invocations to a channel's tool server.
///
/// The proxy holds the supervisor's client slot rather than a client, so a
/// restart transparently swaps the backing process under every registered
/// tool without re-registration.
pub struct McpProxyTool {
    info: McpToolInfo,
    slot: ClientSlot,
    call_timeout: Duration,
}

impl McpProxyTool {
    pub(crate) fn new(info: McpToolInfo, slot: ClientSlot, call_timeout: Duration) -> Self {
        Self {
            info,
            slot,
            call_timeout,
        }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolReturn {
        let client = self.slot.lock().await.clone();
        let Some(client) = client else {
            return ToolReturn::err(
                &call.id,
                ErrorKind::ProviderUnavailable,
                format!("tool server for {} is down", self.info.name),
            );
        };

        match client
            .call_tool(&self.info.name, call.args.clone(), self.call_timeout)
            .await
        {
            Ok((text, false)) => ToolReturn::ok(&call.id, text),
            Ok((text, true)) => ToolReturn::err(&call.id, ErrorKind::HandlerFailed, text),
            Err(McpError::ServerDown) => ToolReturn::err(
                &call.id,
                ErrorKind::ProviderUnavailable,
                "tool server exited during the call",
            ),
            Err(McpError::Timeout) => {
                ToolReturn::err(&call.id, ErrorKind::Timeout, "tool server call timed out")
            }
            Err(e) => ToolReturn::err(&call.id, ErrorKind::HandlerFailed, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn empty_slot_fails_fast_as_provider_unavailable() {
        let proxy = McpProxyTool::new(
            McpToolInfo {
                name: "remote_thing".into(),
                description: "d".into(),
                input_schema: json!({"type": "object"}),
            },
            Arc::new(Mutex::new(None)),
            Duration::from_secs(1),
        );
        let out = proxy
            .execute(
                &ToolCall {
                    id: "c1".into(),
                    name: "remote_thing".into(),
                    args: json!({}),
                },
                &ToolContext::default(),
            )
            .await;
        assert!(!out.ok);
        assert_eq!(out.kind, Some(ErrorKind::ProviderUnavailable));
    }
}
