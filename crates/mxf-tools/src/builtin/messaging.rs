// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{AgentServices, ErrorKind, Tool, ToolCall, ToolContext, ToolReturn};

/// Send a directed message to another agent in the same channel.
pub struct MessagingSendTool {
    services: Arc<dyn AgentServices>,
}

impl MessagingSendTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for MessagingSendTool {
    fn name(&self) -> &str {
        "messaging_send"
    }

    fn description(&self) -> &str {
        "Send a message to another agent in your channel. The recipient sees \
         it on its next prompt. Use the agent id, not the display name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_agent_id": {
                    "type": "string",
                    "description": "Id of the receiving agent"
                },
                "content": {
                    "type": "string",
                    "description": "Message body"
                }
            },
            "required": ["target_agent_id", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let target = match call.args.get("target_agent_id").and_then(|v| v.as_str()) {
            Some(t) if !t.is_empty() => t,
            _ => {
                return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, "missing 'target_agent_id'")
            }
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, "missing 'content'"),
        };

        match self
            .services
            .send_message(&ctx.agent_id, target, content)
            .await
        {
            Ok(()) => ToolReturn::ok(&call.id, format!("message delivered to {target}")),
            Err(e) => ToolReturn::err(&call.id, e.kind, e.detail),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
