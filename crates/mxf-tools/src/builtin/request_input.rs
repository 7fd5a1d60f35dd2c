// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The async user-input pair: `request_user_input` opens a request and
//! returns its id immediately; `get_user_input_response` polls it. The
//! agent's iteration is never suspended between polls, so it can interleave
//! other tool calls while the human decides.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::user_input::{input_schema, spec_from_args};
use crate::{AgentServices, ErrorKind, Tool, ToolCall, ToolContext, ToolReturn};

/// Open a deferred human prompt; returns `{request_id, status: pending}`.
pub struct RequestUserInputTool {
    services: Arc<dyn AgentServices>,
}

impl RequestUserInputTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for RequestUserInputTool {
    fn name(&self) -> &str {
        "request_user_input"
    }

    fn description(&self) -> &str {
        "Ask the human operator a question WITHOUT waiting for the answer. \
         Returns a request_id immediately; poll it later with \
         get_user_input_response while continuing other work."
    }

    fn parameters_schema(&self) -> Value {
        input_schema(false)
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let spec = match spec_from_args(&call.args) {
            Ok(s) => s,
            Err(detail) => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, detail),
        };

        match self.services.open_user_input(&ctx.agent_id, spec).await {
            Ok(request_id) => ToolReturn::ok(
                &call.id,
                json!({ "request_id": request_id, "status": "pending" }).to_string(),
            ),
            Err(e) => ToolReturn::err(&call.id, e.kind, e.detail),
        }
    }
}

/// Poll a request opened by [`RequestUserInputTool`].
pub struct GetUserInputResponseTool {
    services: Arc<dyn AgentServices>,
}

impl GetUserInputResponseTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GetUserInputResponseTool {
    fn name(&self) -> &str {
        "get_user_input_response"
    }

    fn description(&self) -> &str {
        "Check whether a request opened with request_user_input has been \
         answered. Returns status pending/responded/timed_out/cancelled and \
         the value once responded."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_id": {
                    "type": "string",
                    "description": "Id returned by request_user_input"
                }
            },
            "required": ["request_id"],
            "additionalProperties": false
        })
    }

    // Polling is read-only and legitimately repetitive.
    fn safe_parallel(&self) -> bool {
        true
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let request_id = match call.args.get("request_id").and_then(|v| v.as_str()) {
            Some(r) if !r.is_empty() => r,
            _ => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, "missing 'request_id'"),
        };

        match self
            .services
            .poll_user_input(&ctx.agent_id, request_id)
            .await
        {
            Ok(outcome) => ToolReturn::ok(
                &call.id,
                serde_json::to_string(&outcome).unwrap_or_default(),
            ),
            Err(e) => ToolReturn::err(&call.id, e.kind, e.detail),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
