// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    AgentServices, ErrorKind, InputType, Tool, ToolCall, ToolContext, ToolReturn, Urgency,
    UserInputSpec,
};

/// Blocking human prompt: the tool call does not return until the request is
/// in a terminal state (responded, timed out, or cancelled). The agent's
/// iteration is suspended at the invocation point the whole time.
pub struct UserInputTool {
    services: Arc<dyn AgentServices>,
}

impl UserInputTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

/// Shared argument parsing for both user-input tools.
pub(crate) fn spec_from_args(args: &Value) -> Result<UserInputSpec, String> {
    let input_type = match args.get("input_type").and_then(|v| v.as_str()) {
        Some("text") | None => InputType::Text,
        Some("select") => InputType::Select,
        Some("multi_select") => InputType::MultiSelect,
        Some("confirm") => InputType::Confirm,
        Some(other) => return Err(format!("unknown input_type: {other}")),
    };
    let prompt = match args.get("prompt").and_then(|v| v.as_str()) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Err("missing 'prompt'".into()),
    };
    let options: Vec<String> = args
        .get("options")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if matches!(input_type, InputType::Select | InputType::MultiSelect) && options.len() < 2 {
        return Err("select inputs need at least 2 options".into());
    }
    let urgency = match args.get("urgency").and_then(|v| v.as_str()) {
        Some("low") => Urgency::Low,
        Some("high") => Urgency::High,
        Some("critical") => Urgency::Critical,
        _ => Urgency::Normal,
    };
    Ok(UserInputSpec {
        input_type,
        prompt,
        options,
        urgency,
        theme: args
            .get("theme")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        timeout_ms: args.get("timeout_ms").and_then(|v| v.as_u64()),
    })
}

pub(crate) fn input_schema(with_timeout: bool) -> Value {
    let mut properties = json!({
        "input_type": {
            "type": "string",
            "enum": ["text", "select", "multi_select", "confirm"],
            "description": "Kind of input widget (default: text)"
        },
        "prompt": {
            "type": "string",
            "description": "The question shown to the user"
        },
        "options": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Choices for select/multi_select (≥2)"
        },
        "urgency": {
            "type": "string",
            "enum": ["low", "normal", "high", "critical"]
        },
        "theme": { "type": "string" }
    });
    if with_timeout {
        properties["timeout_ms"] = json!({
            "type": "integer",
            "description": "Give up after this many milliseconds (default: wait forever)"
        });
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["prompt"],
        "additionalProperties": false
    })
}

#[async_trait]
impl Tool for UserInputTool {
    fn name(&self) -> &str {
        "user_input"
    }

    fn description(&self) -> &str {
        "Ask the human operator a question and wait for the answer. Blocks \
         until the user responds, the timeout elapses, or the request is \
         cancelled. For a non-blocking request use request_user_input."
    }

    fn parameters_schema(&self) -> Value {
        input_schema(true)
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let spec = match spec_from_args(&call.args) {
            Ok(s) => s,
            Err(detail) => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, detail),
        };

        match self.services.await_user_input(&ctx.agent_id, spec).await {
            Ok(outcome) => ToolReturn::ok(
                &call.id,
                serde_json::to_string(&outcome).unwrap_or_default(),
            ),
            Err(e) => ToolReturn::err(&call.id, e.kind, e.detail),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::test_support::StubServices;
    use crate::{UserInputOutcome, UserInputStatus};

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: "a1".into(),
            channel_id: "c1".into(),
            task_id: None,
        }
    }

    #[tokio::test]
    async fn blocking_call_returns_terminal_outcome() {
        let tool = UserInputTool::new(Arc::new(StubServices::default()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "u1".into(),
                    name: "user_input".into(),
                    args: json!({"input_type": "text", "prompt": "your name?"}),
                },
                &ctx(),
            )
            .await;
        assert!(out.ok);
        assert!(out.content.contains("responded"));
        assert!(out.content.contains("stub answer"));
    }

    #[tokio::test]
    async fn timed_out_outcome_is_surfaced_not_an_error() {
        let services = Arc::new(StubServices::default());
        *services.blocking_outcome.lock().unwrap() = Some(UserInputOutcome {
            request_id: "r1".into(),
            status: UserInputStatus::TimedOut,
            value: None,
        });
        let tool = UserInputTool::new(Arc::clone(&services) as Arc<dyn AgentServices>);
        let out = tool
            .execute(
                &ToolCall {
                    id: "u1".into(),
                    name: "user_input".into(),
                    args: json!({"prompt": "anyone there?", "timeout_ms": 1000}),
                },
                &ctx(),
            )
            .await;
        // A timeout is a normal tool result; the session continues.
        assert!(out.ok);
        assert!(out.content.contains("timed_out"));
    }

    #[tokio::test]
    async fn select_without_options_is_invalid() {
        let tool = UserInputTool::new(Arc::new(StubServices::default()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "u1".into(),
                    name: "user_input".into(),
                    args: json!({"input_type": "select", "prompt": "pick one"}),
                },
                &ctx(),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgs));
    }

    #[test]
    fn spec_parses_all_fields() {
        let spec = spec_from_args(&json!({
            "input_type": "select",
            "prompt": "color?",
            "options": ["red", "blue"],
            "urgency": "high",
            "theme": "setup",
            "timeout_ms": 5000
        }))
        .unwrap();
        assert_eq!(spec.input_type, InputType::Select);
        assert_eq!(spec.options.len(), 2);
        assert_eq!(spec.urgency, Urgency::High);
        assert_eq!(spec.timeout_ms, Some(5000));
    }
}
