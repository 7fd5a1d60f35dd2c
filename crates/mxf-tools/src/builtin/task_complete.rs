// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{AgentServices, ErrorKind, Tool, ToolCall, ToolContext, ToolReturn};

/// Terminal tool: the agent declares its work on the current task finished.
///
/// Whether the task itself transitions to `completed` depends on the task's
/// coordination mode and completion-agent designation — the hub decides;
/// this tool only reports the caller's finish.
pub struct TaskCompleteTool {
    services: Arc<dyn AgentServices>,
}

impl TaskCompleteTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Mark your work on the current task as finished. Provide a summary of \
         what was accomplished. Set success=false if the task could not be \
         completed. This ends your turn — call it exactly once, when done."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished (or why it failed)"
                },
                "success": {
                    "type": "boolean",
                    "description": "Whether the task succeeded (default: true)",
                    "default": true
                }
            },
            "required": ["summary"],
            "additionalProperties": false
        })
    }

    fn terminal(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let summary = match call.args.get("summary").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s,
            _ => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, "missing 'summary'"),
        };
        let success = call
            .args
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        match self
            .services
            .complete_task(&ctx.agent_id, summary, success)
            .await
        {
            Ok(ack) => {
                let note = if ack.task_completed {
                    "task completed"
                } else {
                    "completion recorded; awaiting other assignees"
                };
                ToolReturn::ok(&call.id, format!("{note} (task {})", ack.task_id))
            }
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

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: "a1".into(),
            channel_id: "c1".into(),
            task_id: Some("task-1".into()),
        }
    }

    #[tokio::test]
    async fn records_completion_through_services() {
        let services = Arc::new(StubServices::default());
        let tool = TaskCompleteTool::new(Arc::clone(&services) as Arc<dyn AgentServices>);
        let out = tool
            .execute(
                &ToolCall {
                    id: "c1".into(),
                    name: "task_complete".into(),
                    args: json!({"summary": "done", "success": true}),
                },
                &ctx(),
            )
            .await;
        assert!(out.ok);
        let recorded = services.completions.lock().unwrap();
        assert_eq!(recorded[0], ("a1".to_string(), "done".to_string(), true));
    }

    #[tokio::test]
    async fn missing_summary_is_invalid_args() {
        let tool = TaskCompleteTool::new(Arc::new(StubServices::default()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "c1".into(),
                    name: "task_complete".into(),
                    args: json!({}),
                },
                &ctx(),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgs));
    }

    #[tokio::test]
    async fn success_defaults_to_true() {
        let services = Arc::new(StubServices::default());
        let tool = TaskCompleteTool::new(Arc::clone(&services) as Arc<dyn AgentServices>);
        tool.execute(
            &ToolCall {
                id: "c1".into(),
                name: "task_complete".into(),
                args: json!({"summary": "done"}),
            },
            &ctx(),
        )
        .await;
        assert!(services.completions.lock().unwrap()[0].2);
    }

    #[test]
    fn is_terminal() {
        let tool = TaskCompleteTool::new(Arc::new(StubServices::default()));
        assert!(tool.terminal());
    }
}
