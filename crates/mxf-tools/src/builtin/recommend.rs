// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{AgentServices, ErrorKind, Tool, ToolCall, ToolContext, ToolReturn};

/// Rank the tools visible to the calling agent by relevance to an intent.
pub struct ToolsRecommendTool {
    services: Arc<dyn AgentServices>,
}

impl ToolsRecommendTool {
    pub fn new(services: Arc<dyn AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for ToolsRecommendTool {
    fn name(&self) -> &str {
        "tools_recommend"
    }

    fn description(&self) -> &str {
        "Given a description of what you want to do, returns the registered \
         tools most relevant to it, best match first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "intent": {
                    "type": "string",
                    "description": "What you are trying to accomplish"
                }
            },
            "required": ["intent"],
            "additionalProperties": false
        })
    }

    fn safe_parallel(&self) -> bool {
        true
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReturn {
        let intent = match call.args.get("intent").and_then(|v| v.as_str()) {
            Some(i) if !i.is_empty() => i,
            _ => return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, "missing 'intent'"),
        };

        match self.services.recommend_tools(&ctx.agent_id, intent).await {
            Ok(ranked) => {
                if ranked.is_empty() {
                    return ToolReturn::ok(&call.id, "no matching tools");
                }
                let lines: Vec<String> = ranked
                    .iter()
                    .map(|d| format!("{}: {}", d.name, d.description))
                    .collect();
                ToolReturn::ok(&call.id, lines.join("\n"))
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

    #[tokio::test]
    async fn empty_intent_is_invalid() {
        let tool = ToolsRecommendTool::new(Arc::new(StubServices::default()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "t1".into(),
                    name: "tools_recommend".into(),
                    args: json!({"intent": ""}),
                },
                &ToolContext::default(),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgs));
    }

    #[tokio::test]
    async fn no_matches_is_a_normal_result() {
        let tool = ToolsRecommendTool::new(Arc::new(StubServices::default()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "t1".into(),
                    name: "tools_recommend".into(),
                    args: json!({"intent": "send a message"}),
                },
                &ToolContext::default(),
            )
            .await;
        assert!(out.ok);
        assert!(out.content.contains("no matching tools"));
    }
}
