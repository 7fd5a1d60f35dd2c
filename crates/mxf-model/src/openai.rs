// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Driver for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Most hosted and local providers speak this wire format; a single driver
//! configured with a base URL and optional bearer key covers them all.
//! Responses are non-streaming — the gateway queues whole calls, so partial
//! delivery buys nothing here.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    ChatMessage, Completion, CompletionRequest, LlmError, MessageContent, ModelProvider,
    RawToolCall, Role,
};

pub struct OpenAiCompatProvider {
    name: String,
    api_key: Option<String>,
    chat_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: String, api_key: Option<String>, base_url: String) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            name,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            client: reqwest::Client::new(),
        }
    }

    fn body(&self, req: &CompletionRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// Serialize one [`ChatMessage`] into the OpenAI wire shape.
fn wire_message(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    match &msg.content {
        MessageContent::Text(t) => json!({ "role": role, "content": t }),
        MessageContent::ToolCall {
            tool_call_id,
            name,
            arguments,
        } => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": tool_call_id,
                "type": "function",
                "function": { "name": name, "arguments": arguments.to_string() },
            }],
        }),
        MessageContent::ToolResult {
            tool_call_id,
            content,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, LlmError> {
        let mut http = self.client.post(&self.chat_url).json(&self.body(&req));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http
            .send()
            .await
            .map_err(|e| LlmError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        debug!(provider = %self.name, model = %req.model, "completion received");
        parse_body(&body)
    }
}

fn parse_body(body: &Value) -> Result<Completion, LlmError> {
    let message = body["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| LlmError::Parse("response has no choices".into()))?;

    let mut completion = Completion {
        text: message["content"].as_str().map(str::to_string),
        reasoning: message["reasoning_content"].as_str().map(str::to_string),
        ..Default::default()
    };

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            completion.tool_calls.push(RawToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: function["name"].as_str().unwrap_or_default().to_string(),
                arguments: function["arguments"].as_str().unwrap_or("{}").to_string(),
            });
        }
    }

    Ok(completion)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ToolSpec;

    #[test]
    fn body_includes_tools_when_present() {
        let p = OpenAiCompatProvider::new("test".into(), None, "http://localhost/v1".into());
        let req = CompletionRequest {
            model: "m".into(),
            tools: vec![ToolSpec {
                name: "t".into(),
                description: "d".into(),
                parameters: json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = p.body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "t");
    }

    #[test]
    fn body_omits_tools_when_empty() {
        let p = OpenAiCompatProvider::new("test".into(), None, "http://localhost/v1".into());
        let body = p.body(&CompletionRequest::default());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn wire_tool_result_carries_call_id() {
        let v = wire_message(&ChatMessage::tool_result("c9", "out"));
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c9");
    }

    #[test]
    fn parse_body_extracts_text() {
        let body = json!({
            "choices": [{ "message": { "content": "hello" } }]
        });
        let c = parse_body(&body).unwrap();
        assert_eq!(c.text.as_deref(), Some("hello"));
        assert!(c.tool_calls.is_empty());
    }

    #[test]
    fn parse_body_extracts_tool_calls() {
        let body = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": { "name": "game_makeMove", "arguments": "{\"row\":1}" }
                }]
            }}]
        });
        let c = parse_body(&body).unwrap();
        assert_eq!(c.tool_calls.len(), 1);
        assert_eq!(c.tool_calls[0].name, "game_makeMove");
        assert_eq!(c.tool_calls[0].arguments, "{\"row\":1}");
    }

    #[test]
    fn parse_body_without_choices_is_error() {
        let err = parse_body(&json!({})).unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn parse_body_reads_reasoning_content() {
        let body = json!({
            "choices": [{ "message": { "content": "x", "reasoning_content": "because" } }]
        });
        let c = parse_body(&body).unwrap();
        assert_eq!(c.reasoning.as_deref(), Some("because"));
    }
}
