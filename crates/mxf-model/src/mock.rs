// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Completion, CompletionRequest, LlmError, ModelProvider, RawToolCall};

/// Deterministic mock provider for tests. Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, LlmError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        Ok(Completion {
            text: Some(format!("MOCK: {reply}")),
            ..Default::default()
        })
    }
}

/// A pre-scripted provider. Each call to `complete` pops the next completion
/// from the front of the queue. This lets tests specify exact turn sequences
/// — including tool calls — without network access.
pub struct ScriptedProvider {
    script: Mutex<Vec<Completion>>,
    /// Optional artificial latency per call, for cancellation tests.
    delay: Option<std::time::Duration>,
    /// Every `CompletionRequest` seen by this provider, in call order.
    /// Tests inspect this to assert on prompt contents and call counts.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of completions.
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script),
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delay every completion by `d` before returning. Used to hold a call
    /// in flight long enough for a test to cancel it.
    pub fn with_delay(mut self, d: std::time::Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Completion {
            text: Some(reply.into()),
            ..Default::default()
        }])
    }

    /// Convenience: build a completion carrying one native tool call.
    pub fn tool_call_completion(
        id: impl Into<String>,
        name: impl Into<String>,
        args: Value,
    ) -> Completion {
        Completion {
            tool_calls: vec![RawToolCall {
                id: id.into(),
                name: name.into(),
                arguments: args.to_string(),
            }],
            ..Default::default()
        }
    }

    /// Convenience: build a plain text completion.
    pub fn text_completion(text: impl Into<String>) -> Completion {
        Completion {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(req);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        // Script exhausted: reply with inert text so a runaway loop fails an
        // assertion instead of hanging.
        Ok(next.unwrap_or_else(|| Completion {
            text: Some("[no more scripted turns]".into()),
            ..Default::default()
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
