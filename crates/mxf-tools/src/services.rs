// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The seam between tool handlers and the runtime they act on.
//!
//! Builtin tools never hold the hub directly — they hold an
//! `Arc<dyn AgentServices>` implemented by the runtime. This keeps the tool
//! crate free of hub types and lets tests drive tools against a recording
//! stub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ServiceError, ToolDescriptor};

/// Input widget requested from the human responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Select,
    MultiSelect,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A request for human input, raised by a tool on behalf of its agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputSpec {
    pub input_type: InputType,
    pub prompt: String,
    /// Options for `select` / `multi_select`.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub urgency: Urgency,
    /// Free-form presentation tag for the responder UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Blocking-mode timeout. `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Lifecycle state of a user-input request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserInputStatus {
    Pending,
    Responded,
    TimedOut,
    Cancelled,
}

/// Outcome of a user-input request, as seen by the requesting tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputOutcome {
    pub request_id: String,
    pub status: UserInputStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Acknowledgement of a `task_complete` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionAck {
    pub task_id: String,
    /// True when this call transitioned the task to `completed`; false when
    /// the caller's finish was recorded but the task awaits other assignees.
    pub task_completed: bool,
}

/// Operations a tool may perform on behalf of its calling agent.
///
/// Implemented by the runtime over the channel hub; stubbed in tests.
#[async_trait]
pub trait AgentServices: Send + Sync {
    /// Deliver a directed agent-to-agent message.
    async fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: &str,
    ) -> Result<(), ServiceError>;

    /// Record the calling agent's completion of its current task.
    async fn complete_task(
        &self,
        agent_id: &str,
        summary: &str,
        success: bool,
    ) -> Result<CompletionAck, ServiceError>;

    /// Open an async user-input request; returns the request id immediately.
    async fn open_user_input(
        &self,
        agent_id: &str,
        spec: UserInputSpec,
    ) -> Result<String, ServiceError>;

    /// Open a blocking user-input request and wait for a terminal outcome
    /// (responded, timed out, or cancelled).
    async fn await_user_input(
        &self,
        agent_id: &str,
        spec: UserInputSpec,
    ) -> Result<UserInputOutcome, ServiceError>;

    /// Poll an async request. `Pending` until a terminal outcome arrives.
    async fn poll_user_input(
        &self,
        agent_id: &str,
        request_id: &str,
    ) -> Result<UserInputOutcome, ServiceError>;

    /// Rank the tools visible to `agent_id` by relevance to `intent`.
    async fn recommend_tools(
        &self,
        agent_id: &str,
        intent: &str,
    ) -> Result<Vec<ToolDescriptor>, ServiceError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_type_serializes_snake_case() {
        let s = serde_json::to_string(&InputType::MultiSelect).unwrap();
        assert_eq!(s, "\"multi_select\"");
    }

    #[test]
    fn spec_defaults_apply_on_deserialize() {
        let spec: UserInputSpec =
            serde_json::from_str(r#"{"input_type": "text", "prompt": "name?"}"#).unwrap();
        assert_eq!(spec.urgency, Urgency::Normal);
        assert!(spec.options.is_empty());
        assert!(spec.timeout_ms.is_none());
    }

    #[test]
    fn outcome_omits_absent_value() {
        let o = UserInputOutcome {
            request_id: "r1".into(),
            status: UserInputStatus::Pending,
            value: None,
        };
        let json = serde_json::to_string(&o).unwrap();
        assert!(!json.contains("value"));
        assert!(json.contains("\"pending\""));
    }
}
