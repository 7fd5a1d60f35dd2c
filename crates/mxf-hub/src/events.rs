// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The typed channel event fabric.
//!
//! Every event is one envelope with a tagged payload; the serialized tag is
//! the stable wire name (`TASK_ASSIGNED`, `AGENT_MESSAGE`, …). Components
//! subscribe through the hub's broadcast bus; per-subscriber observation
//! order equals hub emission order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mxf_tools::UserInputSpec;

/// Envelope common to every event on a channel bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_id: String,
    /// The agent the event concerns, when it concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ChannelEvent {
    pub fn new(
        channel_id: impl Into<String>,
        agent_id: Option<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            agent_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The stable wire tag of the payload.
    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// Payloads, tagged with the stable event names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    TaskCreated {
        task_id: String,
    },
    TaskAssigned {
        task_id: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
        summary: String,
        success: bool,
        /// True when this completion transitioned the whole task.
        task_completed: bool,
    },
    TaskCancelled {
        task_id: String,
        reason: String,
    },
    TaskFailed {
        task_id: String,
        reason: String,
    },
    TaskError {
        task_id: String,
        detail: String,
    },
    AgentMessage {
        from: String,
        to: String,
        content: String,
    },
    ChannelMessage {
        from: String,
        content: String,
    },
    ToolCall {
        call_id: String,
        tool: String,
        args: Value,
    },
    ToolResult {
        call_id: String,
        tool: String,
        ok: bool,
        content: String,
    },
    LlmReasoning {
        content: String,
    },
    LlmResponse {
        text: String,
    },
    UserInputRequest {
        request_id: String,
        spec: UserInputSpec,
    },
    UserInputResponse {
        request_id: String,
    },
    ToolListUpdated {
        server_id: String,
        tools: Vec<String>,
    },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::TaskCreated { .. } => "TASK_CREATED",
            EventPayload::TaskAssigned { .. } => "TASK_ASSIGNED",
            EventPayload::TaskStarted { .. } => "TASK_STARTED",
            EventPayload::TaskCompleted { .. } => "TASK_COMPLETED",
            EventPayload::TaskCancelled { .. } => "TASK_CANCELLED",
            EventPayload::TaskFailed { .. } => "TASK_FAILED",
            EventPayload::TaskError { .. } => "TASK_ERROR",
            EventPayload::AgentMessage { .. } => "AGENT_MESSAGE",
            EventPayload::ChannelMessage { .. } => "CHANNEL_MESSAGE",
            EventPayload::ToolCall { .. } => "TOOL_CALL",
            EventPayload::ToolResult { .. } => "TOOL_RESULT",
            EventPayload::LlmReasoning { .. } => "LLM_REASONING",
            EventPayload::LlmResponse { .. } => "LLM_RESPONSE",
            EventPayload::UserInputRequest { .. } => "USER_INPUT_REQUEST",
            EventPayload::UserInputResponse { .. } => "USER_INPUT_RESPONSE",
            EventPayload::ToolListUpdated { .. } => "TOOL_LIST_UPDATED",
        }
    }

    /// True for the four per-session terminal tags.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::TaskCompleted { .. }
                | EventPayload::TaskCancelled { .. }
                | EventPayload::TaskFailed { .. }
                | EventPayload::TaskError { .. }
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
