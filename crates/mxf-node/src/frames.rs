// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! JSON frames on the agent WebSocket.

use serde::{Deserialize, Serialize};

use mxf_config::LlmSettings;
use mxf_hub::ChannelEvent;
use mxf_tools::ToolDescriptor;

/// Server → agent frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after a successful handshake: the negotiated capability set.
    Connected {
        agent_id: String,
        channel_id: String,
        tools: Vec<ToolDescriptor>,
        llm: LlmSettings,
    },
    /// A channel event the agent observes.
    Event { event: ChannelEvent },
    /// Transport-level error before close.
    Error { message: String },
}

/// Agent → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Answer an open user-input request.
    UserInputResponse {
        request_id: String,
        value: serde_json::Value,
    },
    /// Cancel a task this agent can see.
    CancelTask { task_id: String, reason: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
