// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use mxf_tools::ToolCall;

use crate::SessionOutcome;

/// Events emitted by a [`crate::TaskExecutor`] while advancing a session.
/// The hub bridges these onto the channel event fabric.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A reasoning block arrived from the model.
    LlmReasoning { agent_id: String, content: String },
    /// A text response arrived from the model.
    LlmResponse { agent_id: String, text: String },
    /// A tool call is about to be dispatched.
    ToolCallStarted { agent_id: String, call: ToolCall },
    /// A tool call resolved.
    ToolCallFinished {
        agent_id: String,
        call_id: String,
        tool_name: String,
        ok: bool,
        content: String,
    },
    /// The session reached a terminal state. Emitted exactly once per
    /// session, as the last event of the session.
    SessionEnded {
        agent_id: String,
        task_id: String,
        outcome: SessionOutcome,
    },
}
