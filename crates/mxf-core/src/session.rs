// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use mxf_config::{LlmSettings, ToolTimeouts};
use mxf_tools::ToolGrants;

/// Static identity and policy of one agent, fixed for the lifetime of its
/// executor.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub agent_id: String,
    pub display_name: String,
    pub channel_id: String,
    pub llm: LlmSettings,
    /// Behavior prompt prepended to every session's system block.
    pub behavior_prompt: String,
    pub grants: ToolGrants,
    /// Tools that may repeat identical calls without tripping the stuck
    /// detector (pollers like `get_user_input_response`, `game_getBoard`).
    pub breaker_exempt: HashSet<String>,
    /// When false, orchestration-class tool calls resolve to `not_permitted`.
    pub system_llm_enabled: bool,
    /// Identical dispatches tolerated before the session breaks.
    pub trip_count: u32,
    pub tool_timeouts: ToolTimeouts,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            channel_id: channel_id.into(),
            llm: LlmSettings::default(),
            behavior_prompt: String::new(),
            grants: ToolGrants::unrestricted(),
            breaker_exempt: HashSet::new(),
            system_llm_enabled: true,
            trip_count: 3,
            tool_timeouts: ToolTimeouts::default(),
        }
    }
}

/// The slice of a task an executor needs to run a session.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub task_id: String,
    pub title: String,
    pub description: String,
}

/// How a session ended. The hub maps each outcome onto exactly one terminal
/// task event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The agent called `task_complete`.
    Completed { summary: String, success: bool },
    /// The model replied with text only and never called `task_complete`;
    /// the session is over but the task was not advanced to completion.
    NoCompletion,
    /// Cooperative cancellation. `silent` suppresses the channel broadcast
    /// (orchestrators tearing down between game turns); the terminal
    /// accounting still happens.
    Cancelled { reason: String, silent: bool },
    /// The iteration cap was reached.
    Exhausted,
    /// The circuit breaker tripped on `tool`.
    Broken { tool: String },
    /// Unrecoverable failure (gateway error, internal fault).
    Errored { detail: String },
}

impl SessionOutcome {
    /// Short reason string for TASK_FAILED / TASK_ERROR payloads.
    pub fn reason(&self) -> String {
        match self {
            SessionOutcome::Completed { .. } => "completed".into(),
            SessionOutcome::NoCompletion => "session ended without task_complete".into(),
            SessionOutcome::Cancelled { reason, .. } => reason.clone(),
            SessionOutcome::Exhausted => "max_iterations_exceeded".into(),
            SessionOutcome::Broken { tool } => format!("circuit_breaker_tripped: {tool}"),
            SessionOutcome::Errored { detail } => detail.clone(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
