// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mxf_config::LlmSettings;
use mxf_mcp::McpServerDescriptor;

/// Connection lifecycle of an agent. Agents that are not `Online` receive
/// neither tool results nor LLM responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Offline,
    Connecting,
    Online,
    Disconnecting,
}

/// Admin-supplied channel creation spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel-level LLM orchestration operations allowed.
    #[serde(default = "default_true")]
    pub system_llm_enabled: bool,
    /// Tool whitelist applied to every member. `None` leaves members bound
    /// only by their own whitelists.
    #[serde(default)]
    pub allowed_tools: Option<HashSet<String>>,
    /// External tool servers owned by this channel.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerDescriptor>,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            system_llm_enabled: true,
            allowed_tools: None,
            mcp_servers: Vec::new(),
        }
    }
}

/// A named collaboration scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    /// Ordered member set; insertion order is join order.
    pub members: Vec<String>,
    pub system_llm_enabled: bool,
    pub allowed_tools: Option<HashSet<String>>,
    pub mcp_servers: Vec<McpServerDescriptor>,
    pub created_at: DateTime<Utc>,
}

impl ChannelRecord {
    pub fn new(id: impl Into<String>, spec: ChannelSpec) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
            system_llm_enabled: spec.system_llm_enabled,
            allowed_tools: spec.allowed_tools,
            mcp_servers: spec.mcp_servers,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m == agent_id)
    }
}

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub channel_id: String,
    /// Channel key the agent authenticates with.
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub behavior_prompt: String,
    /// Intersected with the channel whitelist at lookup time.
    #[serde(default)]
    pub allowed_tools: Option<HashSet<String>>,
    #[serde(default)]
    pub circuit_breaker_exempt_tools: HashSet<String>,
    #[serde(default)]
    pub connection: ConnectionState,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            channel_id: channel_id.into(),
            key_id: None,
            llm: LlmSettings::default(),
            behavior_prompt: String::new(),
            allowed_tools: None,
            circuit_breaker_exempt_tools: HashSet::new(),
            connection: ConnectionState::Offline,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connection == ConnectionState::Online
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
