// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeToggles,
    /// Named LLM provider configurations.
    ///
    /// Agents reference these by name in their `LlmSettings::provider` field.
    ///
    /// ```yaml
    /// providers:
    ///   openai:
    ///     kind: openai
    ///     base_url: https://api.openai.com/v1
    ///     api_key_env: OPENAI_API_KEY
    ///   local:
    ///     kind: openai
    ///     base_url: http://localhost:11434/v1
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

// ── Server ────────────────────────────────────────────────────────────────────

fn default_bind() -> String {
    "127.0.0.1:4800".to_string()
}
fn default_agent_port() -> u16 {
    4801
}

/// Listener and credential configuration for the node binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` the admin HTTP API listens on. Default: loopback only.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port for agent WebSocket connections (same host as `bind`).
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Environment variable holding the admin bearer token.
    /// The raw token is read at startup and never written to disk.
    #[serde(default = "default_admin_token_env")]
    pub admin_token_env: String,

    /// Default model applied to agents that do not specify one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Working directory for spawned MCP tool-server subprocesses.
    /// `None` inherits the server's current directory.
    pub mcp_workdir: Option<String>,
}

fn default_admin_token_env() -> String {
    "MXF_ADMIN_TOKEN".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            agent_port: default_agent_port(),
            admin_token_env: default_admin_token_env(),
            default_model: default_model(),
            mcp_workdir: None,
        }
    }
}

// ── Providers ─────────────────────────────────────────────────────────────────

/// One LLM provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire format of the endpoint. Currently "openai" (chat-completions
    /// compatible) or "mock".
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Base URL override. Useful for local servers and proxies.
    pub base_url: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Concurrent in-flight requests allowed against this provider.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Whole-call timeout in milliseconds.
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider_kind() -> String {
    "openai".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_llm_timeout_ms() -> u64 {
    120_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: None,
            api_key_env: None,
            api_key: None,
            concurrency: default_concurrency(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key: explicit value wins, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

// ── Per-agent LLM settings ────────────────────────────────────────────────────

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    10
}

/// LLM parameters attached to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider name — a key in [`Config::providers`].
    pub provider: String,
    /// Model identifier forwarded to the provider API.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request reasoning/thinking output where the provider supports it.
    #[serde(default)]
    pub reasoning: bool,
    /// Iteration cap per task session. Raised for interactive scenarios
    /// (hard ceiling 20, enforced by the executor).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            reasoning: false,
            max_iterations: default_max_iterations(),
        }
    }
}

// ── Runtime toggles ───────────────────────────────────────────────────────────

fn default_trip_count() -> u32 {
    3
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}

/// Tool invocation timeouts: one default plus per-tool overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTimeouts {
    #[serde(default = "default_tool_timeout_ms")]
    pub default_ms: u64,
    #[serde(default)]
    pub by_tool: HashMap<String, u64>,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            default_ms: default_tool_timeout_ms(),
            by_tool: HashMap::new(),
        }
    }
}

impl ToolTimeouts {
    pub fn for_tool(&self, name: &str) -> u64 {
        self.by_tool.get(name).copied().unwrap_or(self.default_ms)
    }
}

/// Per-channel overrides of the global toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelOverrides {
    /// Overrides the global `system_llm` flag for one channel.
    pub system_llm: Option<bool>,
    /// Overrides `max_iterations_default` for agents in this channel.
    pub max_iterations: Option<u32>,
}

/// Behavioral knobs of the execution substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeToggles {
    /// Global default for channel-level LLM orchestration operations.
    /// When a channel disables this, orchestration-class tool calls are
    /// refused by the executor.
    #[serde(default = "default_true")]
    pub channel_system_llm: bool,
    /// Per-channel overrides, keyed by channel id.
    #[serde(default)]
    pub per_channel_overrides: HashMap<String, ChannelOverrides>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations_default: u32,
    #[serde(default)]
    pub tool_timeouts: ToolTimeouts,
    /// Identical `(tool, args)` dispatches tolerated before a session is
    /// ended as stuck.
    #[serde(default = "default_trip_count")]
    pub circuit_breaker_trip_count: u32,
}

impl Default for RuntimeToggles {
    fn default() -> Self {
        Self {
            channel_system_llm: true,
            per_channel_overrides: HashMap::new(),
            max_iterations_default: default_max_iterations(),
            tool_timeouts: ToolTimeouts::default(),
            circuit_breaker_trip_count: default_trip_count(),
        }
    }
}

impl RuntimeToggles {
    /// Effective system-LLM flag for `channel_id`.
    pub fn system_llm_for(&self, channel_id: &str) -> bool {
        self.per_channel_overrides
            .get(channel_id)
            .and_then(|o| o.system_llm)
            .unwrap_or(self.channel_system_llm)
    }

    /// Effective iteration cap for `channel_id`.
    pub fn max_iterations_for(&self, channel_id: &str) -> u32 {
        self.per_channel_overrides
            .get(channel_id)
            .and_then(|o| o.max_iterations)
            .unwrap_or(self.max_iterations_default)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
