// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Central registry of callable tools.
//!
//! Internal tools are registered once at process start. MCP-backed tools are
//! registered and withdrawn at runtime as their servers announce manifests,
//! scoped to the channel that owns the server. Every lookup is filtered
//! through the caller's [`ToolGrants`] — the intersection of the channel
//! whitelist and the agent whitelist.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::{ErrorKind, Tool, ToolCall, ToolContext, ToolDescriptor, ToolOrigin, ToolReturn};

/// Tool visibility for one agent: `channel ∩ agent` whitelists.
///
/// A `None` whitelist means the admin declined to restrict that side; the
/// intersection then degenerates to the other side (or to "everything").
#[derive(Debug, Clone, Default)]
pub struct ToolGrants {
    pub channel_allowed: Option<HashSet<String>>,
    pub agent_allowed: Option<HashSet<String>>,
}

impl ToolGrants {
    /// No restriction on either side.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn permits(&self, name: &str) -> bool {
        let channel_ok = self
            .channel_allowed
            .as_ref()
            .map(|s| s.contains(name))
            .unwrap_or(true);
        let agent_ok = self
            .agent_allowed
            .as_ref()
            .map(|s| s.contains(name))
            .unwrap_or(true);
        channel_ok && agent_ok
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    origin: ToolOrigin,
    /// Owning channel for `ChannelMcp` tools; `None` for internal tools.
    channel: Option<String>,
    /// MCP server id for `ChannelMcp` tools.
    provider: Option<String>,
}

impl RegisteredTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.tool.name().to_string(),
            description: self.tool.description().to_string(),
            parameters: self.tool.parameters_schema(),
            origin: self.origin,
            provider: self.provider.clone(),
            idempotent: self.tool.idempotent(),
        }
    }

    fn visible_in(&self, channel_id: &str) -> bool {
        match &self.channel {
            None => true,
            Some(c) => c == channel_id,
        }
    }
}

/// Registry of all callable tools, internal and MCP-proxied.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register an internal tool. Last registration under a name wins.
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().unwrap().insert(
            name,
            RegisteredTool {
                tool,
                origin: ToolOrigin::Internal,
                channel: None,
                provider: None,
            },
        );
    }

    /// Register a channel-scoped MCP-proxied tool.
    pub fn register_mcp(
        &self,
        channel_id: impl Into<String>,
        server_id: impl Into<String>,
        tool: Arc<dyn Tool>,
    ) {
        let name = tool.name().to_string();
        self.tools.write().unwrap().insert(
            name,
            RegisteredTool {
                tool,
                origin: ToolOrigin::ChannelMcp,
                channel: Some(channel_id.into()),
                provider: Some(server_id.into()),
            },
        );
    }

    /// Withdraw every tool announced by `(channel_id, server_id)`.
    /// Called before re-registering a refreshed manifest.
    pub fn withdraw_mcp(&self, channel_id: &str, server_id: &str) {
        self.tools.write().unwrap().retain(|_, t| {
            !(t.channel.as_deref() == Some(channel_id)
                && t.provider.as_deref() == Some(server_id))
        });
    }

    /// Descriptors visible to an agent: scoped to its channel and filtered
    /// through its grants, sorted by name for deterministic prompts.
    pub fn list_for(&self, channel_id: &str, grants: &ToolGrants) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().unwrap();
        let mut out: Vec<ToolDescriptor> = tools
            .values()
            .filter(|t| t.visible_in(channel_id) && grants.permits(t.tool.name()))
            .map(|t| t.descriptor())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Rank visible tools by token overlap between `intent` and each tool's
    /// name and description. Stable order: score descending, then name.
    pub fn recommend(
        &self,
        intent: &str,
        channel_id: &str,
        grants: &ToolGrants,
    ) -> Vec<ToolDescriptor> {
        let intent_tokens: HashSet<String> = tokenize(intent);
        let mut scored: Vec<(usize, ToolDescriptor)> = self
            .list_for(channel_id, grants)
            .into_iter()
            .filter_map(|d| {
                let mut tool_tokens = tokenize(&d.name);
                tool_tokens.extend(tokenize(&d.description));
                let score = intent_tokens.intersection(&tool_tokens).count();
                (score > 0).then_some((score, d))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.into_iter().map(|(_, d)| d).collect()
    }

    /// Capability flags for dispatch decisions, `None` when unregistered.
    pub fn flags(&self, name: &str) -> Option<ToolFlags> {
        let tools = self.tools.read().unwrap();
        tools.get(name).map(|t| ToolFlags {
            terminal: t.tool.terminal(),
            safe_parallel: t.tool.safe_parallel(),
            orchestration: t.tool.orchestration(),
        })
    }

    /// Validate, access-check, and execute one tool call.
    pub async fn invoke(
        &self,
        call: &ToolCall,
        grants: &ToolGrants,
        ctx: &ToolContext,
    ) -> ToolReturn {
        let tool = {
            let tools = self.tools.read().unwrap();
            match tools.get(&call.name) {
                Some(t) if t.visible_in(&ctx.channel_id) => Arc::clone(&t.tool),
                // A tool scoped to another channel is indistinguishable from
                // an unregistered one.
                _ => {
                    return ToolReturn::err(
                        &call.id,
                        ErrorKind::UnknownTool,
                        format!("unknown tool: {}", call.name),
                    )
                }
            }
        };

        if !grants.permits(&call.name) {
            return ToolReturn::err(
                &call.id,
                ErrorKind::NotPermitted,
                format!("tool not permitted for this agent: {}", call.name),
            );
        }

        if let Err(detail) = validate_args(&tool.parameters_schema(), &call.args) {
            return ToolReturn::err(&call.id, ErrorKind::InvalidArgs, detail);
        }

        debug!(tool = %call.name, agent = %ctx.agent_id, "tool invoke");
        tool.execute(call, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability flags the executor consults before dispatching.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolFlags {
    pub terminal: bool,
    pub safe_parallel: bool,
    pub orchestration: bool,
}

/// Check `args` against the declared schema: must be an object, and every
/// property listed in `required` must be present.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = match args.as_object() {
        Some(o) => o,
        None => return Err("arguments must be a JSON object".into()),
    };
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(format!("missing required argument: {field}"));
            }
        }
    }
    Ok(())
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// Minimal no-op tool for registry tests.
    struct EchoTool {
        name: &'static str,
        description: &'static str,
    }

    impl EchoTool {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                description: "echoes its input",
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            self.description
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolReturn {
            ToolReturn::ok(&call.id, format!("echo:{}", call.args["text"]))
        }
    }

    fn ctx(channel: &str) -> ToolContext {
        ToolContext {
            agent_id: "a1".into(),
            channel_id: channel.into(),
            task_id: None,
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            args,
        }
    }

    fn grants_for(names: &[&str]) -> ToolGrants {
        let set: HashSet<String> = names.iter().map(|s| s.to_string()).collect();
        ToolGrants {
            channel_allowed: Some(set.clone()),
            agent_allowed: Some(set),
        }
    }

    #[tokio::test]
    async fn invoke_known_tool_succeeds() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let out = reg
            .invoke(
                &call("echo", json!({"text": "hi"})),
                &ToolGrants::unrestricted(),
                &ctx("c1"),
            )
            .await;
        assert!(out.ok);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn invoke_unknown_tool_fails() {
        let reg = ToolRegistry::new();
        let out = reg
            .invoke(
                &call("missing", json!({})),
                &ToolGrants::unrestricted(),
                &ctx("c1"),
            )
            .await;
        assert!(!out.ok);
        assert_eq!(out.kind, Some(ErrorKind::UnknownTool));
    }

    #[tokio::test]
    async fn invoke_denied_by_grants() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let out = reg
            .invoke(
                &call("echo", json!({"text": "hi"})),
                &grants_for(&["other_tool"]),
                &ctx("c1"),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::NotPermitted));
    }

    #[tokio::test]
    async fn invoke_rejects_missing_required_arg() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let out = reg
            .invoke(
                &call("echo", json!({})),
                &ToolGrants::unrestricted(),
                &ctx("c1"),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgs));
        assert!(out.content.contains("text"));
    }

    #[tokio::test]
    async fn invoke_rejects_non_object_args() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let out = reg
            .invoke(
                &call("echo", json!("just a string")),
                &ToolGrants::unrestricted(),
                &ctx("c1"),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::InvalidArgs));
    }

    #[test]
    fn grants_intersection_applies_both_sides() {
        let g = ToolGrants {
            channel_allowed: Some(["a", "b"].iter().map(|s| s.to_string()).collect()),
            agent_allowed: Some(["b", "c"].iter().map(|s| s.to_string()).collect()),
        };
        assert!(!g.permits("a"));
        assert!(g.permits("b"));
        assert!(!g.permits("c"));
    }

    #[test]
    fn unrestricted_grants_permit_everything() {
        assert!(ToolGrants::unrestricted().permits("anything"));
    }

    #[test]
    fn list_for_is_sorted_and_filtered() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("zeta"));
        reg.register(EchoTool::named("alpha"));
        reg.register(EchoTool::named("hidden"));
        let grants = grants_for(&["zeta", "alpha"]);
        let names: Vec<String> = reg
            .list_for("c1", &grants)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn mcp_tool_is_scoped_to_its_channel() {
        let reg = ToolRegistry::new();
        reg.register_mcp("c1", "srv", Arc::new(EchoTool::named("remote")));

        // Visible and callable in its own channel.
        assert_eq!(reg.list_for("c1", &ToolGrants::unrestricted()).len(), 1);
        // Invisible elsewhere.
        assert!(reg.list_for("c2", &ToolGrants::unrestricted()).is_empty());
        let out = reg
            .invoke(
                &call("remote", json!({"text": "x"})),
                &ToolGrants::unrestricted(),
                &ctx("c2"),
            )
            .await;
        assert_eq!(out.kind, Some(ErrorKind::UnknownTool));
    }

    #[test]
    fn withdraw_mcp_removes_only_that_server() {
        let reg = ToolRegistry::new();
        reg.register_mcp("c1", "srv1", Arc::new(EchoTool::named("one")));
        reg.register_mcp("c1", "srv2", Arc::new(EchoTool::named("two")));
        reg.withdraw_mcp("c1", "srv1");
        let names: Vec<String> = reg
            .list_for("c1", &ToolGrants::unrestricted())
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["two"]);
    }

    #[test]
    fn recommend_ranks_by_overlap() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool {
            name: "game_makeMove",
            description: "make a move on the game board",
        });
        reg.register(EchoTool {
            name: "messaging_send",
            description: "send a message to another agent",
        });
        let ranked = reg.recommend(
            "how do I make a move in the game",
            "c1",
            &ToolGrants::unrestricted(),
        );
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].name, "game_makeMove");
    }

    #[test]
    fn recommend_returns_empty_for_unrelated_intent() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let ranked = reg.recommend("quantum chromodynamics", "c1", &ToolGrants::unrestricted());
        assert!(ranked.is_empty());
    }

    #[test]
    fn flags_default_false() {
        let reg = ToolRegistry::new();
        reg.register(EchoTool::named("echo"));
        let flags = reg.flags("echo").unwrap();
        assert!(!flags.terminal);
        assert!(!flags.safe_parallel);
        assert!(reg.flags("missing").is_none());
    }
}
