// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Administrative operations: channels, channel keys, agent registration,
//! and MCP server registration. Authentication (the admin token) lives at
//! the transport layer; everything here assumes an already-authorized
//! caller.

use std::sync::Arc;

use tracing::info;

use mxf_mcp::{McpAdapter, McpServerDescriptor};

use crate::{
    channel::{AgentRecord, ChannelSpec},
    hub::ChannelHub,
    keys::{IssuedKey, KeyRecord, KeyStore},
    HubError,
};

pub struct AdminSurface {
    hub: Arc<ChannelHub>,
    keys: Arc<KeyStore>,
    adapter: Arc<McpAdapter>,
}

impl AdminSurface {
    pub fn new(hub: Arc<ChannelHub>, keys: Arc<KeyStore>, adapter: Arc<McpAdapter>) -> Self {
        Self { hub, keys, adapter }
    }

    /// Create a channel and start its declared MCP servers.
    pub async fn create_channel(&self, id: &str, spec: ChannelSpec) -> Result<(), HubError> {
        let servers = spec.mcp_servers.clone();
        self.hub.create_channel(id, spec).await?;
        for descriptor in servers {
            self.adapter.register(id, descriptor).await;
        }
        Ok(())
    }

    /// Delete a channel: tears down its tool servers and revokes nothing —
    /// keys for a deleted channel are purged outright.
    pub async fn delete_channel(&self, id: &str) -> Result<(), HubError> {
        let servers = self
            .hub
            .channel(id)
            .map(|c| c.mcp_servers)
            .unwrap_or_default();
        self.hub.delete_channel(id).await?;
        for descriptor in servers {
            self.adapter.unregister(id, &descriptor.server_id).await;
        }
        self.keys.purge_channel(id);
        Ok(())
    }

    pub async fn register_agent(&self, record: AgentRecord) -> Result<(), HubError> {
        self.hub.register_agent(record).await
    }

    /// Issue a connection key. The secret in the return value is shown once
    /// and never stored.
    pub fn issue_key(&self, channel_id: &str) -> Result<IssuedKey, HubError> {
        if self.hub.channel(channel_id).is_none() {
            return Err(HubError::ChannelNotFound(channel_id.to_string()));
        }
        let key = self.keys.issue(channel_id);
        info!(channel = channel_id, key = %key.key_id, "channel key issued");
        Ok(key)
    }

    pub fn list_keys(&self, channel_id: &str) -> Vec<KeyRecord> {
        self.keys.list(channel_id)
    }

    pub fn revoke_key(&self, key_id: &str) -> Result<(), HubError> {
        self.keys.revoke(key_id)
    }

    /// Register a channel-scoped MCP server. Idempotent on
    /// `(channel_id, descriptor.server_id)`.
    pub async fn register_mcp_server(
        &self,
        channel_id: &str,
        descriptor: McpServerDescriptor,
    ) -> Result<(), HubError> {
        if self.hub.channel(channel_id).is_none() {
            return Err(HubError::ChannelNotFound(channel_id.to_string()));
        }
        self.adapter.register(channel_id, descriptor).await;
        Ok(())
    }

    pub async fn unregister_mcp_server(
        &self,
        channel_id: &str,
        server_id: &str,
    ) -> Result<(), HubError> {
        self.adapter.unregister(channel_id, server_id).await;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
