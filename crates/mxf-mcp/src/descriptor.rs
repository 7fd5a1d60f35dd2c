// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}
fn default_keep_alive() -> u64 {
    10
}

/// Launch description of one external tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    /// Stable id, unique within the owning channel.
    pub server_id: String,
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start when the channel registers the descriptor (default) rather than
    /// on first tool call.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Relaunch with backoff when the process exits unexpectedly.
    #[serde(default = "default_true")]
    pub restart_on_crash: bool,
    /// Minutes the server outlives the last online agent of its channel.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_minutes: u64,
}

impl McpServerDescriptor {
    pub fn new(server_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            auto_start: true,
            restart_on_crash: true,
            keep_alive_minutes: default_keep_alive(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
