// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! External tool servers for mxf channels.
//!
//! Each channel may declare MCP tool-server descriptors. The adapter spawns
//! one child process per `(channel, server)` pair, speaks line-delimited
//! JSON-RPC over its stdio (`initialize`, `tools/list`, `tools/call`), and
//! registers every announced tool into the shared [`mxf_tools::ToolRegistry`]
//! as a channel-scoped proxy.
//!
//! Supervision: a crashed server with `restart_on_crash` is relaunched with
//! exponential backoff (1 s doubling to 60 s, reset after 30 s of uptime).
//! While a server is down its tools fail fast with `provider_unavailable`.
//! When the last agent of a channel goes offline the server is kept alive
//! for `keep_alive_minutes`, then terminated (SIGTERM, SIGKILL after 5 s).

mod adapter;
mod client;
mod descriptor;
mod error;
mod protocol;
mod proxy;

pub use adapter::{McpAdapter, McpEvent};
pub use client::{McpClient, McpToolInfo};
pub use descriptor::McpServerDescriptor;
pub use error::McpError;
pub use proxy::McpProxyTool;
