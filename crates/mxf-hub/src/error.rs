// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel already exists: {0}")]
    ChannelExists(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent already exists: {0}")]
    AgentExists(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid task spec: {0}")]
    InvalidTaskSpec(String),

    #[error("task is already terminal: {0}")]
    TaskTerminal(String),

    #[error("agent is not online: {0}")]
    AgentOffline(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("user input request not found: {0}")]
    RequestNotFound(String),

    #[error("persistence error: {0}")]
    Store(String),
}
