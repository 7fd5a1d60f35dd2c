// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn tool server: {0}")]
    Spawn(#[from] std::io::Error),

    /// The server process is not running; calls fail fast while the
    /// supervisor backs off.
    #[error("tool server is down")]
    ServerDown,

    #[error("tool server request timed out")]
    Timeout,

    /// The server answered with a JSON-RPC error object.
    #[error("tool server error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The server wrote something that is not a valid response.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
