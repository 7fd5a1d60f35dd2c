// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire frames for the line-delimited JSON-RPC stream to a tool server.
//!
//! One JSON object per line in each direction; logs go to the child's
//! stderr. Correlation is by the numeric `id` the adapter assigns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::McpError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A request frame. `id` correlates the eventual response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to a single line (no interior newlines).
    pub fn to_line(&self) -> Result<String, McpError> {
        serde_json::to_string(self).map_err(|e| McpError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// A response frame from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    /// Parse one stdout line. Lines that are not response frames (notifications,
    /// junk) yield `None` so the reader can skip them.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str::<RpcResponse>(trimmed).ok()
    }

    /// Unwrap into the result value or the server's error.
    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| McpError::Protocol("response carries neither result nor error".into()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_serializes_to_single_line() {
        let r = RpcRequest::new(7, "tools/call", json!({"name": "t", "arguments": {}}));
        let line = r.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"id\":7"));
        assert!(line.contains("tools/call"));
    }

    #[test]
    fn request_omits_null_params() {
        let r = RpcRequest::new(1, "tools/list", Value::Null);
        let line = r.to_line().unwrap();
        assert!(!line.contains("params"));
    }

    #[test]
    fn response_parses_result() {
        let resp = RpcResponse::parse_line(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#)
            .unwrap();
        assert_eq!(resp.id, 3);
        assert_eq!(resp.into_result().unwrap()["ok"], true);
    }

    #[test]
    fn response_parses_error() {
        let resp = RpcResponse::parse_line(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
    }

    #[test]
    fn junk_lines_are_skipped() {
        assert!(RpcResponse::parse_line("").is_none());
        assert!(RpcResponse::parse_line("starting up...").is_none());
        // A request echoed back has an id but no result/error; it still parses
        // as a frame and is rejected later by into_result.
        assert!(RpcResponse::parse_line("{\"nonsense\":true}").is_none());
    }
}
