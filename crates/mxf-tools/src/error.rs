// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The categorized failure surface of the runtime.
///
/// Tool results carry one of these when `ok = false`; the executor maps the
/// terminal kinds onto session outcomes. The serialized form is the stable
/// wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Arguments failed schema validation. Recovered locally.
    InvalidArgs,
    /// No tool registered under that name. Recovered locally.
    UnknownTool,
    /// The caller is not granted this tool. Recovered locally.
    NotPermitted,
    /// The handler itself failed. Recovered locally, recorded.
    HandlerFailed,
    /// An external tool server or LLM endpoint is down.
    ProviderUnavailable,
    /// The session was cancelled.
    Cancelled,
    /// A per-call timeout elapsed; the session continues.
    Timeout,
    /// The repeat-call guard ended the session.
    CircuitBreakerTripped,
    /// The iteration cap ended the session.
    MaxIterationsExceeded,
    /// Unrecoverable internal failure; fatal for the session.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgs => "invalid_args",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::NotPermitted => "not_permitted",
            ErrorKind::HandlerFailed => "handler_failed",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitBreakerTripped => "circuit_breaker_tripped",
            ErrorKind::MaxIterationsExceeded => "max_iterations_exceeded",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Failure returned by an [`crate::AgentServices`] operation.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerFailed, detail)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::CircuitBreakerTripped).unwrap();
        assert_eq!(s, "\"circuit_breaker_tripped\"");
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(ErrorKind::NotPermitted.to_string(), "not_permitted");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn error_kind_round_trips() {
        for kind in [
            ErrorKind::InvalidArgs,
            ErrorKind::UnknownTool,
            ErrorKind::ProviderUnavailable,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
