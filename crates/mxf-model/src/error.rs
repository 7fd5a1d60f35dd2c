// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failure surfaced by the LLM gateway.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connection reset, DNS, TLS).
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// HTTP error status from the provider. `retryable` is set for 5xx and
    /// 429-with-retry responses.
    #[error("provider error {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// The whole-call timeout elapsed.
    #[error("llm call timed out")]
    Timeout,

    /// The owning executor cancelled the call.
    #[error("llm call cancelled")]
    Cancelled,

    /// The provider returned a body the driver could not interpret.
    #[error("unparseable provider response: {0}")]
    Parse(String),

    /// No provider is registered under the requested name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl LlmError {
    /// Transient failures are retried by the gateway with backoff;
    /// everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Unreachable(_) | LlmError::Timeout => true,
            LlmError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
