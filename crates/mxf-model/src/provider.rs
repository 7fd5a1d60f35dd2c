// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::{Completion, CompletionRequest, LlmError};

/// A chat-completion backend.
///
/// Implementations are wire-format drivers ([`crate::OpenAiCompatProvider`])
/// or test doubles ([`crate::MockProvider`], [`crate::ScriptedProvider`]).
/// The gateway owns one boxed provider per configured endpoint and serializes
/// access through its queue, so implementations only need `&self`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider name for logs and queue keying.
    fn name(&self) -> &str;

    /// Send one completion request and return the raw completion.
    ///
    /// Cancellation is handled by the gateway (the future is dropped at the
    /// next await point); drivers must not spawn detached work.
    async fn complete(&self, req: CompletionRequest) -> Result<Completion, LlmError>;
}
