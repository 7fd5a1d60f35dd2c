// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod gateway;
mod mock;
mod openai;
mod parse;
mod provider;
mod types;

pub use error::LlmError;
pub use gateway::{GatewayRequest, LlmGateway};
pub use mock::{MockProvider, ScriptedProvider};
pub use openai::OpenAiCompatProvider;
pub use parse::parse_response;
pub use provider::ModelProvider;
pub use types::*;

use mxf_config::ProviderConfig;

/// Construct a boxed [`ModelProvider`] from a provider configuration entry.
///
/// `kind` selects the wire format: `"openai"` covers every endpoint that
/// speaks the `/chat/completions` format (hosted or local); `"mock"` is the
/// deterministic test provider.
pub fn from_config(name: &str, cfg: &ProviderConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.kind.as_str() {
        "openai" => Ok(Box::new(OpenAiCompatProvider::new(
            name.to_string(),
            cfg.resolve_api_key(),
            cfg.base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
        ))),
        "mock" => Ok(Box::new(MockProvider::default())),
        other => anyhow::bail!("unknown provider kind: {other}"),
    }
}
