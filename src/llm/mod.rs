//! LLM integration.
//!
//! Supports:
//! - **OpenAI**: direct API access via rig-core
//! - **Anthropic**: direct API access via rig-core
//!
//! `RigAdapter` bridges rig's `CompletionModel` to our `LlmProvider` trait
//! so the draft pipeline never sees rig types.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

/// Everything needed to build a provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::OpenAi => create_openai_provider(config),
        LlmBackend::Anthropic => create_anthropic_provider(config),
    }
}

fn client_error(backend: LlmBackend, e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: backend.as_str().to_string(),
        reason: format!("Failed to create client: {e}"),
    }
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret())
            .map_err(|e| client_error(LlmBackend::OpenAi, e))?;

    let model = client.completion_model(&config.model);
    tracing::info!(backend = "openai", model = %config.model, "LLM provider ready");
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret())
            .map_err(|e| client_error(LlmBackend::Anthropic, e))?;

    let model = client.completion_model(&config.model);
    tracing::info!(backend = "anthropic", model = %config.model, "LLM provider ready");
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}
