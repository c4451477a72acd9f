//! LLM provider factory.
//!
//! Creates LLM clients from configuration: resolves the provider, applies
//! endpoint and timeout settings, and checks required secrets.

use crate::client::LlmClient;
use crate::error::{LlmError, LlmResult};
use crate::providers::{OllamaClient, OpenAiClient};
use crate::types::ProviderType;
use std::sync::Arc;

/// Options for constructing a client.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions<'a> {
    /// Custom endpoint URL
    pub endpoint: Option<&'a str>,

    /// API key (for providers that require it)
    pub api_key: Option<&'a str>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Create an LLM client based on the provider name.
///
/// # Errors
/// Returns `LlmError::Config` if the provider is unknown or a required
/// secret is missing.
pub fn create_client(provider: &str, options: ClientOptions<'_>) -> LlmResult<Arc<dyn LlmClient>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| LlmError::Config(format!("Unknown provider: {}", provider)))?;

    let endpoint = options
        .endpoint
        .unwrap_or_else(|| provider_type.default_endpoint());
    let timeout_secs = if options.timeout_secs == 0 {
        120
    } else {
        options.timeout_secs
    };

    match provider_type {
        ProviderType::Ollama => {
            let client = OllamaClient::with_timeout(endpoint, timeout_secs)?;
            Ok(Arc::new(client))
        }
        ProviderType::OpenAI => {
            let api_key = options
                .api_key
                .ok_or_else(|| LlmError::Config("OpenAI provider requires API key".to_string()))?;
            let client = OpenAiClient::new(endpoint, api_key, timeout_secs)?;
            Ok(Arc::new(client))
        }
    }
}
