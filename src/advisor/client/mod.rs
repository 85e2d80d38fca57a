mod claude;
mod gemini;
mod ollama;
mod openai;

use crate::config::{AdvisorConfig, AdvisorProvider};
use crate::error::{KubeSkippyError, Result};
use async_trait::async_trait;
use claude::ClaudeClient;
use gemini::GeminiClient;
use ollama::OllamaClient;
use openai::OpenAIClient;

/// A bare chat-completion call, shared across every provider. The
/// advisor only ever needs one system+user round trip.
#[async_trait]
pub trait AdvisorClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
    fn provider_name(&self) -> &str;
}

/// Builds the configured provider's client. Returns `None` when no
/// provider is configured, meaning the advisor is disabled.
pub fn create_advisor_client(config: &AdvisorConfig) -> Result<Option<Box<dyn AdvisorClient>>> {
    let Some(provider) = config.provider else {
        return Ok(None);
    };

    let model = config.model.clone().unwrap_or_else(|| provider.default_model().to_string());

    let client: Box<dyn AdvisorClient> = match provider {
        AdvisorProvider::Claude => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                KubeSkippyError::ConfigError("advisor.apiKey is required for claude".to_string())
            })?;
            Box::new(ClaudeClient::new(&api_key, &model, config.timeout_seconds)?)
        }
        AdvisorProvider::OpenAI => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                KubeSkippyError::ConfigError("advisor.apiKey is required for openai".to_string())
            })?;
            Box::new(OpenAIClient::new(
                &api_key,
                &model,
                config.base_url.as_deref(),
                config.timeout_seconds,
            )?)
        }
        AdvisorProvider::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                KubeSkippyError::ConfigError("advisor.apiKey is required for gemini".to_string())
            })?;
            Box::new(GeminiClient::new(&api_key, &model, config.timeout_seconds)?)
        }
        AdvisorProvider::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Box::new(OllamaClient::new(&base_url, &model, config.timeout_seconds)?)
        }
    };

    Ok(Some(client))
}

impl AdvisorProvider {
    fn default_model(&self) -> &'static str {
        match self {
            AdvisorProvider::Claude => "claude-3-5-sonnet-latest",
            AdvisorProvider::OpenAI => "gpt-4o-mini",
            AdvisorProvider::Gemini => "gemini-1.5-flash",
            AdvisorProvider::Ollama => "llama3",
        }
    }
}
