pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use redraft_core::config::{AppConfig, ModelConfig, RetryConfig};
use redraft_core::error::Result;
use redraft_core::traits::LlmClient;
use redraft_core::types::{ChatMessage, StopReason, StreamDelta};

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// OpenRouter, OpenAI, Ollama, and every other supported provider speak the
/// OpenAI chat-completions protocol.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    debug!(provider = %config.provider, model = %config.model_id, "Creating LLM client");
    Box::new(OpenAiClient::new())
}

/// Build the client chain for an app config: primary model, wrapped with
/// retries and fallbacks when either is configured.
pub fn client_from_config(config: &AppConfig) -> Arc<dyn LlmClient> {
    let primary = create_client(&config.model);
    if config.fallback_models.is_empty() && config.model.retry.is_none() {
        return Arc::from(primary);
    }

    let retry_config = config.model.retry.clone().unwrap_or_else(RetryConfig::default);
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|mc| (mc.clone(), create_client(mc)))
        .collect();
    Arc::new(RetryingClient::new(primary, fallbacks, retry_config))
}

/// Send a chat request and collect the streamed text into one string.
pub async fn complete(
    llm: &dyn LlmClient,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let mut stream = llm.chat_stream(config, messages).await?;
    let mut response = String::new();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(text) => response.push_str(&text),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => debug!(input_tokens, output_tokens, "LLM usage"),
            StreamDelta::Stop(StopReason::MaxTokens) => {
                warn!(model = %config.model_id, "Response truncated at max_tokens")
            }
            StreamDelta::Stop(_) => {}
        }
    }
    Ok(response)
}
