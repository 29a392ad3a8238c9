use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use redraft_core::config::{ModelConfig, OPENROUTER_API_URL};
use redraft_core::error::{RedraftError, Result};
use redraft_core::traits::LlmClient;
use redraft_core::types::*;

use crate::streaming::{SseEvent, SseStream};

/// OpenAI-compatible client. Works with OpenRouter, OpenAI, Ollama, vLLM, Groq, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| OaiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content,
        })
        .collect()
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let parsed: std::result::Result<StreamChunk, _> = serde_json::from_str(&event.data);
    match parsed {
        Ok(chunk) => {
            let mut deltas = Vec::new();

            if let Some(usage) = chunk.usage {
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }));
            }

            let choice = match chunk.choices.into_iter().next() {
                Some(c) => c,
                None => return deltas,
            };

            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    deltas.push(Ok(StreamDelta::TextDelta(text)));
                }
            }

            if let Some(reason) = choice.finish_reason {
                let stop = match reason.as_str() {
                    "length" => StopReason::MaxTokens,
                    "stop_sequence" => StopReason::StopSequence,
                    _ => StopReason::EndTurn,
                };
                deltas.push(Ok(StreamDelta::Stop(stop)));
            }

            deltas
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            vec![]
        }
    }
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENROUTER_API_URL);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                stream: true,
            };

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| RedraftError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(RedraftError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let byte_stream = response.bytes_stream();
            let sse_stream = SseStream::new(byte_stream);

            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
