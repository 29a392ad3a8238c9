use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming chat-completion client.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}
