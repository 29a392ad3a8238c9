//! Shared fakes for Redraft tests: a scripted LLM client and an event recorder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use redraft_core::config::ModelConfig;
use redraft_core::error::Result;
use redraft_core::event::EventBus;
use redraft_core::traits::LlmClient;
use redraft_core::types::{ChatMessage, StopReason, StreamDelta, WorkflowEvent};

type Responder = dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync;

/// A model config pointing nowhere, for tests that never hit the network.
pub fn test_model_config() -> ModelConfig {
    ModelConfig {
        provider: "test".to_string(),
        model_id: "scripted".to_string(),
        api_key: None,
        base_url: None,
        max_tokens: 256,
        temperature: 0.0,
        retry: None,
        extra_headers: HashMap::new(),
    }
}

/// Every request a [`ScriptedLlm`] received, in order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Vec<ChatMessage>>>>);

impl CallLog {
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.0.lock().unwrap().clone()
    }

    /// Number of requests with any message containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|msgs| msgs.iter().any(|m| m.content.contains(needle)))
            .count()
    }

    fn push(&self, messages: Vec<ChatMessage>) {
        self.0.lock().unwrap().push(messages);
    }
}

/// LLM client whose replies come from a closure over the request messages.
pub struct ScriptedLlm {
    responder: Box<Responder>,
    log: CallLog,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new(
        responder: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            log: CallLog::default(),
            delay: None,
        }
    }

    /// Always reply with the same text.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        Box::pin(async move {
            self.log.push(messages.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let text = (self.responder)(&messages)?;

            // Split the reply so callers exercise delta accumulation.
            let mid = text
                .char_indices()
                .nth(text.chars().count() / 2)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let (head, tail) = text.split_at(mid);
            let mut deltas = Vec::new();
            for part in [head, tail] {
                if !part.is_empty() {
                    deltas.push(Ok(StreamDelta::TextDelta(part.to_string())));
                }
            }
            deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));

            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// Collects everything published on an [`EventBus`] after it was attached.
pub struct EventRecorder {
    rx: broadcast::Receiver<WorkflowEvent>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe(),
        }
    }

    /// All events received so far.
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Node names of the `NodeComplete` events received so far.
    pub fn node_trace(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                WorkflowEvent::NodeComplete { node, .. } => Some(node),
                _ => None,
            })
            .collect()
    }
}
