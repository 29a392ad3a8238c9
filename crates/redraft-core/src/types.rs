use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// One item of a streamed chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Incremental text.
    TextDelta(String),
    /// Token accounting, usually sent once at the end.
    Usage { input_tokens: u64, output_tokens: u64 },
    /// The model finished.
    Stop(StopReason),
}

/// Events published while a workflow run progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run started at the graph's entry node.
    RunStarted { run_id: RunId, entry: String },
    /// A node finished and its update was merged.
    NodeComplete {
        run_id: RunId,
        step: usize,
        node: String,
        /// The partial update the node produced.
        update: serde_json::Value,
        elapsed_ms: u64,
    },
    /// The run reached a terminal outcome.
    RunComplete {
        run_id: RunId,
        steps: usize,
        elapsed_ms: u64,
    },
    /// The run aborted.
    RunError { run_id: RunId, error: String },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeComplete { run_id, .. }
            | Self::RunComplete { run_id, .. }
            | Self::RunError { run_id, .. } => run_id,
        }
    }
}
