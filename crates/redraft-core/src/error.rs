use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedraftError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Stage errors
    #[error("Stage '{stage}' generation failed: {message}")]
    Generation { stage: String, message: String },

    #[error("Stage '{stage}' produced malformed output: {message}")]
    MalformedOutput { stage: String, message: String },

    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: String, timeout_secs: u64 },

    // Routing errors
    #[error("Router at '{node}' failed: {message}")]
    Router { node: String, message: String },

    #[error("Router at '{node}' returned unmapped outcome '{outcome}'")]
    UnknownOutcome { node: String, outcome: String },

    // Run errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded max steps ({0})")]
    StepLimit(usize),

    #[error("Cannot merge field '{field}': {message}")]
    MergeType { field: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RedraftError {
    /// Whether this error means the graph or config is malformed, as opposed
    /// to a failure of one particular run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::ConfigNotFound(_) | Self::UnknownOutcome { .. }
        )
    }

    /// Whether re-running the same request may succeed.
    ///
    /// Timeouts and transport-level generation failures are transient;
    /// malformed output and configuration problems are not.
    pub fn is_retryable_run(&self) -> bool {
        matches!(
            self,
            Self::StageTimeout { .. }
                | Self::Generation { .. }
                | Self::LlmRequest(_)
                | Self::LlmStream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RedraftError>;
