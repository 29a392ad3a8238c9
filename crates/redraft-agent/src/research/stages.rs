use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use redraft_core::config::ModelConfig;
use redraft_core::error::{RedraftError, Result};
use redraft_core::traits::LlmClient;
use redraft_core::types::ChatMessage;

use crate::graph::{PartialState, StageHandler, StateView};

use super::{prompts, CONTENT, CRITIQUE, DRAFT, PLAN, REVISION_COUNT, TASK};

/// Which of the five research steps an [`LlmStage`] performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Plan,
    Research,
    Write,
    /// Carries the approval marker the reviewer is told to emit.
    Review { marker: String },
    Revise,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan => super::PLAN_STAGE,
            Self::Research => super::RESEARCH_STAGE,
            Self::Write => super::WRITE_STAGE,
            Self::Review { .. } => super::REVIEW_STAGE,
            Self::Revise => super::REVISE_STAGE,
        }
    }

    /// Fields the stage reads.
    pub fn reads(&self) -> &'static [&'static str] {
        match self {
            Self::Plan => &[TASK],
            Self::Research => &[PLAN],
            Self::Write => &[TASK, CONTENT, REVISION_COUNT],
            Self::Review { .. } => &[DRAFT],
            Self::Revise => &[DRAFT, CRITIQUE, REVISION_COUNT],
        }
    }

    /// Fields the stage writes.
    pub fn writes(&self) -> &'static [&'static str] {
        match self {
            Self::Plan => &[PLAN],
            Self::Research => &[CONTENT],
            Self::Write | Self::Revise => &[DRAFT, REVISION_COUNT],
            Self::Review { .. } => &[CRITIQUE],
        }
    }

    fn messages(&self, view: &StateView) -> Result<Vec<ChatMessage>> {
        let stage = self.name();
        Ok(match self {
            Self::Plan => prompts::planner(view.require_str(stage, TASK)?),
            Self::Research => prompts::researcher(view.require_str(stage, PLAN)?),
            Self::Write => prompts::writer(
                view.require_str(stage, TASK)?,
                &view.get_str_list(CONTENT),
            ),
            Self::Review { marker } => prompts::reviewer(view.require_str(stage, DRAFT)?, marker),
            Self::Revise => prompts::reviser(
                view.require_str(stage, DRAFT)?,
                view.require_str(stage, CRITIQUE)?,
            ),
        })
    }

    fn update(&self, view: &StateView, text: String) -> PartialState {
        match self {
            Self::Plan => PartialState::new().with(PLAN, text),
            Self::Research => PartialState::new().with(CONTENT, text),
            Self::Write | Self::Revise => {
                let count = view.get_u64(REVISION_COUNT).unwrap_or(0);
                PartialState::new()
                    .with(DRAFT, text)
                    .with(REVISION_COUNT, count + 1)
            }
            Self::Review { .. } => PartialState::new().with(CRITIQUE, text),
        }
    }
}

/// A research stage backed by one chat completion.
pub struct LlmStage {
    kind: StageKind,
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmStage {
    /// `config` should already carry the stage's sampling temperature.
    pub fn new(kind: StageKind, llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { kind, llm, config }
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    async fn generate(&self, view: StateView) -> Result<PartialState> {
        let stage = self.kind.name();
        let messages = self.kind.messages(&view)?;

        info!(stage, model = %self.config.model_id, temperature = self.config.temperature, "Generating");
        let text = redraft_llm::complete(self.llm.as_ref(), &self.config, messages)
            .await
            .map_err(|e| match e {
                RedraftError::Generation { .. } => e,
                other => RedraftError::Generation {
                    stage: stage.to_string(),
                    message: other.to_string(),
                },
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(RedraftError::MalformedOutput {
                stage: stage.to_string(),
                message: "model returned no text".into(),
            });
        }
        debug!(stage, chars = text.len(), "Stage output received");

        Ok(self.kind.update(&view, text.to_string()))
    }
}

impl StageHandler for LlmStage {
    fn run(&self, view: StateView) -> BoxFuture<'_, Result<PartialState>> {
        Box::pin(self.generate(view))
    }
}
