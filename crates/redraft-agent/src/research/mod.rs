//! The deep-research workflow: plan, research, write, then review and revise
//! until the reviewer approves or the revision budget runs out.
//!
//! ```text
//! plan -> research -> write -> review --approved--> END
//!                               |    ^
//!                        revise |    |
//!                               v    |
//!                               revise
//! ```

pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod stages;

use std::sync::Arc;

use redraft_core::config::{ModelConfig, StageTemperatures};
use redraft_core::error::{RedraftError, Result};
use redraft_core::traits::LlmClient;

use crate::graph::{Graph, GraphBuilder, Node, StateSchema, END};

pub use pipeline::{ResearchPipeline, ResearchReport, ResearchRequest};
pub use router::{RevisionRouter, APPROVED, REVISE};
pub use stages::{LlmStage, StageKind};

// State fields.
pub const TASK: &str = "task";
pub const PLAN: &str = "plan";
pub const CONTENT: &str = "content";
pub const DRAFT: &str = "draft";
pub const CRITIQUE: &str = "critique";
pub const REVISION_COUNT: &str = "revision_count";
pub const MAX_REVISIONS: &str = "max_revisions";

// Node names.
pub const PLAN_STAGE: &str = "plan";
pub const RESEARCH_STAGE: &str = "research";
pub const WRITE_STAGE: &str = "write";
pub const REVIEW_STAGE: &str = "review";
pub const REVISE_STAGE: &str = "revise";

/// State schema of the research workflow. `content` gathers research notes.
pub fn schema() -> StateSchema {
    StateSchema::new()
        .overwrite(TASK)
        .overwrite(PLAN)
        .accumulate(CONTENT)
        .overwrite(DRAFT)
        .overwrite(CRITIQUE)
        .overwrite(REVISION_COUNT)
        .overwrite(MAX_REVISIONS)
}

fn node_for(stage: LlmStage) -> Node {
    let kind = stage.kind().clone();
    Node::new(kind.name(), Arc::new(stage))
        .with_inputs(kind.reads().iter().copied())
        .with_outputs(kind.writes().iter().copied())
}

/// Wire the five LLM stages and the revision router into a validated graph.
///
/// A blank `approval_marker` is rejected: every critique would contain it.
pub fn build_research_graph(
    llm: Arc<dyn LlmClient>,
    model: &ModelConfig,
    temperatures: &StageTemperatures,
    approval_marker: &str,
) -> Result<Graph> {
    if approval_marker.trim().is_empty() {
        return Err(RedraftError::Config(
            "workflow.approval_marker must not be blank".into(),
        ));
    }

    let stage = |kind: StageKind, temperature: f32| {
        node_for(LlmStage::new(kind, llm.clone(), model.with_temperature(temperature)))
    };

    GraphBuilder::new(schema())
        .add_node(stage(StageKind::Plan, temperatures.planner))
        .add_node(stage(StageKind::Research, temperatures.researcher))
        .add_node(stage(StageKind::Write, temperatures.writer))
        .add_node(stage(
            StageKind::Review {
                marker: approval_marker.to_string(),
            },
            temperatures.reviewer,
        ))
        .add_node(stage(StageKind::Revise, temperatures.reviser))
        .set_entry(PLAN_STAGE)
        .add_edge(PLAN_STAGE, RESEARCH_STAGE)
        .add_edge(RESEARCH_STAGE, WRITE_STAGE)
        .add_edge(WRITE_STAGE, REVIEW_STAGE)
        .add_conditional_edge(
            REVIEW_STAGE,
            Arc::new(RevisionRouter::new(approval_marker)),
            [(APPROVED, END), (REVISE, REVISE_STAGE)],
        )
        .add_edge(REVISE_STAGE, REVIEW_STAGE)
        .build()
}
