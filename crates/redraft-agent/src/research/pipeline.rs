use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use redraft_core::config::AppConfig;
use redraft_core::error::{RedraftError, Result};
use redraft_core::traits::LlmClient;
use redraft_core::types::RunId;

use crate::graph::{ExecutionResult, GraphExecutor, ProgressObserver, WorkflowState};

use super::{
    build_research_graph, CONTENT, CRITIQUE, DRAFT, MAX_REVISIONS, PLAN, REVISE_STAGE,
    REVISION_COUNT, TASK,
};

/// What the caller wants researched.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub task: String,
    /// Revise-then-review cycles allowed after the first review.
    pub max_revisions: u32,
}

impl ResearchRequest {
    pub fn new(task: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            task: task.into(),
            max_revisions,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.task.trim().is_empty() {
            return Err(RedraftError::InvalidRequest("task must not be empty".into()));
        }
        Ok(())
    }

    /// Node visits a run needs when every review asks for changes: plan,
    /// research, write and the first review, then a revise and a review per
    /// allowed revision.
    pub fn step_budget(&self) -> usize {
        (self.max_revisions as usize)
            .saturating_mul(2)
            .saturating_add(4)
    }

    fn initial_state(&self) -> WorkflowState {
        WorkflowState::new()
            .with(TASK, self.task.trim())
            .with(CONTENT, serde_json::Value::Array(vec![]))
            .with(REVISION_COUNT, 0)
            .with(MAX_REVISIONS, self.max_revisions)
    }
}

/// The outcome of one completed research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub run_id: RunId,
    pub task: String,
    pub plan: String,
    pub research: Vec<String>,
    pub draft: String,
    pub critique: String,
    pub revision_count: u64,
    /// Whether the reviewer's last critique carried the approval marker, as
    /// opposed to the loop stopping at the revision limit.
    pub approved: bool,
    /// Node visits, including every review and revision.
    pub steps: usize,
    pub revisions: usize,
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl ResearchReport {
    fn from_result(result: &ExecutionResult, marker: &str) -> Self {
        let state = &result.state;
        let text = |key: &str| state.get_str(key).unwrap_or_default().to_string();
        let critique = text(CRITIQUE);

        Self {
            run_id: result.run_id.clone(),
            task: text(TASK),
            plan: text(PLAN),
            research: state
                .get_str_list(CONTENT)
                .into_iter()
                .map(str::to_string)
                .collect(),
            draft: text(DRAFT),
            approved: critique.contains(marker),
            critique,
            revision_count: state.get_u64(REVISION_COUNT).unwrap_or(0),
            steps: result.visits.len(),
            revisions: result.visit_count(REVISE_STAGE),
            elapsed_ms: result.total_elapsed_ms,
            generated_at: Utc::now(),
        }
    }

    /// The saved report: the final draft under a short metadata header.
    pub fn to_markdown(&self) -> String {
        let status = if self.approved {
            "approved by reviewer"
        } else {
            "revision limit reached"
        };
        format!(
            "<!--\ntopic: {}\nrun: {}\ngenerated: {}\nrevisions: {}\nstatus: {}\n-->\n\n{}\n",
            comment_safe(&self.task),
            self.run_id,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.revisions,
            status,
            self.draft.trim_end(),
        )
    }
}

/// Keep a value on one line and unable to close the surrounding HTML comment.
fn comment_safe(value: &str) -> String {
    let mut line = value.split_whitespace().collect::<Vec<_>>().join(" ");
    while line.contains("--") {
        line = line.replace("--", "- -");
    }
    line
}

/// Runs the research graph for one request at a time, sharing one graph and
/// LLM client across runs.
pub struct ResearchPipeline {
    executor: GraphExecutor,
    approval_marker: String,
}

impl ResearchPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Result<Self> {
        let workflow = &config.workflow;
        let graph = build_research_graph(
            llm,
            &config.model,
            &config.stages,
            &workflow.approval_marker,
        )?;
        let executor = GraphExecutor::new(Arc::new(graph))
            .with_stage_timeout(workflow.stage_timeout())
            .with_max_steps(workflow.max_steps);

        Ok(Self {
            executor,
            approval_marker: workflow.approval_marker.clone(),
        })
    }

    /// Execute one request. Progress goes to `observer` while the run is in
    /// flight; the report is built from the same pass.
    pub async fn run(
        &self,
        request: &ResearchRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport> {
        request.validate()?;
        info!(task = %request.task, max_revisions = request.max_revisions, "Starting research run");

        // The configured cap never cuts short a loop the request allows.
        let max_steps = self.executor.max_steps().max(request.step_budget());
        let result = self
            .executor
            .execute_with_max_steps(request.initial_state(), max_steps, observer, cancel)
            .await?;
        let report = ResearchReport::from_result(&result, &self.approval_marker);

        info!(
            run_id = %report.run_id,
            steps = report.steps,
            revisions = report.revisions,
            approved = report.approved,
            "Research run complete"
        );
        Ok(report)
    }
}
