use tracing::debug;

use redraft_core::error::{RedraftError, Result};

use crate::graph::{Router, WorkflowState};

use super::{CRITIQUE, MAX_REVISIONS, REVISION_COUNT};

pub const APPROVED: &str = "approved";
pub const REVISE: &str = "revise";

/// Decides whether a reviewed draft is done or goes back for revision.
///
/// The draft is approved when the critique contains the marker (a plain,
/// case-sensitive substring check) or when `max_revisions` revisions have
/// already been made. The first write sets `revision_count` to 1, so
/// revisions made so far are `revision_count - 1`.
#[derive(Debug, Clone)]
pub struct RevisionRouter {
    marker: String,
}

impl RevisionRouter {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Router for RevisionRouter {
    fn name(&self) -> &str {
        "revision_router"
    }

    fn outcomes(&self) -> Vec<String> {
        vec![APPROVED.to_string(), REVISE.to_string()]
    }

    fn route(&self, state: &WorkflowState) -> Result<String> {
        let critique = state.get_str(CRITIQUE).ok_or_else(|| RedraftError::Router {
            node: super::REVIEW_STAGE.to_string(),
            message: "no critique in state".into(),
        })?;
        let count = state.get_u64(REVISION_COUNT).unwrap_or(0);
        let max = state.get_u64(MAX_REVISIONS).unwrap_or(0);
        let revisions_done = count.saturating_sub(1);

        let marked = critique.contains(&self.marker);
        let exhausted = revisions_done >= max;
        debug!(marked, revisions_done, max_revisions = max, "Evaluated critique");

        Ok(if marked || exhausted { APPROVED } else { REVISE }.to_string())
    }
}
