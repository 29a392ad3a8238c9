use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use redraft_core::error::{RedraftError, Result};

use super::state::WorkflowState;

/// Terminal sentinel: a transition to `END` finishes the run.
pub const END: &str = "__end__";

/// An unconditional edge connecting two nodes in the execution graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    /// Target node name, or [`END`].
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Picks one outcome key from the state after a node completes.
pub trait Router: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Every outcome this router can return. When non-empty, building a graph
    /// fails unless each one is mapped to a successor.
    fn outcomes(&self) -> Vec<String> {
        vec![]
    }

    fn route(&self, state: &WorkflowState) -> Result<String>;
}

/// Adapter turning a closure into a [`Router`].
pub struct FnRouter<F> {
    name: String,
    outcomes: Vec<String>,
    f: F,
}

impl<F> Router for FnRouter<F>
where
    F: Fn(&WorkflowState) -> Result<String> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn outcomes(&self) -> Vec<String> {
        self.outcomes.clone()
    }

    fn route(&self, state: &WorkflowState) -> Result<String> {
        (self.f)(state)
    }
}

/// Wrap a closure as a router with a declared outcome set.
pub fn router_fn<F>(name: impl Into<String>, outcomes: &[&str], f: F) -> Arc<dyn Router>
where
    F: Fn(&WorkflowState) -> Result<String> + Send + Sync + 'static,
{
    Arc::new(FnRouter {
        name: name.into(),
        outcomes: outcomes.iter().map(|o| o.to_string()).collect(),
        f,
    })
}

/// Where the executor goes after a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Node(String),
    End,
}

impl Next {
    pub(crate) fn from_target(target: &str) -> Self {
        if target == END {
            Next::End
        } else {
            Next::Node(target.to_string())
        }
    }
}

/// A transition whose successor is chosen at run time by a router.
#[derive(Clone)]
pub struct ConditionalEdge {
    /// Source node name.
    pub from: String,
    pub router: Arc<dyn Router>,
    /// Outcome key → target node name (or [`END`]).
    pub branches: BTreeMap<String, String>,
}

impl ConditionalEdge {
    /// Evaluate the router against `state` and look up its outcome.
    pub fn resolve(&self, state: &WorkflowState) -> Result<Next> {
        let outcome = self.router.route(state).map_err(|e| match e {
            RedraftError::Router { .. } => e,
            other => RedraftError::Router {
                node: self.from.clone(),
                message: format!("{}: {}", self.router.name(), other),
            },
        })?;

        let target = self
            .branches
            .get(&outcome)
            .ok_or_else(|| RedraftError::UnknownOutcome {
                node: self.from.clone(),
                outcome: outcome.clone(),
            })?;

        debug!(
            node = %self.from,
            router = %self.router.name(),
            outcome = %outcome,
            target = %target,
            "Routed"
        );
        Ok(Next::from_target(target))
    }
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("router", &self.router.name())
            .field("branches", &self.branches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_edge() -> ConditionalEdge {
        let router = router_fn("flag", &["yes", "no"], |state: &WorkflowState| {
            match state.get_str("flag") {
                Some(flag) => Ok(flag.to_string()),
                None => Err(RedraftError::Config("flag missing".into())),
            }
        });
        ConditionalEdge {
            from: "check".into(),
            router,
            branches: [("yes".to_string(), END.to_string()), ("no".to_string(), "fix".to_string())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_edge_new() {
        let e = Edge::new("a", "b");
        assert_eq!(e.from, "a");
        assert_eq!(e.to, "b");
    }

    #[test]
    fn test_resolve_mapped_outcomes() {
        let edge = flag_edge();
        let yes = WorkflowState::new().with("flag", "yes");
        let no = WorkflowState::new().with("flag", "no");

        assert_eq!(edge.resolve(&yes).unwrap(), Next::End);
        assert_eq!(edge.resolve(&no).unwrap(), Next::Node("fix".into()));
    }

    #[test]
    fn test_resolve_unknown_outcome() {
        let edge = flag_edge();
        let state = WorkflowState::new().with("flag", "maybe");
        let err = edge.resolve(&state).unwrap_err();
        assert!(matches!(
            err,
            RedraftError::UnknownOutcome { ref node, ref outcome } if node == "check" && outcome == "maybe"
        ));
    }

    #[test]
    fn test_router_failure_is_wrapped() {
        let edge = flag_edge();
        let err = edge.resolve(&WorkflowState::new()).unwrap_err();
        assert!(matches!(
            err,
            RedraftError::Router { ref node, ref message } if node == "check" && message.contains("flag missing")
        ));
    }

    #[test]
    fn test_router_fn_outcomes() {
        let router = router_fn("r", &["a", "b"], |_| Ok("a".into()));
        assert_eq!(router.name(), "r");
        assert_eq!(router.outcomes(), vec!["a", "b"]);
    }
}
