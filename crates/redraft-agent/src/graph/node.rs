use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use redraft_core::error::{RedraftError, Result};

use super::state::{PartialState, StateView, WorkflowState};

/// One pipeline step: reads a view of the state, returns a partial update.
///
/// Handlers never see or mutate the run's state directly.
pub trait StageHandler: Send + Sync + 'static {
    fn run(&self, view: StateView) -> BoxFuture<'_, Result<PartialState>>;
}

/// Adapter turning an async closure into a [`StageHandler`].
pub struct FnHandler<F>(F);

impl<F, Fut> StageHandler for FnHandler<F>
where
    F: Fn(StateView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PartialState>> + Send + 'static,
{
    fn run(&self, view: StateView) -> BoxFuture<'_, Result<PartialState>> {
        Box::pin((self.0)(view))
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StageHandler>
where
    F: Fn(StateView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PartialState>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A named stage in the graph, bound to its handler.
///
/// `reads` and `writes` are the node's declared input and output fields: the
/// handler is shown only `reads`, and an update touching anything outside
/// `writes` fails the run.
#[derive(Clone)]
pub struct Node {
    /// Unique identifier for this node.
    pub name: String,
    /// Fields copied into the handler's view.
    pub reads: Vec<String>,
    /// Fields the handler may return.
    pub writes: Vec<String>,
    handler: Arc<dyn StageHandler>,
}

impl Node {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        Self {
            name: name.into(),
            reads: vec![],
            writes: vec![],
            handler,
        }
    }

    /// Set the input fields.
    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output fields.
    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn handler(&self) -> &Arc<dyn StageHandler> {
        &self.handler
    }

    pub(crate) fn view(&self, state: &WorkflowState) -> StateView {
        state.view(&self.reads)
    }

    /// Reject updates that touch fields outside the declared outputs.
    pub(crate) fn check_update(&self, update: &PartialState) -> Result<()> {
        match update.keys().find(|k| !self.writes.iter().any(|w| w == k)) {
            Some(field) => Err(RedraftError::MalformedOutput {
                stage: self.name.clone(),
                message: format!("wrote undeclared field '{}'", field),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Arc<dyn StageHandler> {
        handler_fn(|view: StateView| async move {
            let task = view.get_str("task").unwrap_or_default().to_string();
            Ok(PartialState::new().with("plan", format!("plan for {}", task)))
        })
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new("plan", echo())
            .with_inputs(["task"])
            .with_outputs(vec!["plan".to_string()]);

        assert_eq!(node.name, "plan");
        assert_eq!(node.reads, vec!["task"]);
        assert_eq!(node.writes, vec!["plan"]);
        assert!(format!("{:?}", node).contains("plan"));
    }

    #[tokio::test]
    async fn test_handler_sees_only_inputs() {
        let node = Node::new("plan", echo()).with_inputs(["task"]).with_outputs(["plan"]);
        let state = WorkflowState::new()
            .with("task", "Rust async")
            .with("draft", "hidden");

        let view = node.view(&state);
        assert!(!view.contains("draft"));

        let update = node.handler().run(view).await.unwrap();
        assert_eq!(
            update.get("plan").and_then(|v| v.as_str()),
            Some("plan for Rust async")
        );
        assert!(node.check_update(&update).is_ok());
    }

    #[test]
    fn test_undeclared_write_rejected() {
        let node = Node::new("review", echo()).with_outputs(["critique"]);
        let update = PartialState::new().with("critique", "ok").with("draft", "sneaky");
        let err = node.check_update(&update).unwrap_err();
        assert!(matches!(
            err,
            RedraftError::MalformedOutput { ref stage, ref message }
                if stage == "review" && message.contains("draft")
        ));
    }
}
