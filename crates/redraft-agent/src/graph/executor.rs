use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use redraft_core::error::{RedraftError, Result};
use redraft_core::types::RunId;

use super::builder::Graph;
use super::edge::Next;
use super::node::Node;
use super::observer::{notify, NodeEvent, ProgressObserver};
use super::state::{PartialState, StateView, WorkflowState};

/// Default cap on node visits per run.
pub const DEFAULT_MAX_STEPS: usize = 64;

/// One node visit, in execution order.
#[derive(Debug, Clone)]
pub struct NodeVisit {
    pub step: usize,
    pub node: String,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// The final state after the last node's update.
    pub state: WorkflowState,
    /// Per-node visits in execution order.
    pub visits: Vec<NodeVisit>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    /// Node names in the order they ran.
    pub fn trace(&self) -> Vec<&str> {
        self.visits.iter().map(|v| v.node.as_str()).collect()
    }

    /// How many times `node` ran.
    pub fn visit_count(&self, node: &str) -> usize {
        self.visits.iter().filter(|v| v.node == node).count()
    }
}

/// Walks a [`Graph`] one node at a time.
///
/// Starting from the entry node, the executor runs each node's handler on a
/// view of the current state, merges the returned update into a new state
/// snapshot, reports the visit to the observer, and then follows the node's
/// edge or evaluates its router. Nodes never run concurrently within a run;
/// the executor itself holds no per-run state and can drive many runs.
pub struct GraphExecutor {
    graph: Arc<Graph>,
    stage_timeout: Option<Duration>,
    max_steps: usize,
}

impl GraphExecutor {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            stage_timeout: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Abort a run with `StageTimeout` when one handler call exceeds `timeout`.
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Abort a run with `StepLimit` after `max_steps` node visits.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the graph to completion over `initial`.
    ///
    /// Any handler, router, or merge failure aborts the run and is returned;
    /// the state accumulated so far is discarded. `cancel` is checked before
    /// every node and while a handler is in flight.
    pub async fn execute(
        &self,
        initial: WorkflowState,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.execute_with_max_steps(initial, self.max_steps, observer, cancel)
            .await
    }

    /// Like [`execute`](Self::execute), with a step cap for this run only.
    pub async fn execute_with_max_steps(
        &self,
        initial: WorkflowState,
        max_steps: usize,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let run_id = RunId::new();
        let span = info_span!("workflow_run", run_id = %run_id, max_steps);

        observer.on_run_start(&run_id, self.graph.entry());
        let outcome = self
            .walk(run_id.clone(), initial, max_steps, observer, cancel)
            .instrument(span)
            .await;

        match &outcome {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    steps = result.visits.len(),
                    elapsed_ms = result.total_elapsed_ms,
                    "Graph run complete"
                );
            }
            Err(e) => error!(run_id = %run_id, error = %e, "Graph run aborted"),
        }
        observer.on_run_end(&run_id, outcome.as_ref());
        outcome
    }

    async fn walk(
        &self,
        run_id: RunId,
        initial: WorkflowState,
        max_steps: usize,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let schema = self.graph.schema();
        initial.validate(schema)?;

        let start = Instant::now();
        let mut state = initial;
        let mut visits: Vec<NodeVisit> = Vec::new();
        let mut current = self.graph.entry().to_string();

        loop {
            if cancel.is_cancelled() {
                return Err(RedraftError::Cancelled);
            }
            let step = visits.len();
            if step >= max_steps {
                return Err(RedraftError::StepLimit(max_steps));
            }

            let node = self.graph.node(&current).ok_or_else(|| {
                RedraftError::Config(format!("Node '{}' not found in graph", current))
            })?;

            info!(node = %node.name, step, "Executing graph node");
            let node_start = Instant::now();

            let update = self.invoke(node, node.view(&state), cancel).await?;
            node.check_update(&update)?;
            state = state.apply(&update, schema)?;

            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            debug!(
                node = %node.name,
                fields = ?update.keys().collect::<Vec<_>>(),
                elapsed_ms,
                "Node update merged"
            );

            visits.push(NodeVisit {
                step,
                node: node.name.clone(),
                elapsed_ms,
            });
            notify(
                observer,
                &NodeEvent {
                    run_id: run_id.clone(),
                    step,
                    node: node.name.clone(),
                    update,
                    snapshot: state.clone(),
                    elapsed_ms,
                },
            );

            match self.graph.next_after(&current, &state)? {
                Next::End => {
                    debug!(node = %current, "Reached terminal transition");
                    break;
                }
                Next::Node(next) => current = next,
            }
        }

        Ok(ExecutionResult {
            run_id,
            state,
            visits,
            total_elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run one handler, bounded by the stage timeout and the cancel token.
    async fn invoke(
        &self,
        node: &Node,
        view: StateView,
        cancel: &CancellationToken,
    ) -> Result<PartialState> {
        let call = node.handler().run(view);
        let bounded = async {
            match self.stage_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(RedraftError::StageTimeout {
                        stage: node.name.clone(),
                        timeout_secs: limit.as_secs_f64().ceil() as u64,
                    }),
                },
                None => call.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RedraftError::Cancelled),
            result = bounded => result,
        };

        if let Err(e) = &result {
            error!(node = %node.name, error = %e, "Graph node failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::graph::builder::GraphBuilder;
    use crate::graph::edge::{router_fn, END};
    use crate::graph::node::{handler_fn, StageHandler};
    use crate::graph::observer::{observer_fn, NoopObserver};
    use crate::graph::state::StateSchema;

    fn schema() -> StateSchema {
        StateSchema::new()
            .overwrite("note")
            .accumulate("log")
            .overwrite("count")
            .overwrite("limit")
    }

    /// Appends `name` to the log and bumps the counter.
    fn step(name: &'static str) -> Arc<dyn StageHandler> {
        handler_fn(move |view: StateView| async move {
            let count = view.get_u64("count").unwrap_or(0);
            Ok(PartialState::new()
                .with("log", name)
                .with("note", name)
                .with("count", count + 1))
        })
    }

    fn node(name: &'static str) -> Node {
        Node::new(name, step(name))
            .with_inputs(["count"])
            .with_outputs(["log", "note", "count"])
    }

    fn linear() -> Arc<Graph> {
        Arc::new(
            GraphBuilder::new(schema())
                .add_node(node("a"))
                .add_node(node("b"))
                .add_node(node("c"))
                .add_edge("a", "b")
                .add_edge("b", "c")
                .set_entry("a")
                .build()
                .unwrap(),
        )
    }

    /// a -> loop -> (router: count < limit ? loop : END)
    fn looping() -> Arc<Graph> {
        let router = router_fn("under_limit", &["again", "done"], |state: &WorkflowState| {
            let count = state.get_u64("count").unwrap_or(0);
            let limit = state.get_u64("limit").unwrap_or(0);
            Ok(if count < limit { "again" } else { "done" }.to_string())
        });
        Arc::new(
            GraphBuilder::new(schema())
                .add_node(node("a"))
                .add_node(node("loop"))
                .add_edge("a", "loop")
                .add_conditional_edge("loop", router, [("again", "loop"), ("done", END)])
                .set_entry("a")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_linear_run_merges_updates() {
        let executor = GraphExecutor::new(linear());
        let result = executor
            .execute(WorkflowState::new(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.trace(), vec!["a", "b", "c"]);
        assert_eq!(result.state.get_str_list("log"), vec!["a", "b", "c"]);
        assert_eq!(result.state.get_str("note"), Some("c"));
        assert_eq!(result.state.get_u64("count"), Some(3));
        assert_eq!(result.visits[2].step, 2);
    }

    #[tokio::test]
    async fn test_observer_sees_each_snapshot_in_order() {
        let events = Mutex::new(Vec::new());
        let observer = observer_fn(|e: &NodeEvent| {
            events
                .lock()
                .unwrap()
                .push((e.node.clone(), e.snapshot.get_u64("count"), e.update.clone()));
            Ok(())
        });

        GraphExecutor::new(linear())
            .execute(WorkflowState::new(), &observer, &CancellationToken::new())
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let summary: Vec<_> = events.iter().map(|(n, c, _)| (n.as_str(), *c)).collect();
        assert_eq!(summary, vec![("a", Some(1)), ("b", Some(2)), ("c", Some(3))]);
        assert_eq!(events[1].2.get("note"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_cycle_bounded_by_router() {
        let executor = GraphExecutor::new(looping());
        let initial = WorkflowState::new().with("limit", 4);
        let result = executor
            .execute(initial, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.trace(), vec!["a", "loop", "loop", "loop"]);
        assert_eq!(result.visit_count("loop"), 3);
        assert_eq!(result.state.get_u64("count"), Some(4));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let executor = GraphExecutor::new(looping()).with_max_steps(5);
        let initial = WorkflowState::new().with("limit", 100);
        let err = executor
            .execute(initial, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::StepLimit(5)));
    }

    #[tokio::test]
    async fn test_per_run_step_limit_overrides_default() {
        let executor = GraphExecutor::new(looping()).with_max_steps(3);
        assert_eq!(executor.max_steps(), 3);

        let result = executor
            .execute_with_max_steps(
                WorkflowState::new().with("limit", 6),
                10,
                &NoopObserver,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.visit_count("loop"), 5);

        let err = executor
            .execute_with_max_steps(
                WorkflowState::new().with("limit", 6),
                4,
                &NoopObserver,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::StepLimit(4)));
    }

    #[tokio::test]
    async fn test_handler_failure_aborts_without_applying() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = handler_fn(move |_view: StateView| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<PartialState, _>(RedraftError::Generation {
                    stage: "b".into(),
                    message: "HTTP 429".into(),
                })
            }
        });
        let graph = GraphBuilder::new(schema())
            .add_node(node("a"))
            .add_node(Node::new("b", failing).with_outputs(["note"]))
            .add_node(node("c"))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .set_entry("a")
            .build()
            .unwrap();

        let seen = Mutex::new(Vec::new());
        let observer = observer_fn(|e: &NodeEvent| {
            seen.lock().unwrap().push(e.node.clone());
            Ok(())
        });

        let err = GraphExecutor::new(Arc::new(graph))
            .execute(WorkflowState::new(), &observer, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RedraftError::Generation { ref stage, .. } if stage == "b"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Only the node that succeeded was reported; c never ran.
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let slow = handler_fn(|_view: StateView| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(PartialState::new())
        });
        let graph = GraphBuilder::new(schema())
            .add_node(Node::new("slow", slow))
            .set_entry("slow")
            .build()
            .unwrap();

        let err = GraphExecutor::new(Arc::new(graph))
            .with_stage_timeout(Some(Duration::from_millis(20)))
            .execute(WorkflowState::new(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RedraftError::StageTimeout { ref stage, .. } if stage == "slow"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = GraphExecutor::new(linear())
            .execute(WorkflowState::new(), &NoopObserver, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_between_nodes() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let observer = observer_fn(move |e: &NodeEvent| {
            if e.node == "a" {
                trigger.cancel();
            }
            Ok(())
        });

        let err = GraphExecutor::new(linear())
            .execute(WorkflowState::new(), &observer, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::Cancelled));
    }

    #[tokio::test]
    async fn test_observer_error_does_not_abort() {
        let observer = observer_fn(|_: &NodeEvent| Err(RedraftError::Config("ui closed".into())));
        let result = GraphExecutor::new(linear())
            .execute(WorkflowState::new(), &observer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.visits.len(), 3);
    }

    #[tokio::test]
    async fn test_undeclared_write_aborts() {
        let leaky = handler_fn(|_view: StateView| async {
            Ok(PartialState::new().with("note", "x").with("count", 99))
        });
        let graph = GraphBuilder::new(schema())
            .add_node(Node::new("leaky", leaky).with_outputs(["note"]))
            .set_entry("leaky")
            .build()
            .unwrap();

        let err = GraphExecutor::new(Arc::new(graph))
            .execute(WorkflowState::new(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_outcome_aborts() {
        let router = router_fn("wild", &[], |_| Ok("elsewhere".into()));
        let graph = GraphBuilder::new(schema())
            .add_node(node("a"))
            .add_node(node("b"))
            .add_conditional_edge("a", router, [("next", "b")])
            .set_entry("a")
            .build()
            .unwrap();

        let err = GraphExecutor::new(Arc::new(graph))
            .execute(WorkflowState::new(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, RedraftError::UnknownOutcome { ref outcome, .. } if outcome == "elsewhere"));
    }

    #[tokio::test]
    async fn test_invalid_initial_state() {
        let err = GraphExecutor::new(linear())
            .execute(
                WorkflowState::new().with("bogus", 1),
                &NoopObserver,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_graph_shared_across_concurrent_runs() {
        let executor = Arc::new(GraphExecutor::new(looping()));
        let mut handles = Vec::new();
        for limit in [2u64, 3, 5] {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute(
                        WorkflowState::new().with("limit", limit),
                        &NoopObserver,
                        &CancellationToken::new(),
                    )
                    .await
                    .map(|r| r.state.get_u64("count"))
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(counts, vec![Some(2), Some(3), Some(5)]);
    }
}
