use std::sync::Arc;

use tracing::warn;

use redraft_core::error::{RedraftError, Result};
use redraft_core::event::EventBus;
use redraft_core::types::{RunId, WorkflowEvent};

use super::executor::ExecutionResult;
use super::state::{PartialState, WorkflowState};

/// One completed node visit.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub run_id: RunId,
    /// Zero-based position of this visit in the run.
    pub step: usize,
    pub node: String,
    /// What the node returned.
    pub update: PartialState,
    /// State after the update was merged.
    pub snapshot: WorkflowState,
    pub elapsed_ms: u64,
}

/// Receives progress while a run executes.
///
/// Called synchronously, in execution order, once per node visit. Errors
/// from an observer are logged and never abort the run.
pub trait ProgressObserver: Send + Sync {
    fn on_run_start(&self, _run_id: &RunId, _entry: &str) {}

    fn on_node_complete(&self, event: &NodeEvent) -> Result<()>;

    fn on_run_end(&self, _run_id: &RunId, _outcome: std::result::Result<&ExecutionResult, &RedraftError>) {}
}

/// Ignores everything.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_node_complete(&self, _event: &NodeEvent) -> Result<()> {
        Ok(())
    }
}

/// Adapter turning a closure into a [`ProgressObserver`].
pub struct FnObserver<F>(F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(&NodeEvent) -> Result<()> + Send + Sync,
{
    fn on_node_complete(&self, event: &NodeEvent) -> Result<()> {
        (self.0)(event)
    }
}

pub fn observer_fn<F>(f: F) -> FnObserver<F>
where
    F: Fn(&NodeEvent) -> Result<()> + Send + Sync,
{
    FnObserver(f)
}

/// Publishes run progress as [`WorkflowEvent`]s on an [`EventBus`].
pub struct EventBusObserver {
    bus: Arc<EventBus>,
}

impl EventBusObserver {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl ProgressObserver for EventBusObserver {
    fn on_run_start(&self, run_id: &RunId, entry: &str) {
        self.bus.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            entry: entry.to_string(),
        });
    }

    fn on_node_complete(&self, event: &NodeEvent) -> Result<()> {
        self.bus.publish(WorkflowEvent::NodeComplete {
            run_id: event.run_id.clone(),
            step: event.step,
            node: event.node.clone(),
            update: event.update.to_json(),
            elapsed_ms: event.elapsed_ms,
        });
        Ok(())
    }

    fn on_run_end(&self, run_id: &RunId, outcome: std::result::Result<&ExecutionResult, &RedraftError>) {
        let event = match outcome {
            Ok(result) => WorkflowEvent::RunComplete {
                run_id: run_id.clone(),
                steps: result.visits.len(),
                elapsed_ms: result.total_elapsed_ms,
            },
            Err(e) => WorkflowEvent::RunError {
                run_id: run_id.clone(),
                error: e.to_string(),
            },
        };
        self.bus.publish(event);
    }
}

/// Deliver a node event, logging any observer failure.
pub(crate) fn notify(observer: &dyn ProgressObserver, event: &NodeEvent) {
    if let Err(e) = observer.on_node_complete(event) {
        warn!(node = %event.node, error = %e, "Progress observer failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn event(node: &str) -> NodeEvent {
        NodeEvent {
            run_id: RunId::from_str("r1"),
            step: 0,
            node: node.to_string(),
            update: PartialState::new().with("plan", "p"),
            snapshot: WorkflowState::new().with("plan", "p"),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_observer_fn_receives_events() {
        let seen = Mutex::new(Vec::new());
        let observer = observer_fn(|e: &NodeEvent| {
            seen.lock().unwrap().push(e.node.clone());
            Ok(())
        });
        notify(&observer, &event("plan"));
        notify(&observer, &event("research"));
        assert_eq!(*seen.lock().unwrap(), vec!["plan", "research"]);
    }

    #[test]
    fn test_failing_observer_is_contained() {
        let failing = observer_fn(|_: &NodeEvent| Err(RedraftError::Config("display gone".into())));
        notify(&failing, &event("plan"));
    }

    #[tokio::test]
    async fn test_event_bus_observer_publishes() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let observer = EventBusObserver::new(bus.clone());

        observer.on_run_start(&RunId::from_str("r1"), "plan");
        notify(&observer, &event("plan"));
        observer.on_run_end(&RunId::from_str("r1"), Err(&RedraftError::Cancelled));

        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::RunStarted { ref entry, .. } if entry == "plan"));
        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeComplete { node, update, .. } => {
                assert_eq!(node, "plan");
                assert_eq!(update["plan"], "p");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::RunError { ref error, .. } if error == "Run cancelled"));
    }
}
