//! Stage-graph execution engine.
//!
//! A workflow is a directed graph of [`Node`]s connected by [`Edge`]s and
//! [`ConditionalEdge`]s. Each node binds a name to a [`StageHandler`] that
//! reads a [`StateView`] and returns a [`PartialState`]; the executor merges
//! updates into the run's [`WorkflowState`] according to the per-field
//! [`MergePolicy`] declared in the graph's [`StateSchema`].
//!
//! The [`GraphExecutor`] walks the graph from its entry node, one node at a
//! time, evaluating routers at conditional nodes and reporting every visit to
//! a [`ProgressObserver`], and returns the final state in the same pass.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
pub mod observer;
pub mod state;

pub use builder::{Graph, GraphBuilder};
pub use edge::{router_fn, ConditionalEdge, Edge, Next, Router, END};
pub use executor::{ExecutionResult, GraphExecutor, NodeVisit, DEFAULT_MAX_STEPS};
pub use node::{handler_fn, Node, StageHandler};
pub use observer::{observer_fn, EventBusObserver, NodeEvent, NoopObserver, ProgressObserver};
pub use state::{MergePolicy, PartialState, StateSchema, StateView, WorkflowState};
