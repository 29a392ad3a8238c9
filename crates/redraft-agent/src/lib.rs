pub mod graph;
pub mod research;

pub use graph::{
    ExecutionResult, Graph, GraphBuilder, GraphExecutor, Node, NodeEvent, ProgressObserver,
    StateSchema, WorkflowState,
};
pub use research::{ResearchPipeline, ResearchReport, ResearchRequest};
