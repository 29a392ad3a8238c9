use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use redraft_core::error::{RedraftError, Result};

use super::edge::{ConditionalEdge, Edge, Next, Router, END};
use super::node::Node;
use super::state::{StateSchema, WorkflowState};

/// Outgoing transition of a node in a built graph.
#[derive(Debug, Clone)]
enum Transition {
    Direct(String),
    Conditional(ConditionalEdge),
}

/// Collects nodes and edges; [`GraphBuilder::build`] validates them into a [`Graph`].
pub struct GraphBuilder {
    schema: StateSchema,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    conditional_edges: Vec<ConditionalEdge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: vec![],
            edges: vec![],
            conditional_edges: vec![],
            entry: None,
        }
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Route out of `from` by `router`, mapping each outcome to a node or [`END`].
    pub fn add_conditional_edge<I, K, V>(
        mut self,
        from: impl Into<String>,
        router: Arc<dyn Router>,
        branches: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.conditional_edges.push(ConditionalEdge {
            from: from.into(),
            router,
            branches: branches
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<Graph> {
        let config_err = |msg: String| Err(RedraftError::Config(msg));

        let mut nodes: HashMap<String, Node> = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            if node.name == END {
                return config_err(format!("'{}' is reserved and cannot name a node", END));
            }
            for field in node.reads.iter().chain(node.writes.iter()) {
                if !self.schema.contains(field) {
                    return config_err(format!(
                        "node '{}' references undeclared field '{}'",
                        node.name, field
                    ));
                }
            }
            if nodes.contains_key(&node.name) {
                return config_err(format!("duplicate node '{}'", node.name));
            }
            order.push(node.name.clone());
            nodes.insert(node.name.clone(), node);
        }

        let entry = match self.entry {
            Some(entry) => entry,
            None => return config_err("entry node is not set".into()),
        };
        if !nodes.contains_key(&entry) {
            return config_err(format!("entry node '{}' is not declared", entry));
        }

        let mut transitions: HashMap<String, Transition> = HashMap::new();

        for edge in self.edges {
            if !nodes.contains_key(&edge.from) {
                return config_err(format!("edge source '{}' is not declared", edge.from));
            }
            if edge.to != END && !nodes.contains_key(&edge.to) {
                return config_err(format!(
                    "edge '{}' -> '{}' targets an undeclared node",
                    edge.from, edge.to
                ));
            }
            if transitions.contains_key(&edge.from) {
                return config_err(format!(
                    "node '{}' has more than one unconditional outgoing edge",
                    edge.from
                ));
            }
            transitions.insert(edge.from.clone(), Transition::Direct(edge.to));
        }

        for edge in self.conditional_edges {
            if !nodes.contains_key(&edge.from) {
                return config_err(format!(
                    "conditional edge source '{}' is not declared",
                    edge.from
                ));
            }
            if edge.branches.is_empty() {
                return config_err(format!(
                    "conditional edge from '{}' has no branches",
                    edge.from
                ));
            }
            for (outcome, target) in &edge.branches {
                if target != END && !nodes.contains_key(target) {
                    return config_err(format!(
                        "outcome '{}' of '{}' targets undeclared node '{}'",
                        outcome, edge.from, target
                    ));
                }
            }
            for outcome in edge.router.outcomes() {
                if !edge.branches.contains_key(&outcome) {
                    return config_err(format!(
                        "router '{}' outcome '{}' is not mapped",
                        edge.router.name(),
                        outcome
                    ));
                }
            }
            match transitions.get(&edge.from) {
                Some(Transition::Direct(_)) => {
                    return config_err(format!(
                        "node '{}' has both a conditional and an unconditional edge",
                        edge.from
                    ))
                }
                Some(Transition::Conditional(_)) => {
                    return config_err(format!(
                        "node '{}' has more than one conditional edge",
                        edge.from
                    ))
                }
                None => {
                    transitions.insert(edge.from.clone(), Transition::Conditional(edge));
                }
            }
        }

        Ok(Graph {
            schema: self.schema,
            nodes,
            order,
            transitions,
            entry,
        })
    }
}

/// A validated, immutable workflow graph.
///
/// Carries no per-run state, so one `Graph` can back many concurrent runs.
#[derive(Debug)]
pub struct Graph {
    schema: StateSchema,
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    transitions: HashMap<String, Transition>,
    entry: String,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Outcome → target map of the node's conditional edge, if it has one.
    pub fn branches(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.transitions.get(name) {
            Some(Transition::Conditional(edge)) => Some(&edge.branches),
            _ => None,
        }
    }

    /// Decide the successor of `node` given the state it just produced.
    pub(crate) fn next_after(&self, node: &str, state: &WorkflowState) -> Result<Next> {
        match self.transitions.get(node) {
            None => Ok(Next::End),
            Some(Transition::Direct(to)) => Ok(Next::from_target(to)),
            Some(Transition::Conditional(edge)) => edge.resolve(state),
        }
    }
}
