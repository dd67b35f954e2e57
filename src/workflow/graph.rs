//! Workflow graph builder
//!
//! Fluent construction of nodes, edges, and an entry point, validated and
//! frozen into a [`BuiltWorkflowGraph`] that the compiler consumes.
//!
//! Validation rejects structural errors (missing entry, unknown edge
//! endpoints, duplicate node ids) and warns - without rejecting - on
//! cycles and on nodes unreachable from the entry: cyclic graphs are an
//! expected shape here (router loops, self-messaging vertices).

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use thiserror::Error;

use crate::pregel::WorkflowState;
use crate::workflow::node::NodeKind;

pub use crate::pregel::vertex::END;

/// Edge definition for a workflow graph
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    /// Branch label for conditional edges
    pub condition: Option<String>,
}

/// Errors raised while building a workflow graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowBuildError {
    #[error("workflow entry point not set")]
    NoEntryPoint,
    #[error("unknown node id: {0}")]
    UnknownNode(String),
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
}

/// Fluent builder for workflow graphs
#[derive(Debug, Clone)]
pub struct WorkflowGraph<S: WorkflowState> {
    name: String,
    nodes: HashMap<String, NodeKind>,
    edges: Vec<GraphEdge>,
    entry_point: Option<String>,
    duplicates: Vec<String>,
    _state: PhantomData<S>,
}

impl<S: WorkflowState> Default for WorkflowGraph<S> {
    fn default() -> Self {
        Self {
            name: String::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry_point: None,
            duplicates: Vec::new(),
            _state: PhantomData,
        }
    }
}

impl<S: WorkflowState> WorkflowGraph<S> {
    /// Create a new workflow graph builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a node
    pub fn node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        if self.nodes.insert(id.clone(), kind).is_some() {
            self.duplicates.push(id);
        }
        self
    }

    /// Designate the entry node
    pub fn entry(mut self, id: impl Into<String>) -> Self {
        self.entry_point = Some(id.into());
        self
    }

    /// Add a directed edge
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Add labeled conditional edges from one node
    pub fn conditional_edges(mut self, from: impl Into<String>, edges: Vec<(&str, &str)>) -> Self {
        let from = from.into();
        for (condition, target) in edges {
            self.edges.push(GraphEdge {
                from: from.clone(),
                to: target.to_string(),
                condition: Some(condition.to_string()),
            });
        }
        self
    }

    /// Validate and freeze the graph
    pub fn build(self) -> Result<BuiltWorkflowGraph<S>, WorkflowBuildError> {
        if let Some(duplicate) = self.duplicates.into_iter().next() {
            return Err(WorkflowBuildError::DuplicateNode(duplicate));
        }

        let entry_point = self.entry_point.ok_or(WorkflowBuildError::NoEntryPoint)?;
        if !self.nodes.contains_key(&entry_point) {
            return Err(WorkflowBuildError::UnknownNode(entry_point));
        }

        let mut edges: HashMap<String, Vec<(String, Option<String>)>> = HashMap::new();
        for edge in self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(WorkflowBuildError::UnknownNode(edge.from));
            }
            if edge.to != END && !self.nodes.contains_key(&edge.to) {
                return Err(WorkflowBuildError::UnknownNode(edge.to));
            }
            edges
                .entry(edge.from)
                .or_default()
                .push((edge.to, edge.condition));
        }

        warn_on_cycles(&self.name, &edges);
        warn_on_unreachable(&self.name, &entry_point, self.nodes.keys(), &edges);

        Ok(BuiltWorkflowGraph {
            nodes: self.nodes,
            edges,
            entry_point,
            name: self.name,
            _state: PhantomData,
        })
    }
}

/// Depth-first cycle detection over the declared edges; cycles only warn
fn warn_on_cycles(name: &str, edges: &HashMap<String, Vec<(String, Option<String>)>>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        edges: &HashMap<String, Vec<(String, Option<String>)>>,
        marks: &mut HashMap<String, Mark>,
    ) -> Option<String> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => return Some(node.to_string()),
            None => {}
        }
        marks.insert(node.to_string(), Mark::Visiting);
        if let Some(targets) = edges.get(node) {
            for (target, _) in targets {
                if target.as_str() == END {
                    continue;
                }
                if let Some(cycle_node) = visit(target, edges, marks) {
                    return Some(cycle_node);
                }
            }
        }
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for node in edges.keys() {
        if let Some(cycle_node) = visit(node, edges, &mut marks) {
            tracing::warn!(
                workflow = name,
                node = %cycle_node,
                "workflow graph contains a cycle; ensure a branch or terminal state breaks it"
            );
            return;
        }
    }
}

/// Breadth-first reachability from the entry; unreachable nodes only warn
fn warn_on_unreachable<'a>(
    name: &str,
    entry: &str,
    nodes: impl Iterator<Item = &'a String>,
    edges: &HashMap<String, Vec<(String, Option<String>)>>,
) {
    let mut reachable = HashSet::new();
    let mut frontier = vec![entry.to_string()];
    while let Some(node) = frontier.pop() {
        if !reachable.insert(node.clone()) {
            continue;
        }
        if let Some(targets) = edges.get(&node) {
            for (target, _) in targets {
                if target.as_str() != END && !reachable.contains(target) {
                    frontier.push(target.clone());
                }
            }
        }
    }

    for node in nodes {
        if !reachable.contains(node) {
            tracing::warn!(
                workflow = name,
                node = %node,
                "node is not reachable from the entry via declared edges"
            );
        }
    }
}

/// Validated, immutable workflow graph
#[derive(Debug, Clone)]
pub struct BuiltWorkflowGraph<S: WorkflowState> {
    pub nodes: HashMap<String, NodeKind>,
    /// source -> [(target, edge label)]
    pub edges: HashMap<String, Vec<(String, Option<String>)>>,
    pub entry_point: String,
    pub name: String,
    _state: PhantomData<S>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::UnitState;

    #[test]
    fn basic_build() {
        let workflow = WorkflowGraph::<UnitState>::new()
            .name("basic")
            .node("start", NodeKind::default())
            .node("next", NodeKind::default())
            .entry("start")
            .edge("start", "next")
            .build()
            .unwrap();

        assert_eq!(workflow.name, "basic");
        assert_eq!(workflow.entry_point, "start");
        assert!(workflow.nodes.contains_key("start"));
        assert_eq!(
            workflow.edges.get("start").map(|v| v.len()),
            Some(1)
        );
    }

    #[test]
    fn missing_entry_is_rejected() {
        let result = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .build();

        assert_eq!(result.unwrap_err(), WorkflowBuildError::NoEntryPoint);
    }

    #[test]
    fn unknown_entry_is_rejected() {
        let result = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .entry("missing")
            .build();

        assert_eq!(
            result.unwrap_err(),
            WorkflowBuildError::UnknownNode("missing".to_string())
        );
    }

    #[test]
    fn unknown_edge_target_is_rejected() {
        let result = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .entry("start")
            .edge("start", "missing")
            .build();

        assert_eq!(
            result.unwrap_err(),
            WorkflowBuildError::UnknownNode("missing".to_string())
        );
    }

    #[test]
    fn unknown_edge_source_is_rejected() {
        let result = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .entry("start")
            .edge("ghost", "start")
            .build();

        assert_eq!(
            result.unwrap_err(),
            WorkflowBuildError::UnknownNode("ghost".to_string())
        );
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let result = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .node("start", NodeKind::default())
            .entry("start")
            .build();

        assert_eq!(
            result.unwrap_err(),
            WorkflowBuildError::DuplicateNode("start".to_string())
        );
    }

    #[test]
    fn end_sentinel_is_a_valid_target() {
        let workflow = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .entry("start")
            .edge("start", END)
            .build()
            .unwrap();

        assert_eq!(
            workflow.edges.get("start").unwrap()[0].0,
            END.to_string()
        );
    }

    #[test]
    fn conditional_edges_carry_labels() {
        let workflow = WorkflowGraph::<UnitState>::new()
            .node("router", NodeKind::default())
            .node("a", NodeKind::default())
            .node("b", NodeKind::default())
            .entry("router")
            .conditional_edges("router", vec![("if_a", "a"), ("if_b", "b")])
            .build()
            .unwrap();

        let targets = workflow.edges.get("router").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].1.as_deref(), Some("if_a"));
    }

    #[test]
    fn cyclic_graph_builds_with_warning() {
        // router -> explorer -> router: legal, only warns.
        let workflow = WorkflowGraph::<UnitState>::new()
            .node("router", NodeKind::default())
            .node("explorer", NodeKind::default())
            .entry("router")
            .edge("router", "explorer")
            .edge("explorer", "router")
            .build();

        assert!(workflow.is_ok());
    }

    #[test]
    fn unreachable_node_builds_with_warning() {
        let workflow = WorkflowGraph::<UnitState>::new()
            .node("start", NodeKind::default())
            .node("island", NodeKind::default())
            .entry("start")
            .edge("start", END)
            .build();

        assert!(workflow.is_ok());
    }
}
