//! Workflow graph layer
//!
//! The user-facing surface over the Pregel engine: a fluent builder
//! producing a validated graph, a closed set of node kinds, and a compiler
//! that turns the graph into a runnable workflow.
//!
//! ```ignore
//! use graphstep::workflow::{WorkflowGraph, NodeKind, END};
//!
//! let graph = WorkflowGraph::<MyState>::new()
//!     .name("research")
//!     .node("planner", NodeKind::Agent(planner_config))
//!     .node("router", NodeKind::Router(router_config))
//!     .node("explorer", NodeKind::Agent(explorer_config))
//!     .entry("planner")
//!     .edge("planner", "router")
//!     .conditional_edges("router", vec![("more", "explorer"), ("done", END)])
//!     .edge("explorer", "router")
//!     .build()?;
//!
//! let mut workflow = CompiledWorkflow::compile_with(graph, config, resources)?;
//! let result = workflow.run(initial_state).await?;
//! ```

pub mod compiled;
pub mod graph;
pub mod hooks;
pub mod node;
pub mod vertices;

pub use compiled::{CompiledWorkflow, WorkflowCompileError, WorkflowResources};
pub use graph::{BuiltWorkflowGraph, GraphEdge, WorkflowBuildError, WorkflowGraph, END};
pub use hooks::{HookRegistry, RouterPredicateFn, SplitFn, TransformFn};
pub use node::{
    AgentNodeConfig, Branch, BranchCondition, FanInNodeConfig, FanOutNodeConfig, MergeStrategy,
    NodeKind, RouterNodeConfig, RoutingStrategy, SplitStrategy, StopCondition, SubAgentNodeConfig,
    ToolNodeConfig, TransformNodeConfig,
};
pub use vertices::{
    AgentOutcome, AgentVertex, FanInVertex, FanOutVertex, RouterVertex, SubAgentVertex,
    SubWorkflowExecutor, ToolVertex, TransformVertex,
};
