//! graphstep: a Pregel-style workflow execution engine
//!
//! Orchestrates graphs of heterogeneous compute vertices - LLM agents,
//! tool invocations, routers, fan-out/fan-in barriers, and nested
//! sub-workflows - under a deterministic superstep schedule with durable
//! checkpointing.
//!
//! # Model
//!
//! Execution proceeds in *supersteps*. In each one, every runnable vertex
//! computes concurrently against the same committed state snapshot, then
//! the runtime merges the emitted state updates, applies halt votes, and
//! routes the messages sent this step for delivery at the start of the
//! next. A vertex that voted to halt sleeps until a message wakes it; the
//! run ends when every vertex is asleep and no messages are pending, or
//! when the state reports itself terminal.
//!
//! # Layers
//!
//! - [`pregel`]: the engine - vertex contract, superstep runtime,
//!   message passing, checkpoint/recovery.
//! - [`workflow`]: the graph DSL - node kinds, fluent builder with
//!   validation, compilation into the engine.
//! - [`llm`] / [`tools`]: capability seams for the LLM provider and the
//!   tool runtime; the engine consumes these traits and ships no concrete
//!   providers.
//!
//! # Example
//!
//! ```ignore
//! use graphstep::prelude::*;
//!
//! let graph = WorkflowGraph::<MyState>::new()
//!     .name("pipeline")
//!     .node("plan", NodeKind::Agent(plan_config))
//!     .node("check", NodeKind::Router(check_config))
//!     .entry("plan")
//!     .edge("plan", "check")
//!     .conditional_edges("check", vec![("again", "plan"), ("done", END)])
//!     .build()?;
//!
//! let resources = WorkflowResources::new().with_llm(llm).with_tools(tools);
//! let mut workflow = CompiledWorkflow::compile_with(graph, PregelConfig::default(), resources)?;
//! let result = workflow.run(MyState::default()).await?;
//! ```

pub mod llm;
pub mod pregel;
pub mod tools;
pub mod workflow;

pub use pregel::{
    Checkpoint, Checkpointer, CheckpointerConfig, CheckpointingRuntime, ComputeContext,
    ComputeResult, MemoryCheckpointer, PregelConfig, PregelError, PregelRuntime, RetryPolicy,
    StateUpdate, UnitState, UnitUpdate, Vertex, VertexId, VertexMessage, VertexState,
    WorkflowMessage, WorkflowResult, WorkflowState, END,
};
pub use workflow::{CompiledWorkflow, NodeKind, WorkflowGraph, WorkflowResources};

/// Commonly used types in one import
pub mod prelude {
    pub use crate::llm::{ChatMessage, LlmConfig, LlmProvider, LlmResponse, Role, ToolCall};
    pub use crate::pregel::{
        Checkpoint, Checkpointer, CheckpointerConfig, ComputeContext, ComputeResult,
        MemoryCheckpointer, PregelConfig, PregelError, PregelRuntime, RetryPolicy, StateUpdate,
        UnitState, UnitUpdate, Vertex, VertexId, VertexMessage, VertexState, WorkflowMessage,
        WorkflowResult, WorkflowState, END,
    };
    pub use crate::tools::{Tool, ToolDefinition, ToolOutput, ToolRegistry, ToolRuntime};
    pub use crate::workflow::{
        AgentNodeConfig, Branch, BranchCondition, CompiledWorkflow, FanInNodeConfig,
        FanOutNodeConfig, HookRegistry, MergeStrategy, NodeKind, RouterNodeConfig,
        RoutingStrategy, SplitStrategy, StopCondition, SubAgentNodeConfig, SubWorkflowExecutor,
        ToolNodeConfig, TransformNodeConfig, WorkflowGraph, WorkflowResources,
    };
}
