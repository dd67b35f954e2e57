//! Workflow compilation
//!
//! Bridges the graph DSL to the Pregel engine: every node becomes the
//! matching vertex implementation, edges are wired as topology metadata,
//! and the entry node is activated. Compilation is strict - a node whose
//! required capability (LLM, tool runtime, sub-workflow executor, hook)
//! is missing fails to compile rather than degrading silently.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::LlmProvider;
use crate::pregel::checkpoint::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::runtime::{CheckpointingRuntime, PregelRuntime, WorkflowResult};
use crate::pregel::state::WorkflowState;
use crate::pregel::vertex::{BoxedVertex, VertexId, END};
use crate::pregel::PregelConfig;
use crate::tools::ToolRuntime;
use crate::workflow::graph::BuiltWorkflowGraph;
use crate::workflow::hooks::HookRegistry;
use crate::workflow::node::{NodeKind, RoutingStrategy, SplitStrategy};
use crate::workflow::vertices::{
    AgentVertex, FanInVertex, FanOutVertex, MergeUpdateFn, OutcomeUpdateFn, ResultUpdateFn,
    RouterVertex, SubAgentVertex, SubResultUpdateFn, SubWorkflowExecutor, ToolVertex,
    TransformVertex,
};

/// Errors raised while compiling a workflow graph
#[derive(Debug, Error)]
pub enum WorkflowCompileError {
    #[error("node '{node_id}' requires an LLM provider but none was configured")]
    MissingLlmProvider { node_id: String },

    #[error("node '{node_id}' requires a tool runtime but none was configured")]
    MissingToolRuntime { node_id: String },

    #[error("node '{node_id}' requires a sub-workflow executor but none was configured")]
    MissingSubWorkflowExecutor { node_id: String },

    #[error("node '{node_id}' references hook '{hook}' which is not registered")]
    MissingHook { node_id: String, hook: String },
}

/// Capabilities and mappers handed to the compiler
///
/// Mappers are keyed by node id and let compiled vertices emit real state
/// updates instead of only messages.
pub struct WorkflowResources<S: WorkflowState> {
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub tools: Option<Arc<dyn ToolRuntime>>,
    pub sub_executor: Option<Arc<dyn SubWorkflowExecutor>>,
    pub hooks: HookRegistry<S>,
    /// Nesting depth of this workflow (0 = root); SubAgent vertices pass
    /// `depth + 1` to their executor
    pub depth: usize,
    agent_outcomes: HashMap<String, OutcomeUpdateFn<S>>,
    tool_results: HashMap<String, ResultUpdateFn<S>>,
    fanin_merges: HashMap<String, MergeUpdateFn<S>>,
    subagent_results: HashMap<String, SubResultUpdateFn<S>>,
}

impl<S: WorkflowState> Default for WorkflowResources<S> {
    fn default() -> Self {
        Self {
            llm: None,
            tools: None,
            sub_executor: None,
            hooks: HookRegistry::new(),
            depth: 0,
            agent_outcomes: HashMap::new(),
            tool_results: HashMap::new(),
            fanin_merges: HashMap::new(),
            subagent_results: HashMap::new(),
        }
    }
}

impl<S: WorkflowState> WorkflowResources<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRuntime>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_sub_executor(mut self, executor: Arc<dyn SubWorkflowExecutor>) -> Self {
        self.sub_executor = Some(executor);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry<S>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Map an agent node's outcome into a state update
    pub fn with_agent_outcome(
        mut self,
        node_id: impl Into<String>,
        f: OutcomeUpdateFn<S>,
    ) -> Self {
        self.agent_outcomes.insert(node_id.into(), f);
        self
    }

    /// Map a tool node's result into a state update
    pub fn with_tool_result(mut self, node_id: impl Into<String>, f: ResultUpdateFn<S>) -> Self {
        self.tool_results.insert(node_id.into(), f);
        self
    }

    /// Map a fan-in node's merged payload into a state update
    pub fn with_fanin_merge(mut self, node_id: impl Into<String>, f: MergeUpdateFn<S>) -> Self {
        self.fanin_merges.insert(node_id.into(), f);
        self
    }

    /// Map a sub-agent node's projected result into a state update
    pub fn with_subagent_result(
        mut self,
        node_id: impl Into<String>,
        f: SubResultUpdateFn<S>,
    ) -> Self {
        self.subagent_results.insert(node_id.into(), f);
        self
    }
}

/// Plain or checkpointing runtime, selected at compile time
enum RuntimeKind<S>
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de>,
{
    Plain(PregelRuntime<S, WorkflowMessage>),
    Checkpointing(CheckpointingRuntime<S>),
}

/// A compiled workflow ready for execution
pub struct CompiledWorkflow<S>
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de>,
{
    runtime: RuntimeKind<S>,
    name: String,
    node_kinds: HashMap<VertexId, NodeKind>,
}

impl<S> CompiledWorkflow<S>
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de>,
{
    /// Compile a graph that needs no external capabilities
    pub fn compile(
        graph: BuiltWorkflowGraph<S>,
        config: PregelConfig,
    ) -> Result<Self, WorkflowCompileError> {
        Self::compile_with(graph, config, WorkflowResources::default())
    }

    /// Compile a graph with capabilities and mappers
    pub fn compile_with(
        graph: BuiltWorkflowGraph<S>,
        config: PregelConfig,
        resources: WorkflowResources<S>,
    ) -> Result<Self, WorkflowCompileError> {
        let (runtime, name, node_kinds) = Self::build_runtime(graph, config, &resources, None)?;
        Ok(Self {
            runtime: RuntimeKind::Plain(runtime),
            name,
            node_kinds,
        })
    }

    /// Compile with a checkpointer for crash-recoverable execution
    ///
    /// `workflow_id` namespaces the checkpoints; reuse the same id to
    /// resume a previous run.
    pub fn compile_with_checkpointer(
        graph: BuiltWorkflowGraph<S>,
        config: PregelConfig,
        resources: WorkflowResources<S>,
        checkpointer: Arc<dyn Checkpointer<S>>,
        workflow_id: impl Into<String>,
    ) -> Result<Self, WorkflowCompileError> {
        let (runtime, name, node_kinds) =
            Self::build_runtime(graph, config, &resources, Some(workflow_id.into()))?;
        Ok(Self {
            runtime: RuntimeKind::Checkpointing(CheckpointingRuntime::new(runtime, checkpointer)),
            name,
            node_kinds,
        })
    }

    fn build_runtime(
        graph: BuiltWorkflowGraph<S>,
        config: PregelConfig,
        resources: &WorkflowResources<S>,
        workflow_id: Option<String>,
    ) -> Result<
        (
            PregelRuntime<S, WorkflowMessage>,
            String,
            HashMap<VertexId, NodeKind>,
        ),
        WorkflowCompileError,
    > {
        let mut runtime = PregelRuntime::with_config(config);
        if let Some(id) = workflow_id {
            runtime = runtime.with_workflow_id(id);
        }

        let mut node_kinds = HashMap::new();
        for (node_id, kind) in &graph.nodes {
            let vertex = Self::create_vertex(node_id, kind.clone(), resources)?;
            runtime.add_vertex(vertex);
            node_kinds.insert(VertexId::new(node_id), kind.clone());
        }

        for (from, targets) in &graph.edges {
            for (to, label) in targets {
                if to.as_str() != END {
                    runtime.add_edge_with_label(from.as_str(), to.as_str(), label.clone());
                }
            }
        }

        runtime.set_entry(graph.entry_point.as_str());

        Ok((runtime, graph.name, node_kinds))
    }

    fn create_vertex(
        node_id: &str,
        kind: NodeKind,
        resources: &WorkflowResources<S>,
    ) -> Result<BoxedVertex<S, WorkflowMessage>, WorkflowCompileError> {
        match kind {
            NodeKind::Agent(config) => {
                let llm = resources.llm.clone().ok_or_else(|| {
                    WorkflowCompileError::MissingLlmProvider {
                        node_id: node_id.to_string(),
                    }
                })?;
                let mut vertex =
                    AgentVertex::<S>::new(node_id, config, llm, resources.tools.clone());
                if let Some(mapper) = resources.agent_outcomes.get(node_id) {
                    vertex = vertex.with_outcome_update(mapper.clone());
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::Tool(config) => {
                let tools = resources.tools.clone().ok_or_else(|| {
                    WorkflowCompileError::MissingToolRuntime {
                        node_id: node_id.to_string(),
                    }
                })?;
                let mut vertex = ToolVertex::<S>::new(node_id, config, tools);
                if let Some(mapper) = resources.tool_results.get(node_id) {
                    vertex = vertex.with_result_update(mapper.clone());
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::Router(config) => {
                if matches!(config.strategy, RoutingStrategy::LlmDecision { .. })
                    && resources.llm.is_none()
                {
                    return Err(WorkflowCompileError::MissingLlmProvider {
                        node_id: node_id.to_string(),
                    });
                }

                let mut vertex =
                    RouterVertex::<S>::new(node_id, config.clone(), resources.llm.clone());

                if matches!(config.strategy, RoutingStrategy::Custom) {
                    let predicate = resources.hooks.router_predicate(node_id).ok_or_else(|| {
                        WorkflowCompileError::MissingHook {
                            node_id: node_id.to_string(),
                            hook: node_id.to_string(),
                        }
                    })?;
                    vertex = vertex.with_predicate(predicate);
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::SubAgent(config) => {
                let executor = resources.sub_executor.clone().ok_or_else(|| {
                    WorkflowCompileError::MissingSubWorkflowExecutor {
                        node_id: node_id.to_string(),
                    }
                })?;
                let mut vertex =
                    SubAgentVertex::<S>::new(node_id, config, executor, resources.depth);
                if let Some(mapper) = resources.subagent_results.get(node_id) {
                    vertex = vertex.with_result_update(mapper.clone());
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::FanOut(config) => {
                let mut vertex = FanOutVertex::<S>::new(node_id, config.clone());
                if matches!(config.split_strategy, SplitStrategy::Custom) {
                    let splitter = resources.hooks.splitter(node_id).ok_or_else(|| {
                        WorkflowCompileError::MissingHook {
                            node_id: node_id.to_string(),
                            hook: node_id.to_string(),
                        }
                    })?;
                    vertex = vertex.with_splitter(splitter);
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::FanIn(config) => {
                let mut vertex = FanInVertex::<S>::new(node_id, config);
                if let Some(mapper) = resources.fanin_merges.get(node_id) {
                    vertex = vertex.with_merge_update(mapper.clone());
                }
                Ok(Arc::new(vertex))
            }
            NodeKind::Transform(config) => {
                let hook = match &config.hook {
                    Some(name) => Some(resources.hooks.transform(name).ok_or_else(|| {
                        WorkflowCompileError::MissingHook {
                            node_id: node_id.to_string(),
                            hook: name.clone(),
                        }
                    })?),
                    None => None,
                };
                Ok(Arc::new(TransformVertex::<S>::new(node_id, config, hook)))
            }
        }
    }

    /// Run the workflow to completion
    pub async fn run(&mut self, initial_state: S) -> Result<WorkflowResult<S>, PregelError> {
        match &mut self.runtime {
            RuntimeKind::Plain(runtime) => runtime.run(initial_state).await,
            RuntimeKind::Checkpointing(runtime) => runtime.run(initial_state).await,
        }
    }

    /// Resume from the latest checkpoint if one exists, else run fresh
    ///
    /// Requires compilation with a checkpointer.
    pub async fn run_with_recovery(
        &mut self,
        initial_state: S,
    ) -> Result<WorkflowResult<S>, PregelError> {
        match &mut self.runtime {
            RuntimeKind::Plain(_) => Err(PregelError::config_error(
                "run_with_recovery requires a workflow compiled with a checkpointer",
            )),
            RuntimeKind::Checkpointing(runtime) => runtime.run_with_recovery(initial_state).await,
        }
    }

    /// Resume from the latest checkpoint, `None` if there is none
    pub async fn resume(&mut self) -> Result<Option<WorkflowResult<S>>, PregelError> {
        match &mut self.runtime {
            RuntimeKind::Plain(_) => Err(PregelError::config_error(
                "resume requires a workflow compiled with a checkpointer",
            )),
            RuntimeKind::Checkpointing(runtime) => runtime.resume().await,
        }
    }

    /// Run from a specific checkpoint
    pub async fn run_from_checkpoint(
        &mut self,
        checkpoint: Checkpoint<S>,
    ) -> Result<WorkflowResult<S>, PregelError> {
        match &mut self.runtime {
            RuntimeKind::Plain(_) => Err(PregelError::config_error(
                "run_from_checkpoint requires a workflow compiled with a checkpointer",
            )),
            RuntimeKind::Checkpointing(runtime) => runtime.run_from_checkpoint(checkpoint).await,
        }
    }

    /// The configured checkpointer, if any
    pub fn checkpointer(&self) -> Option<&Arc<dyn Checkpointer<S>>> {
        match &self.runtime {
            RuntimeKind::Plain(_) => None,
            RuntimeKind::Checkpointing(runtime) => Some(runtime.checkpointer()),
        }
    }

    /// Whether this workflow checkpoints
    pub fn has_checkpointer(&self) -> bool {
        matches!(&self.runtime, RuntimeKind::Checkpointing(_))
    }

    /// Workflow name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.runtime().cancellation_token()
    }

    /// The underlying runtime
    pub fn runtime(&self) -> &PregelRuntime<S, WorkflowMessage> {
        match &self.runtime {
            RuntimeKind::Plain(runtime) => runtime,
            RuntimeKind::Checkpointing(runtime) => runtime.inner(),
        }
    }

    /// The underlying runtime, mutable
    pub fn runtime_mut(&mut self) -> &mut PregelRuntime<S, WorkflowMessage> {
        match &mut self.runtime {
            RuntimeKind::Plain(runtime) => runtime,
            RuntimeKind::Checkpointing(runtime) => runtime.inner_mut(),
        }
    }

    /// Mermaid diagram of the topology
    pub fn to_mermaid(&self) -> String {
        self.runtime().to_mermaid_with_kinds(&self.node_kinds)
    }

    /// Mermaid diagram with live vertex states
    pub fn to_mermaid_with_state(&self) -> String {
        self.runtime()
            .to_mermaid_with_state_and_kinds(&self.node_kinds)
    }
}
