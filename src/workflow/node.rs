//! Node kinds and configuration for workflow graphs
//!
//! A graph node is one of a closed set of kinds, each carrying a
//! serializable configuration record. The compiler turns every node into
//! the matching vertex implementation.
//!
//! # Node kinds
//!
//! - **Agent**: LLM loop with tool calling
//! - **Tool**: single tool invocation
//! - **Router**: conditional dispatch based on state, LLM, or a custom predicate
//! - **SubAgent**: delegation to a nested workflow
//! - **FanOut**: parallel dispatch to multiple targets
//! - **FanIn**: barrier waiting on multiple sources
//! - **Transform**: pure state transform (the identity transform is a passthrough)

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of a node in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// An LLM-driven agent that can call tools
    Agent(AgentNodeConfig),

    /// A single tool invocation
    Tool(ToolNodeConfig),

    /// Conditional routing
    Router(RouterNodeConfig),

    /// Delegation to a nested workflow
    SubAgent(SubAgentNodeConfig),

    /// Parallel dispatch to multiple targets
    FanOut(FanOutNodeConfig),

    /// Barrier waiting on multiple sources
    FanIn(FanInNodeConfig),

    /// Pure state transform; default config is a passthrough
    Transform(TransformNodeConfig),
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Transform(TransformNodeConfig::default())
    }
}

/// Configuration for an Agent node
///
/// Agents iterate LLM call -> tool execution -> feedback until a stop
/// condition fires or `max_iterations` is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    /// System prompt for the agent
    pub system_prompt: String,

    /// Maximum internal iterations before the vertex fails
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Conditions that end the iteration loop
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,

    /// Tools the agent may use (None = everything the runtime offers)
    #[serde(default)]
    pub allowed_tools: Option<HashSet<String>>,

    /// Include a JSON projection of the workflow state in the request
    #[serde(default)]
    pub include_state: bool,

    /// Vertex to receive the final assistant message (None = no message)
    #[serde(default)]
    pub output_target: Option<String>,

    /// Sampling temperature override
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for AgentNodeConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: 10,
            stop_conditions: vec![StopCondition::NoToolCalls],
            allowed_tools: None,
            include_state: false,
            output_target: None,
            temperature: None,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

/// Conditions that end an agent's iteration loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopCondition {
    /// Stop when the model produces no tool calls
    NoToolCalls,

    /// Stop when a specific tool is called
    OnTool { tool_name: String },

    /// Stop when the assistant message contains the text
    ContainsText { pattern: String },

    /// Stop when a state field equals a value
    StateMatch {
        field: String,
        value: serde_json::Value,
    },

    /// Stop after this many iterations
    MaxIterations { count: usize },
}

/// Configuration for a Tool node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolNodeConfig {
    /// Name of the tool to invoke
    #[serde(default)]
    pub tool_name: String,

    /// Static argument template
    #[serde(default)]
    pub static_args: HashMap<String, serde_json::Value>,

    /// Argument name -> dot-separated state path; resolved values override
    /// static args with the same key
    #[serde(default)]
    pub state_arg_paths: HashMap<String, String>,

    /// Key under which the result is reported
    #[serde(default)]
    pub result_path: Option<String>,

    /// Vertex to receive the result message (None = no message)
    #[serde(default)]
    pub output_target: Option<String>,

    /// Invocation deadline
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Configuration for a Router node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterNodeConfig {
    /// How the routing decision is made
    pub strategy: RoutingStrategy,

    /// Branches, evaluated in order; first match wins
    pub branches: Vec<Branch>,

    /// Fallback target when no branch matches
    #[serde(default)]
    pub default: Option<String>,
}

impl Default for RouterNodeConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::StateField {
                field: String::new(),
            },
            branches: Vec::new(),
            default: None,
        }
    }
}

/// Strategy for making routing decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Match a state field against the branch conditions
    StateField {
        /// Dot-separated path to the field
        field: String,
    },

    /// Ask the LLM to pick a branch by name
    LlmDecision {
        /// Prompt describing the decision
        prompt: String,
        /// Model override (None = provider default)
        #[serde(default)]
        model: Option<String>,
    },

    /// User predicate registered in the hook registry under this node's id
    Custom,
}

/// One branch of a routing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Target node (or `END`)
    pub target: String,

    /// Condition gating this branch
    pub condition: BranchCondition,
}

/// Condition for a routing branch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BranchCondition {
    /// Field equals the value
    Equals { value: serde_json::Value },

    /// Field is one of the values
    In { values: Vec<serde_json::Value> },

    /// Field (as string) matches the regex
    Matches { pattern: String },

    /// Field is truthy (non-null, non-zero, non-empty, not false)
    IsTruthy,

    /// Field is falsy
    IsFalsy,

    /// Always taken; use as an explicit catch-all
    Always,
}

/// Configuration for a SubAgent node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentNodeConfig {
    /// Name of the sub-workflow to invoke
    pub agent_name: String,

    /// Maximum nesting depth before `RecursionLimit`
    #[serde(default = "default_max_recursion")]
    pub max_recursion: usize,

    /// input key -> dot-separated parent state path
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,

    /// output key -> key in the reported result
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,

    /// Vertex to receive the sub-result (None = no message)
    #[serde(default)]
    pub output_target: Option<String>,

    /// Deadline for the whole nested execution
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for SubAgentNodeConfig {
    fn default() -> Self {
        Self {
            agent_name: String::new(),
            max_recursion: 5,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            output_target: None,
            timeout: None,
        }
    }
}

fn default_max_recursion() -> usize {
    5
}

/// Configuration for a FanOut node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanOutNodeConfig {
    /// Target nodes
    pub targets: Vec<String>,

    /// How work is distributed among the targets
    #[serde(default)]
    pub split_strategy: SplitStrategy,

    /// Dot-separated state path of the array to split (Split strategy)
    #[serde(default)]
    pub state_path: Option<String>,
}

/// Work distribution strategy for a FanOut node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Send the same message to every target
    #[default]
    Broadcast,

    /// Split an array; element i goes to target i (mod target count)
    Split,

    /// Distribute incoming messages round-robin
    RoundRobin,

    /// Splitter function registered in the hook registry under this node's id
    Custom,
}

/// Configuration for a FanIn node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanInNodeConfig {
    /// Source nodes the barrier waits on
    pub sources: Vec<String>,

    /// How collected payloads are merged
    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Key under which the merged result is reported
    #[serde(default)]
    pub result_path: Option<String>,

    /// Vertex to receive the merged result (None = no message)
    #[serde(default)]
    pub output_target: Option<String>,
}

/// Merge strategy for a FanIn node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Collect all payloads into an array
    #[default]
    Collect,

    /// Recursively merge object payloads
    DeepMerge,

    /// First payload wins
    First,

    /// Last payload wins
    Last,

    /// Join string payloads with newlines
    Concat,
}

/// Configuration for a Transform node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformNodeConfig {
    /// Transform function in the hook registry (None = passthrough)
    #[serde(default)]
    pub hook: Option<String>,

    /// Vertices to activate after computing
    #[serde(default)]
    pub forward_to: Vec<String>,
}
