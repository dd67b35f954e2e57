//! Vertex implementations backing the node kinds
//!
//! Each vertex type implements the `Vertex` trait and corresponds to one
//! `NodeKind` variant.
//!
//! - [`agent::AgentVertex`]: LLM loop with tool calling
//! - [`tool::ToolVertex`]: single tool invocation
//! - [`router::RouterVertex`]: conditional dispatch
//! - [`subagent::SubAgentVertex`]: nested workflow delegation
//! - [`parallel::FanOutVertex`] / [`parallel::FanInVertex`]: parallel barrier
//! - [`transform::TransformVertex`]: pure state transform / passthrough

pub mod agent;
pub mod parallel;
pub mod router;
pub mod subagent;
pub mod tool;
pub mod transform;

pub use agent::{AgentOutcome, AgentVertex, OutcomeUpdateFn};
pub use parallel::{FanInVertex, FanOutVertex, MergeUpdateFn};
pub use router::RouterVertex;
pub use subagent::{SubAgentVertex, SubResultUpdateFn, SubWorkflowExecutor};
pub use tool::{ResultUpdateFn, ToolVertex};
pub use transform::TransformVertex;
