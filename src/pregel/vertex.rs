//! Vertex abstractions for the Pregel runtime
//!
//! A vertex is one compute unit in the workflow graph. Vertices communicate
//! via messages and execute in synchronized supersteps, voting to halt when
//! they have no further work.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::PregelError;
use super::message::VertexMessage;
use super::state::{StateUpdate, WorkflowState};

/// Sentinel message target designating workflow termination
///
/// `END` never names a vertex. Messages addressed to it are dropped at the
/// commit barrier, letting the run end by quiescence.
pub const END: &str = "END";

/// Unique identifier for a vertex in the workflow graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub String);

impl VertexId {
    /// Create a new VertexId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VertexId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VertexId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vertex execution state (the "vote to halt" mechanism)
///
/// - `Active`: will compute in the next superstep unconditionally
/// - `Halted`: voted to halt; reactivates when a message arrives
/// - `Completed`: finished for good; messages to it are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VertexState {
    #[default]
    Active,
    Halted,
    Completed,
}

impl VertexState {
    pub fn is_active(&self) -> bool {
        matches!(self, VertexState::Active)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, VertexState::Halted)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, VertexState::Completed)
    }
}

/// Context provided to a vertex during computation
///
/// Gives the vertex its combined inbox, the superstep index, a read-only
/// view of the committed state, a snapshot of every vertex's halt state,
/// and an outbox for addressing messages to other vertices. Messages land
/// in their targets' inboxes at the start of the next superstep.
pub struct ComputeContext<'a, S, M: VertexMessage> {
    /// Messages received from other vertices, post-combiner
    pub messages: &'a [M],
    /// Current superstep number (0-indexed)
    pub superstep: u64,
    /// Read-only view of the committed workflow state
    pub state: &'a S,
    /// Snapshot of vertex halt states as of the start of this superstep
    vertex_states: &'a HashMap<VertexId, VertexState>,
    /// Outgoing messages (target vertex -> messages)
    outbox: HashMap<VertexId, Vec<M>>,
    /// Current vertex ID
    vertex_id: VertexId,
}

impl<'a, S, M: VertexMessage> ComputeContext<'a, S, M> {
    /// Create a new compute context
    pub fn new(
        vertex_id: VertexId,
        messages: &'a [M],
        superstep: u64,
        state: &'a S,
        vertex_states: &'a HashMap<VertexId, VertexState>,
    ) -> Self {
        Self {
            messages,
            superstep,
            state,
            vertex_states,
            outbox: HashMap::new(),
            vertex_id,
        }
    }

    /// Get the current vertex ID
    pub fn id(&self) -> &VertexId {
        &self.vertex_id
    }

    /// Send a message to another vertex
    ///
    /// Delivered at the start of the next superstep.
    pub fn send_message(&mut self, target: impl Into<VertexId>, message: M) {
        let target = target.into();
        self.outbox.entry(target).or_default().push(message);
    }

    /// Send a message to multiple targets
    pub fn broadcast(
        &mut self,
        targets: impl IntoIterator<Item = impl Into<VertexId>>,
        message: M,
    ) {
        for target in targets {
            self.send_message(target.into(), message.clone());
        }
    }

    /// Check if this is the first superstep
    pub fn is_first_superstep(&self) -> bool {
        self.superstep == 0
    }

    /// Check if any messages were received
    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Get the count of received messages
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Look up another vertex's halt state as of this superstep
    pub fn vertex_state(&self, id: &VertexId) -> Option<VertexState> {
        self.vertex_states.get(id).copied()
    }

    /// Whether the named vertex has permanently completed
    pub fn is_vertex_completed(&self, id: &VertexId) -> bool {
        matches!(self.vertex_states.get(id), Some(VertexState::Completed))
    }

    /// Consume the context and return the outbox
    pub fn into_outbox(self) -> HashMap<VertexId, Vec<M>> {
        self.outbox
    }
}

/// The core vertex trait for Pregel computation
///
/// During each superstep, every runnable vertex has `compute` called once,
/// concurrently with its peers, against the same committed state snapshot.
///
/// # Example
///
/// ```ignore
/// struct CountdownVertex {
///     id: VertexId,
/// }
///
/// #[async_trait]
/// impl Vertex<TickState, WorkflowMessage> for CountdownVertex {
///     fn id(&self) -> &VertexId {
///         &self.id
///     }
///
///     async fn compute(
///         &self,
///         ctx: &mut ComputeContext<'_, TickState, WorkflowMessage>,
///     ) -> Result<ComputeResult<TickUpdate>, PregelError> {
///         ctx.send_message(self.id.clone(), WorkflowMessage::Activate);
///         Ok(ComputeResult::halt(TickUpdate { delta: -1 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Vertex<S, M>: Send + Sync
where
    S: WorkflowState,
    M: VertexMessage,
{
    /// The vertex's unique identifier, stable across the run
    fn id(&self) -> &VertexId;

    /// Execute the vertex's computation
    ///
    /// May perform I/O (LLM calls, tool invocations). Returns a state
    /// update and the vertex's next halt state.
    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, M>,
    ) -> Result<ComputeResult<S::Update>, PregelError>;

    /// Combine the inbox before `compute` sees it
    ///
    /// Default is the identity. Override to deduplicate or aggregate when
    /// the reduction is commutative and associative.
    fn combine_messages(&self, messages: Vec<M>) -> Vec<M> {
        messages
    }

    /// Called when the vertex receives messages while halted
    ///
    /// Default reactivates the vertex.
    fn on_reactivation(&self, _messages: &[M]) -> VertexState {
        VertexState::Active
    }

    /// Whether a failure of this vertex may be retried
    ///
    /// Defaults to the error's own recoverability. Router vertices declare
    /// routing failures fatal; agent vertices keep transient LLM and tool
    /// I/O retryable.
    fn is_retryable(&self, error: &PregelError) -> bool {
        error.is_recoverable()
    }
}

/// Result of a vertex computation
#[derive(Debug, Clone)]
pub struct ComputeResult<U: StateUpdate> {
    /// State update to merge at the end of the superstep
    pub update: U,
    /// The vertex's next halt state
    pub state: VertexState,
}

impl<U: StateUpdate> ComputeResult<U> {
    /// Keep the vertex active for the next superstep
    pub fn active(update: U) -> Self {
        Self {
            update,
            state: VertexState::Active,
        }
    }

    /// Vote to halt; reactivated by incoming messages
    pub fn halt(update: U) -> Self {
        Self {
            update,
            state: VertexState::Halted,
        }
    }

    /// Complete the vertex permanently
    pub fn complete(update: U) -> Self {
        Self {
            update,
            state: VertexState::Completed,
        }
    }

    /// Create a result with an explicit state
    pub fn with_state(update: U, state: VertexState) -> Self {
        Self { update, state }
    }
}

/// Boxed vertex for dynamic dispatch
pub type BoxedVertex<S, M> = Arc<dyn Vertex<S, M>>;
