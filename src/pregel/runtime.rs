//! Pregel runtime - core execution engine for workflow graphs
//!
//! The runtime drives a workflow through synchronized supersteps. Each
//! superstep follows the sequence: deliver -> combine -> compute -> commit.
//! Vertices run concurrently inside one superstep against the same committed
//! state snapshot; updates, halt transitions, and outgoing messages are
//! committed only after every runnable vertex has finished.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::checkpoint::{Checkpoint, Checkpointer};
use super::config::PregelConfig;
use super::error::PregelError;
use super::message::{VertexMessage, WorkflowMessage};
use super::state::WorkflowState;
use super::vertex::{BoxedVertex, ComputeContext, ComputeResult, VertexId, VertexState, END};

/// Metadata for an edge between vertices
///
/// Edges never carry messages; they document topology for validation and
/// diagram rendering. Message routing is always explicit inside `compute`.
#[derive(Debug, Clone, Default)]
pub struct EdgeMetadata {
    /// Optional label shown on rendered diagrams
    pub label: Option<String>,
}

/// Result of a workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowResult<S: WorkflowState> {
    /// Final workflow state
    pub state: S,
    /// Number of supersteps executed
    pub supersteps: u64,
    /// Whether the workflow reached quiescence or a terminal state
    pub completed: bool,
    /// Final halt states of all vertices
    pub vertex_states: HashMap<VertexId, VertexState>,
}

/// What one superstep produced, gathered before the commit decision
struct SuperstepCommit<U> {
    /// Successful updates, sorted by vertex id for deterministic merging
    updates: Vec<U>,
    /// First fatal failure observed this superstep, surfaced after commit
    failure: Option<PregelError>,
}

/// Pregel runtime for executing workflow graphs
///
/// Owns the immutable vertex set and the mutable halt map and inbound
/// message queues. Both maps are touched only between supersteps; the
/// parallel compute phase sees immutable snapshots.
pub struct PregelRuntime<S, M>
where
    S: WorkflowState,
    M: VertexMessage,
{
    config: PregelConfig,
    vertices: HashMap<VertexId, BoxedVertex<S, M>>,
    vertex_states: HashMap<VertexId, VertexState>,
    message_queues: HashMap<VertexId, Vec<M>>,
    edges: HashMap<VertexId, Vec<(VertexId, Option<EdgeMetadata>)>>,
    retry_counts: HashMap<VertexId, u32>,
    entry_vertex: Option<VertexId>,
    workflow_id: String,
    cancellation: CancellationToken,
}

impl<S, M> PregelRuntime<S, M>
where
    S: WorkflowState,
    M: VertexMessage,
{
    /// Create a new runtime with default configuration
    pub fn new() -> Self {
        Self::with_config(PregelConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: PregelConfig) -> Self {
        Self {
            config,
            vertices: HashMap::new(),
            vertex_states: HashMap::new(),
            message_queues: HashMap::new(),
            edges: HashMap::new(),
            retry_counts: HashMap::new(),
            entry_vertex: None,
            workflow_id: uuid::Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the workflow id used to namespace checkpoints
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    /// Get the workflow id
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// A token that cancels this workflow when triggered
    ///
    /// Cancellation is observed at superstep boundaries: in-flight vertex
    /// computations finish (bounded by `vertex_timeout`), the superstep
    /// commits, and the run returns `PregelError::Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Add a vertex to the runtime
    ///
    /// Vertices start `Halted`; designate one entry via `set_entry` and
    /// wake the rest with messages.
    pub fn add_vertex(&mut self, vertex: BoxedVertex<S, M>) -> &mut Self {
        let id = vertex.id().clone();
        self.vertex_states.insert(id.clone(), VertexState::Halted);
        self.message_queues.insert(id.clone(), Vec::new());
        self.vertices.insert(id, vertex);
        self
    }

    /// Add a topology edge between vertices (metadata only)
    pub fn add_edge(&mut self, from: impl Into<VertexId>, to: impl Into<VertexId>) -> &mut Self {
        self.add_edge_with_label(from, to, None)
    }

    /// Add a topology edge with a diagram label
    pub fn add_edge_with_label(
        &mut self,
        from: impl Into<VertexId>,
        to: impl Into<VertexId>,
        label: Option<String>,
    ) -> &mut Self {
        let from = from.into();
        let to = to.into();
        let metadata = label.map(|l| EdgeMetadata { label: Some(l) });
        self.edges.entry(from).or_default().push((to, metadata));
        self
    }

    /// Set the entry vertex; it alone starts `Active`
    pub fn set_entry(&mut self, entry: impl Into<VertexId>) -> &mut Self {
        let entry_id = entry.into();
        for state in self.vertex_states.values_mut() {
            if state.is_active() {
                *state = VertexState::Halted;
            }
        }
        if let Some(state) = self.vertex_states.get_mut(&entry_id) {
            *state = VertexState::Active;
        }
        self.entry_vertex = Some(entry_id);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &PregelConfig {
        &self.config
    }

    /// The designated entry vertex, if one has been set
    pub fn entry_vertex(&self) -> Option<&VertexId> {
        self.entry_vertex.as_ref()
    }

    /// Run the workflow to completion
    ///
    /// Enforces the configured `workflow_timeout` on total wall time.
    pub async fn run(&mut self, initial_state: S) -> Result<WorkflowResult<S>, PregelError> {
        let workflow_timeout = self.config.workflow_timeout;
        match timeout(workflow_timeout, self.run_inner(initial_state, 0)).await {
            Ok(result) => result,
            Err(_) => Err(PregelError::WorkflowTimeout(workflow_timeout)),
        }
    }

    /// Internal run loop, extracted for timeout wrapping and resume
    async fn run_inner(
        &mut self,
        initial_state: S,
        start_superstep: u64,
    ) -> Result<WorkflowResult<S>, PregelError> {
        let mut state = initial_state;
        let mut superstep = start_superstep;

        loop {
            if self.should_terminate(&state) {
                return Ok(WorkflowResult {
                    state,
                    supersteps: superstep,
                    completed: true,
                    vertex_states: self.vertex_states.clone(),
                });
            }

            if superstep >= self.config.max_supersteps {
                return Err(PregelError::MaxSuperstepsExceeded(superstep));
            }

            if self.cancellation.is_cancelled() {
                tracing::info!(workflow_id = %self.workflow_id, superstep, "workflow cancelled");
                return Err(PregelError::Cancelled);
            }

            let commit = self.execute_superstep(superstep, &state).await?;
            state = state.apply_updates(commit.updates);
            superstep += 1;

            if let Some(failure) = commit.failure {
                return Err(failure);
            }
        }
    }

    /// Check if the workflow should terminate
    ///
    /// Either the state is terminal, or every vertex has voted to halt and
    /// no messages are pending (quiescence).
    fn should_terminate(&self, state: &S) -> bool {
        if state.is_terminal() {
            return true;
        }

        let all_inactive = self.vertex_states.values().all(|s| !s.is_active());
        let no_pending_messages = self.message_queues.values().all(|q| q.is_empty());

        all_inactive && no_pending_messages
    }

    /// Execute a single superstep
    async fn execute_superstep(
        &mut self,
        superstep: u64,
        state: &S,
    ) -> Result<SuperstepCommit<S::Update>, PregelError> {
        // Deliver: drain queues and run each vertex's combiner over its inbox.
        let inboxes = self.deliver_messages();

        // Reactivate halted vertices that received messages. Completed
        // vertices never come back; their queues were already dropped at
        // routing time.
        for (vertex_id, messages) in &inboxes {
            if messages.is_empty() {
                continue;
            }
            if let Some(vertex_state) = self.vertex_states.get_mut(vertex_id) {
                if vertex_state.is_halted() {
                    if let Some(vertex) = self.vertices.get(vertex_id) {
                        *vertex_state = vertex.on_reactivation(messages);
                    }
                }
            }
        }

        self.compute_and_commit(superstep, state, inboxes).await
    }

    /// Drain pending messages into per-vertex inboxes, combined
    fn deliver_messages(&mut self) -> HashMap<VertexId, Vec<M>> {
        let mut inboxes = HashMap::new();
        for (vertex_id, queue) in &mut self.message_queues {
            let drained = std::mem::take(queue);
            let combined = match self.vertices.get(vertex_id) {
                Some(vertex) if !drained.is_empty() => vertex.combine_messages(drained),
                _ => drained,
            };
            inboxes.insert(vertex_id.clone(), combined);
        }
        inboxes
    }

    /// Run all active vertices in parallel, then commit the superstep
    async fn compute_and_commit(
        &mut self,
        superstep: u64,
        state: &S,
        mut inboxes: HashMap<VertexId, Vec<M>>,
    ) -> Result<SuperstepCommit<S::Update>, PregelError> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let vertex_timeout = self.config.vertex_timeout;

        // Immutable snapshot every vertex observes this superstep.
        let states_snapshot = Arc::new(self.vertex_states.clone());

        let runnable: Vec<VertexId> = self
            .vertex_states
            .iter()
            .filter(|(_, s)| s.is_active())
            .map(|(id, _)| id.clone())
            .collect();

        let mut handles = Vec::with_capacity(runnable.len());

        for vertex_id in runnable {
            let vertex = match self.vertices.get(&vertex_id) {
                Some(v) => Arc::clone(v),
                None => continue,
            };
            let messages = inboxes.remove(&vertex_id).unwrap_or_default();
            let state_clone = state.clone();
            let snapshot = Arc::clone(&states_snapshot);
            let sem = Arc::clone(&semaphore);
            let vid = vertex_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| PregelError::state_error(format!("semaphore closed: {}", e)))?;

                let mut ctx = ComputeContext::new(
                    vid.clone(),
                    &messages,
                    superstep,
                    &state_clone,
                    snapshot.as_ref(),
                );

                let result: Result<ComputeResult<S::Update>, PregelError> =
                    match timeout(vertex_timeout, vertex.compute(&mut ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(PregelError::VertexTimeout(vid.clone())),
                    };

                let outbox = ctx.into_outbox();
                Ok::<_, PregelError>((vid, result, outbox))
            });

            handles.push(handle);
        }

        let mut new_vertex_states = HashMap::new();
        let mut updates: Vec<(VertexId, S::Update)> = Vec::new();
        let mut outboxes: Vec<(VertexId, HashMap<VertexId, Vec<M>>)> = Vec::new();
        let mut failure: Option<PregelError> = None;

        for handle in handles {
            let joined = handle.await.map_err(|e| {
                PregelError::state_error(format!("vertex task join error: {}", e))
            })?;
            let (vid, result, outbox) = joined?;

            match result {
                Ok(compute_result) => {
                    self.retry_counts.remove(&vid);
                    updates.push((vid.clone(), compute_result.update));
                    new_vertex_states.insert(vid.clone(), compute_result.state);
                    outboxes.push((vid, outbox));
                }
                Err(e) => {
                    let retryable = self
                        .vertices
                        .get(&vid)
                        .map(|v| v.is_retryable(&e))
                        .unwrap_or(false);

                    if retryable {
                        let attempts = self.retry_counts.get(&vid).copied().unwrap_or(0);
                        if self.config.retry_policy.should_retry(attempts) {
                            let delay = self.config.retry_policy.delay_for_attempt(attempts);
                            tracing::warn!(
                                vertex_id = %vid,
                                superstep,
                                attempt = attempts + 1,
                                error = %e,
                                "vertex failed, retrying after backoff"
                            );
                            tokio::time::sleep(delay).await;
                            self.retry_counts.insert(vid.clone(), attempts + 1);
                            // Re-arm for the next superstep.
                            new_vertex_states.insert(vid, VertexState::Active);
                        } else if failure.is_none() {
                            failure = Some(PregelError::MaxRetriesExceeded {
                                vertex_id: vid,
                                attempts: attempts + 1,
                            });
                        }
                    } else if failure.is_none() {
                        tracing::error!(vertex_id = %vid, superstep, error = %e, "vertex failed");
                        failure = Some(e);
                    }
                }
            }
        }

        // Commit: halt transitions and messages from successful vertices
        // land even when a sibling failed this superstep.
        for (vid, new_state) in new_vertex_states {
            self.vertex_states.insert(vid, new_state);
        }

        if let Some(routing_failure) = self.route_messages(outboxes) {
            failure.get_or_insert(routing_failure);
        }

        // Deterministic merge order, regardless of completion order.
        updates.sort_by(|(a, _), (b, _)| a.cmp(b));
        let updates = updates.into_iter().map(|(_, u)| u).collect();

        Ok(SuperstepCommit { updates, failure })
    }

    /// Route outgoing messages into target queues
    ///
    /// `END` targets are dropped, completed targets are dropped with a
    /// warning, unknown targets fail the workflow after the commit.
    fn route_messages(
        &mut self,
        outboxes: Vec<(VertexId, HashMap<VertexId, Vec<M>>)>,
    ) -> Option<PregelError> {
        let mut failure = None;

        for (source, outbox) in outboxes {
            for (target, messages) in outbox {
                if target.as_str() == END {
                    continue;
                }
                match self.vertex_states.get(&target) {
                    None => {
                        if failure.is_none() {
                            failure = Some(PregelError::routing_error(
                                source.clone(),
                                format!("message addressed to unknown vertex '{}'", target),
                            ));
                        }
                    }
                    Some(VertexState::Completed) => {
                        tracing::warn!(
                            source = %source,
                            target = %target,
                            dropped = messages.len(),
                            "dropping messages addressed to completed vertex"
                        );
                    }
                    Some(_) => {
                        if let Some(queue) = self.message_queues.get_mut(&target) {
                            queue.extend(messages);
                        }
                    }
                }
            }
        }

        failure
    }

    // =========================================================================
    // Visualization
    // =========================================================================

    /// Render the workflow topology as a Mermaid diagram
    pub fn to_mermaid(&self) -> String {
        self.to_mermaid_internal(false, &HashMap::new())
    }

    /// Render with node kinds for shape-aware output
    pub fn to_mermaid_with_kinds(
        &self,
        node_kinds: &HashMap<VertexId, crate::workflow::NodeKind>,
    ) -> String {
        self.to_mermaid_internal(false, node_kinds)
    }

    /// Render with current vertex states as CSS classes
    pub fn to_mermaid_with_state(&self) -> String {
        self.to_mermaid_internal(true, &HashMap::new())
    }

    /// Render with both state colors and node shapes
    pub fn to_mermaid_with_state_and_kinds(
        &self,
        node_kinds: &HashMap<VertexId, crate::workflow::NodeKind>,
    ) -> String {
        self.to_mermaid_internal(true, node_kinds)
    }

    fn to_mermaid_internal(
        &self,
        include_state: bool,
        node_kinds: &HashMap<VertexId, crate::workflow::NodeKind>,
    ) -> String {
        use super::visualization::{render_edge, render_node, render_node_with_state, STYLE_DEFS};
        use std::fmt::Write;

        let mut output = String::new();
        let _ = writeln!(output, "graph TD");

        let mut vertex_ids: Vec<_> = self.vertices.keys().collect();
        vertex_ids.sort();

        for id in &vertex_ids {
            let kind = node_kinds.get(*id);
            let node_str = if include_state {
                render_node_with_state(id, kind, self.vertex_states.get(*id))
            } else {
                render_node(id, kind)
            };
            let _ = writeln!(output, "{}", node_str);
        }

        let _ = writeln!(output);

        let mut edge_sources: Vec<_> = self.edges.keys().collect();
        edge_sources.sort();
        for from in edge_sources {
            for (to, metadata) in &self.edges[from] {
                let label = metadata.as_ref().and_then(|m| m.label.as_deref());
                let _ = writeln!(output, "{}", render_edge(from, to, label));
            }
        }

        if include_state {
            output.push_str(STYLE_DEFS);
        }

        output
    }
}

impl<S, M> Default for PregelRuntime<S, M>
where
    S: WorkflowState,
    M: VertexMessage,
{
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Checkpointing support
// =============================================================================

/// A runtime paired with a checkpointer for crash-recoverable execution
///
/// Specialized for `WorkflowMessage` because that is the message type the
/// persisted checkpoint format carries.
pub struct CheckpointingRuntime<S>
where
    S: WorkflowState + serde::Serialize + for<'de> serde::Deserialize<'de>,
{
    /// The underlying runtime
    pub runtime: PregelRuntime<S, WorkflowMessage>,
    checkpointer: Arc<dyn Checkpointer<S>>,
}

impl<S> CheckpointingRuntime<S>
where
    S: WorkflowState + serde::Serialize + for<'de> serde::Deserialize<'de>,
{
    /// Wrap a runtime with a checkpointer
    pub fn new(
        runtime: PregelRuntime<S, WorkflowMessage>,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Self {
        Self {
            runtime,
            checkpointer,
        }
    }

    /// Get the workflow id
    pub fn workflow_id(&self) -> &str {
        &self.runtime.workflow_id
    }

    /// Run with automatic checkpointing at the configured interval
    pub async fn run(&mut self, initial_state: S) -> Result<WorkflowResult<S>, PregelError> {
        self.run_from_superstep(initial_state, 0).await
    }

    /// Resume from the latest checkpoint if one exists, else start fresh
    ///
    /// This is the recovery entry point: after a crash, calling it with the
    /// original initial state continues from the last committed checkpoint.
    pub async fn run_with_recovery(
        &mut self,
        initial_state: S,
    ) -> Result<WorkflowResult<S>, PregelError> {
        match self.checkpointer.latest().await? {
            Some(checkpoint) => self.run_from_checkpoint(checkpoint).await,
            None => self.run_from_superstep(initial_state, 0).await,
        }
    }

    /// Resume from the latest checkpoint, or `None` if there is none
    pub async fn resume(&mut self) -> Result<Option<WorkflowResult<S>>, PregelError> {
        if let Some(checkpoint) = self.checkpointer.latest().await? {
            let result = self.run_from_checkpoint(checkpoint).await?;
            Ok(Some(result))
        } else {
            Ok(None)
        }
    }

    /// Run from a specific checkpoint
    pub async fn run_from_checkpoint(
        &mut self,
        checkpoint: Checkpoint<S>,
    ) -> Result<WorkflowResult<S>, PregelError> {
        self.restore_from_checkpoint(&checkpoint)?;
        self.run_from_superstep(checkpoint.state, checkpoint.superstep)
            .await
    }

    async fn run_from_superstep(
        &mut self,
        initial_state: S,
        start_superstep: u64,
    ) -> Result<WorkflowResult<S>, PregelError> {
        let workflow_timeout = self.runtime.config.workflow_timeout;
        match timeout(
            workflow_timeout,
            self.run_inner_from(initial_state, start_superstep),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PregelError::WorkflowTimeout(workflow_timeout)),
        }
    }

    async fn run_inner_from(
        &mut self,
        initial_state: S,
        start_superstep: u64,
    ) -> Result<WorkflowResult<S>, PregelError> {
        let mut state = initial_state;
        let mut superstep = start_superstep;

        loop {
            if self.runtime.should_terminate(&state) {
                return Ok(WorkflowResult {
                    state,
                    supersteps: superstep,
                    completed: true,
                    vertex_states: self.runtime.vertex_states.clone(),
                });
            }

            if superstep >= self.runtime.config.max_supersteps {
                return Err(PregelError::MaxSuperstepsExceeded(superstep));
            }

            if self.runtime.cancellation.is_cancelled() {
                tracing::info!(
                    workflow_id = %self.runtime.workflow_id,
                    superstep,
                    "workflow cancelled; last committed checkpoint retained"
                );
                return Err(PregelError::Cancelled);
            }

            let commit = self.runtime.execute_superstep(superstep, &state).await?;
            state = state.apply_updates(commit.updates);
            superstep += 1;

            // Persist before acknowledging progress to the caller.
            if self.runtime.config.should_checkpoint(superstep) {
                self.save_checkpoint(superstep, &state).await?;
            }

            if let Some(failure) = commit.failure {
                return Err(failure);
            }
        }
    }

    /// Restore halt map, queues and retry counts from a checkpoint
    ///
    /// Validates that the checkpoint belongs to this workflow instance and
    /// that its topology fits the current vertex set.
    fn restore_from_checkpoint(&mut self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        if checkpoint.workflow_id != self.runtime.workflow_id {
            return Err(PregelError::checkpoint_mismatch(
                &self.runtime.workflow_id,
                &checkpoint.workflow_id,
            ));
        }

        let missing_in_runtime: Vec<_> = checkpoint
            .vertex_states
            .keys()
            .filter(|vid| !self.runtime.vertices.contains_key(*vid))
            .collect();

        if !missing_in_runtime.is_empty() {
            return Err(PregelError::checkpoint_error(format!(
                "checkpoint contains vertices not present in current runtime: {:?}",
                missing_in_runtime
            )));
        }

        let missing_in_checkpoint: Vec<_> = self
            .runtime
            .vertices
            .keys()
            .filter(|vid| !checkpoint.vertex_states.contains_key(*vid))
            .collect();

        if !missing_in_checkpoint.is_empty() {
            tracing::warn!(
                missing_vertices = ?missing_in_checkpoint,
                "runtime contains vertices not present in checkpoint; they start halted"
            );
        }

        for (vid, state) in &mut self.runtime.vertex_states {
            *state = checkpoint
                .vertex_states
                .get(vid)
                .copied()
                .unwrap_or(VertexState::Halted);
        }

        // Overwrite every queue so stale messages cannot leak into the resume.
        for (vid, queue) in &mut self.runtime.message_queues {
            match checkpoint.pending_messages.get(vid) {
                Some(msgs) => *queue = msgs.clone(),
                None => queue.clear(),
            }
        }

        self.runtime.retry_counts = checkpoint.retry_counts.clone();

        tracing::info!(
            workflow_id = %checkpoint.workflow_id,
            superstep = checkpoint.superstep,
            "restored from checkpoint"
        );

        Ok(())
    }

    fn create_checkpoint(&self, superstep: u64, state: &S) -> Checkpoint<S> {
        Checkpoint::new(
            &self.runtime.workflow_id,
            superstep,
            state.clone(),
            self.runtime.vertex_states.clone(),
            self.runtime.message_queues.clone(),
        )
        .with_retry_counts(self.runtime.retry_counts.clone())
    }

    async fn save_checkpoint(&self, superstep: u64, state: &S) -> Result<(), PregelError> {
        let checkpoint = self.create_checkpoint(superstep, state);
        self.checkpointer.save(&checkpoint).await?;
        tracing::info!(
            workflow_id = %self.runtime.workflow_id,
            superstep,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Get access to the underlying checkpointer
    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer<S>> {
        &self.checkpointer
    }

    /// Access the underlying runtime
    pub fn inner(&self) -> &PregelRuntime<S, WorkflowMessage> {
        &self.runtime
    }

    /// Access the underlying runtime mutably
    pub fn inner_mut(&mut self) -> &mut PregelRuntime<S, WorkflowMessage> {
        &mut self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::state::StateUpdate;
    use crate::pregel::vertex::Vertex;
    use async_trait::async_trait;
    use tokio::time::Duration;

    #[derive(Clone, Default, Debug, serde::Serialize, serde::Deserialize)]
    struct TestState {
        counter: i32,
    }

    #[derive(Clone, Debug)]
    struct TestUpdate {
        delta: i32,
    }

    impl StateUpdate for TestUpdate {
        fn empty() -> Self {
            TestUpdate { delta: 0 }
        }

        fn is_empty(&self) -> bool {
            self.delta == 0
        }
    }

    impl WorkflowState for TestState {
        type Update = TestUpdate;

        fn apply_update(&self, update: Self::Update) -> Self {
            TestState {
                counter: self.counter + update.delta,
            }
        }

        fn merge_updates(updates: Vec<Self::Update>) -> Self::Update {
            TestUpdate {
                delta: updates.iter().map(|u| u.delta).sum(),
            }
        }

        fn is_terminal(&self) -> bool {
            self.counter >= 10
        }
    }

    struct HaltVertex {
        id: VertexId,
    }

    #[async_trait]
    impl Vertex<TestState, WorkflowMessage> for HaltVertex {
        fn id(&self) -> &VertexId {
            &self.id
        }

        async fn compute(
            &self,
            _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
        ) -> Result<ComputeResult<TestUpdate>, PregelError> {
            Ok(ComputeResult::halt(TestUpdate::empty()))
        }
    }

    struct SenderVertex {
        id: VertexId,
        target: VertexId,
    }

    #[async_trait]
    impl Vertex<TestState, WorkflowMessage> for SenderVertex {
        fn id(&self) -> &VertexId {
            &self.id
        }

        async fn compute(
            &self,
            ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
        ) -> Result<ComputeResult<TestUpdate>, PregelError> {
            if ctx.is_first_superstep() {
                ctx.send_message(self.target.clone(), WorkflowMessage::Activate);
            }
            Ok(ComputeResult::halt(TestUpdate::empty()))
        }
    }

    #[tokio::test]
    async fn runtime_creation() {
        let runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        assert_eq!(runtime.config().max_supersteps, 100);
    }

    #[tokio::test]
    async fn single_vertex_halts_and_terminates() {
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("a"),
            }))
            .set_entry("a");

        let result = runtime.run(TestState::default()).await.unwrap();
        assert!(result.completed);
        assert!(result.supersteps <= 2);
    }

    #[tokio::test]
    async fn message_reactivates_halted_receiver() {
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(SenderVertex {
                id: VertexId::new("sender"),
                target: VertexId::new("receiver"),
            }))
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("receiver"),
            }))
            .set_entry("sender");

        let result = runtime.run(TestState::default()).await.unwrap();
        assert!(result.completed);
        // Sender runs at step 0, receiver at step 1.
        assert_eq!(result.supersteps, 2);
    }

    #[tokio::test]
    async fn only_entry_starts_active() {
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("a"),
            }))
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("b"),
            }))
            .set_entry("a");

        assert!(runtime.vertex_states[&VertexId::new("a")].is_active());
        assert!(runtime.vertex_states[&VertexId::new("b")].is_halted());
    }

    #[tokio::test]
    async fn max_supersteps_fence() {
        struct LoopVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for LoopVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                ctx.send_message(self.id.clone(), WorkflowMessage::Activate);
                Ok(ComputeResult::active(TestUpdate::empty()))
            }
        }

        let config = PregelConfig::default().with_max_supersteps(5);
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(LoopVertex {
                id: VertexId::new("loop"),
            }))
            .set_entry("loop");

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            PregelError::MaxSuperstepsExceeded(5)
        ));
    }

    #[tokio::test]
    async fn terminal_state_short_circuits() {
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("a"),
            }))
            .set_entry("a");

        let result = runtime.run(TestState { counter: 10 }).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.supersteps, 0);
    }

    #[tokio::test]
    async fn parallel_vertices_overlap() {
        use std::time::Instant;

        struct SlowVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for SlowVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(ComputeResult::halt(TestUpdate::empty()))
            }
        }

        struct KickoffVertex {
            id: VertexId,
            targets: Vec<VertexId>,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for KickoffVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                ctx.broadcast(self.targets.clone(), WorkflowMessage::Activate);
                Ok(ComputeResult::halt(TestUpdate::empty()))
            }
        }

        let config = PregelConfig::default().with_parallelism(4);
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);

        let targets: Vec<VertexId> = (0..4).map(|i| VertexId::new(format!("slow_{}", i))).collect();
        for id in &targets {
            runtime.add_vertex(Arc::new(SlowVertex { id: id.clone() }));
        }
        runtime
            .add_vertex(Arc::new(KickoffVertex {
                id: VertexId::new("kickoff"),
                targets,
            }))
            .set_entry("kickoff");

        let start = Instant::now();
        let result = runtime.run(TestState::default()).await.unwrap();
        let elapsed = start.elapsed();

        assert!(result.completed);
        // Four 50ms vertices with parallelism 4 should overlap, not serialize.
        assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn workflow_timeout_enforced() {
        struct SleepForeverVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for SleepForeverVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                ctx.send_message(self.id.clone(), WorkflowMessage::Activate);
                Ok(ComputeResult::active(TestUpdate::empty()))
            }
        }

        let config = PregelConfig::default()
            .with_workflow_timeout(Duration::from_millis(100))
            .with_vertex_timeout(Duration::from_secs(60))
            .with_max_supersteps(1000);

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(SleepForeverVertex {
                id: VertexId::new("slow"),
            }))
            .set_entry("slow");

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            PregelError::WorkflowTimeout(_)
        ));
    }

    #[tokio::test]
    async fn vertex_timeout_fails_the_vertex() {
        struct StuckVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for StuckVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ComputeResult::halt(TestUpdate::empty()))
            }

            fn is_retryable(&self, _error: &PregelError) -> bool {
                false
            }
        }

        let config = PregelConfig::default().with_vertex_timeout(Duration::from_millis(50));
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(StuckVertex {
                id: VertexId::new("stuck"),
            }))
            .set_entry("stuck");

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            PregelError::VertexTimeout(id) if id.as_str() == "stuck"
        ));
    }

    #[tokio::test]
    async fn retry_with_backoff_then_success() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyVertex {
            id: VertexId,
            attempts: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for FlakyVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(PregelError::vertex_error(
                        self.id.clone(),
                        format!("transient failure {}", attempt),
                    ))
                } else {
                    Ok(ComputeResult::halt(TestUpdate { delta: 1 }))
                }
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let config = PregelConfig::default()
            .with_retry_policy(
                crate::pregel::config::RetryPolicy::new(3)
                    .with_initial_backoff(Duration::from_millis(10)),
            )
            .with_max_supersteps(20);

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(FlakyVertex {
                id: VertexId::new("flaky"),
                attempts: Arc::clone(&attempts),
            }))
            .set_entry("flaky");

        let result = runtime.run(TestState::default()).await;
        assert!(result.is_ok(), "expected success after retries: {:?}", result);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap().state.counter, 1);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_fails() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct AlwaysFailsVertex {
            id: VertexId,
            attempts: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for AlwaysFailsVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(PregelError::vertex_error(self.id.clone(), "always fails"))
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let config = PregelConfig::default()
            .with_retry_policy(
                crate::pregel::config::RetryPolicy::new(3)
                    .with_initial_backoff(Duration::from_millis(1)),
            )
            .with_max_supersteps(100);

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(AlwaysFailsVertex {
                id: VertexId::new("failing"),
                attempts: Arc::clone(&attempts),
            }))
            .set_entry("failing");

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            PregelError::MaxRetriesExceeded { attempts: 4, .. }
        ));
        // One initial attempt plus three retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn message_to_unknown_vertex_is_routing_error() {
        struct MisaddressedVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for MisaddressedVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                ctx.send_message("nowhere", WorkflowMessage::Activate);
                Ok(ComputeResult::halt(TestUpdate { delta: 1 }))
            }
        }

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(MisaddressedVertex {
                id: VertexId::new("a"),
            }))
            .set_entry("a");

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(
            result.unwrap_err(),
            PregelError::RoutingError { .. }
        ));
    }

    #[tokio::test]
    async fn message_to_end_is_dropped() {
        struct FinisherVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for FinisherVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                ctx.send_message(END, WorkflowMessage::Activate);
                Ok(ComputeResult::halt(TestUpdate { delta: 1 }))
            }
        }

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(FinisherVertex {
                id: VertexId::new("a"),
            }))
            .set_entry("a");

        let result = runtime.run(TestState::default()).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.state.counter, 1);
    }

    #[tokio::test]
    async fn message_to_completed_vertex_is_dropped() {
        struct OneShotVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for OneShotVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                Ok(ComputeResult::complete(TestUpdate::empty()))
            }
        }

        struct PesterVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for PesterVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                if ctx.superstep < 2 {
                    ctx.send_message("oneshot", WorkflowMessage::Activate);
                    Ok(ComputeResult::active(TestUpdate::empty()))
                } else {
                    Ok(ComputeResult::halt(TestUpdate::empty()))
                }
            }
        }

        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(OneShotVertex {
                id: VertexId::new("oneshot"),
            }))
            .add_vertex(Arc::new(PesterVertex {
                id: VertexId::new("pester"),
            }))
            .set_entry("pester");
        // Wake the one-shot vertex alongside the entry.
        runtime
            .message_queues
            .get_mut(&VertexId::new("oneshot"))
            .unwrap()
            .push(WorkflowMessage::Activate);

        let result = runtime.run(TestState::default()).await.unwrap();
        assert!(result.completed);
        assert!(result.vertex_states[&VertexId::new("oneshot")].is_completed());
    }

    #[tokio::test]
    async fn sibling_updates_commit_when_one_vertex_fails() {
        struct GoodVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for GoodVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                Ok(ComputeResult::halt(TestUpdate { delta: 5 }))
            }
        }

        struct BadVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for BadVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                _ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                Err(PregelError::vertex_error(self.id.clone(), "boom"))
            }

            fn is_retryable(&self, _error: &PregelError) -> bool {
                false
            }
        }

        let checkpointer = Arc::new(crate::pregel::checkpoint::MemoryCheckpointer::new());
        let config = PregelConfig::default().with_checkpoint_interval(1);
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(GoodVertex {
                id: VertexId::new("good"),
            }))
            .add_vertex(Arc::new(BadVertex {
                id: VertexId::new("bad"),
            }))
            .set_entry("good");
        // Activate both for the first superstep.
        runtime
            .message_queues
            .get_mut(&VertexId::new("bad"))
            .unwrap()
            .push(WorkflowMessage::Activate);

        let mut checkpointing = CheckpointingRuntime::new(runtime, checkpointer.clone());
        let result = checkpointing.run(TestState::default()).await;
        assert!(result.is_err());

        // The good vertex's update committed and was checkpointed before the
        // failure surfaced.
        let cp = checkpointer.load(1).await.unwrap().unwrap();
        assert_eq!(cp.state.counter, 5);
    }

    #[tokio::test]
    async fn cancellation_between_supersteps() {
        struct TickerVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for TickerVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.send_message(self.id.clone(), WorkflowMessage::Activate);
                Ok(ComputeResult::halt(TestUpdate { delta: 1 }))
            }
        }

        let config = PregelConfig::default().with_max_supersteps(10_000);
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> =
            PregelRuntime::with_config(config);
        runtime
            .add_vertex(Arc::new(TickerVertex {
                id: VertexId::new("ticker"),
            }))
            .set_entry("ticker");

        let token = runtime.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = runtime.run(TestState::default()).await;
        assert!(matches!(result.unwrap_err(), PregelError::Cancelled));
    }

    #[tokio::test]
    async fn combiner_runs_before_compute() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CombiningVertex {
            id: VertexId,
            observed: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for CombiningVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                if ctx.has_messages() {
                    self.observed.store(ctx.message_count(), Ordering::SeqCst);
                }
                Ok(ComputeResult::halt(TestUpdate::empty()))
            }

            fn combine_messages(&self, messages: Vec<WorkflowMessage>) -> Vec<WorkflowMessage> {
                // Collapse any number of activations into one.
                if messages.is_empty() {
                    messages
                } else {
                    vec![WorkflowMessage::Activate]
                }
            }
        }

        struct SpammerVertex {
            id: VertexId,
        }

        #[async_trait]
        impl Vertex<TestState, WorkflowMessage> for SpammerVertex {
            fn id(&self) -> &VertexId {
                &self.id
            }

            async fn compute(
                &self,
                ctx: &mut ComputeContext<'_, TestState, WorkflowMessage>,
            ) -> Result<ComputeResult<TestUpdate>, PregelError> {
                for _ in 0..5 {
                    ctx.send_message("combiner", WorkflowMessage::Activate);
                }
                Ok(ComputeResult::halt(TestUpdate::empty()))
            }
        }

        let observed = Arc::new(AtomicUsize::new(0));
        let mut runtime: PregelRuntime<TestState, WorkflowMessage> = PregelRuntime::new();
        runtime
            .add_vertex(Arc::new(SpammerVertex {
                id: VertexId::new("spammer"),
            }))
            .add_vertex(Arc::new(CombiningVertex {
                id: VertexId::new("combiner"),
                observed: Arc::clone(&observed),
            }))
            .set_entry("spammer");

        runtime.run(TestState::default()).await.unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mermaid_renders_topology() {
        let mut runtime = PregelRuntime::<TestState, WorkflowMessage>::new();
        runtime
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("start"),
            }))
            .add_vertex(Arc::new(HaltVertex {
                id: VertexId::new("finish"),
            }))
            .set_entry("start")
            .add_edge("start", "finish");

        let mermaid = runtime.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("start"));
        assert!(mermaid.contains("finish"));
        assert!(mermaid.contains("-->"));

        let with_state = runtime.to_mermaid_with_state();
        assert!(with_state.contains("classDef active"));
    }
}
