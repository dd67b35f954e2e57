//! Parallel execution vertices: FanOut and FanIn
//!
//! FanOut dispatches work to multiple targets in one superstep; FanIn is
//! the matching barrier, staying unsettled until every listed source has
//! either delivered a message or permanently completed without sending.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId, VertexState};
use crate::workflow::hooks::SplitFn;
use crate::workflow::node::{FanInNodeConfig, FanOutNodeConfig, MergeStrategy, SplitStrategy};

/// Maps a merged fan-in payload into a state update
pub type MergeUpdateFn<S> =
    std::sync::Arc<dyn Fn(&Value, &S) -> <S as WorkflowState>::Update + Send + Sync>;

/// FanOut vertex: dispatches messages to multiple targets
pub struct FanOutVertex<S: WorkflowState> {
    id: VertexId,
    config: FanOutNodeConfig,
    splitter: Option<SplitFn>,
    rr_counter: Mutex<usize>,
    _phantom: std::marker::PhantomData<S>,
}

impl<S: WorkflowState> FanOutVertex<S> {
    pub fn new(id: impl Into<VertexId>, config: FanOutNodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
            splitter: None,
            rr_counter: Mutex::new(0),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Attach the splitter backing `SplitStrategy::Custom`
    pub fn with_splitter(mut self, splitter: SplitFn) -> Self {
        self.splitter = Some(splitter);
        self
    }

    fn next_target(&self) -> Option<&str> {
        if self.config.targets.is_empty() {
            return None;
        }
        let mut counter = self.rr_counter.lock().unwrap();
        let idx = *counter % self.config.targets.len();
        *counter += 1;
        Some(&self.config.targets[idx])
    }

    /// Array to split: a configured state path wins over message payloads
    fn split_items(&self, state_json: Option<&Value>, messages: &[WorkflowMessage]) -> Option<Vec<Value>> {
        if let (Some(path), Some(state)) = (&self.config.state_path, state_json) {
            let mut current = state;
            for part in path.split('.') {
                current = current.get(part)?;
            }
            return current.as_array().cloned();
        }

        messages.iter().find_map(|m| match m {
            WorkflowMessage::Data { value, .. } => value.as_array().cloned(),
            _ => None,
        })
    }
}

#[async_trait]
impl<S: WorkflowState + Serialize> Vertex<S, WorkflowMessage> for FanOutVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let targets = &self.config.targets;
        if targets.is_empty() {
            return Ok(ComputeResult::halt(S::Update::empty()));
        }

        match &self.config.split_strategy {
            SplitStrategy::Broadcast => {
                let mut forwarded = false;
                for msg in ctx.messages {
                    if let WorkflowMessage::Data { .. } = msg {
                        ctx.broadcast(targets.iter().map(|t| t.as_str()), msg.clone());
                        forwarded = true;
                    }
                }
                if !forwarded {
                    ctx.broadcast(targets.iter().map(|t| t.as_str()), WorkflowMessage::Activate);
                }
            }
            SplitStrategy::RoundRobin => {
                for msg in ctx.messages {
                    if let Some(target) = self.next_target() {
                        ctx.send_message(target, msg.clone());
                    }
                }
            }
            SplitStrategy::Split => {
                let state_json = serde_json::to_value(ctx.state).ok();
                match self.split_items(state_json.as_ref(), ctx.messages) {
                    Some(items) => {
                        for (i, item) in items.into_iter().enumerate() {
                            let target = &targets[i % targets.len()];
                            ctx.send_message(
                                target.as_str(),
                                WorkflowMessage::Data {
                                    key: format!("item_{}", i),
                                    value: item,
                                },
                            );
                        }
                    }
                    None => {
                        // Nothing splittable; fall back to waking everyone.
                        ctx.broadcast(
                            targets.iter().map(|t| t.as_str()),
                            WorkflowMessage::Activate,
                        );
                    }
                }
            }
            SplitStrategy::Custom => {
                let splitter = self.splitter.as_ref().ok_or_else(|| {
                    PregelError::vertex_error(
                        self.id.clone(),
                        "custom split strategy requires a registered splitter",
                    )
                })?;

                let payload = ctx
                    .messages
                    .iter()
                    .find_map(|m| m.payload().cloned())
                    .unwrap_or(Value::Null);

                for (i, part) in splitter(&payload, targets.len()).into_iter().enumerate() {
                    let target = &targets[i % targets.len()];
                    ctx.send_message(
                        target.as_str(),
                        WorkflowMessage::Data {
                            key: format!("part_{}", i),
                            value: part,
                        },
                    );
                }
            }
        }

        Ok(ComputeResult::halt(S::Update::empty()))
    }
}

/// FanIn vertex: barrier that merges contributions from multiple sources
///
/// Contribution accounting spans supersteps, so the ledger lives behind a
/// mutex. `Completed` messages attribute their source; plain data messages
/// are anonymous and counted. A source observed as permanently completed
/// without having sent anything contributes a null.
pub struct FanInVertex<S: WorkflowState> {
    id: VertexId,
    config: FanInNodeConfig,
    received: Mutex<Vec<(Option<String>, WorkflowMessage)>>,
    merge_update: Option<MergeUpdateFn<S>>,
}

impl<S: WorkflowState> FanInVertex<S> {
    pub fn new(id: impl Into<VertexId>, config: FanInNodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
            received: Mutex::new(Vec::new()),
            merge_update: None,
        }
    }

    /// Map the merged payload into a state update on release
    pub fn with_merge_update(mut self, f: MergeUpdateFn<S>) -> Self {
        self.merge_update = Some(f);
        self
    }

    /// Sources that completed without ever attributing a message
    fn silent_completed(
        &self,
        ctx: &ComputeContext<'_, S, WorkflowMessage>,
        named: &HashSet<String>,
    ) -> Vec<String> {
        self.config
            .sources
            .iter()
            .filter(|source| {
                !named.contains(source.as_str())
                    && ctx.is_vertex_completed(&VertexId::new(source.as_str()))
            })
            .cloned()
            .collect()
    }

    fn merge_values(&self, values: Vec<Value>) -> Value {
        match self.config.merge_strategy {
            MergeStrategy::Collect => Value::Array(values),
            MergeStrategy::First => values.into_iter().next().unwrap_or(Value::Null),
            MergeStrategy::Last => values.into_iter().next_back().unwrap_or(Value::Null),
            MergeStrategy::Concat => {
                let joined = values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Value::String(joined)
            }
            MergeStrategy::DeepMerge => {
                let mut merged = json!({});
                for value in values {
                    deep_merge(&mut merged, value);
                }
                merged
            }
        }
    }
}

/// Recursively merge `incoming` into `base`; non-objects overwrite
fn deep_merge(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, incoming) => *base_slot = incoming,
    }
}

#[async_trait]
impl<S: WorkflowState> Vertex<S, WorkflowMessage> for FanInVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let mut received = self.received.lock().unwrap();

        for msg in ctx.messages {
            let source = match msg {
                WorkflowMessage::Completed { source, .. } => Some(source.as_str().to_string()),
                _ => None,
            };
            received.push((source, msg.clone()));
        }

        let named: HashSet<String> = received
            .iter()
            .filter_map(|(source, _)| source.clone())
            .collect();
        let anonymous = received.iter().filter(|(source, _)| source.is_none()).count();
        let silent = self.silent_completed(ctx, &named);

        let expected = self.config.sources.len();
        let satisfied = named.len() + anonymous + silent.len() >= expected;

        if !satisfied {
            tracing::debug!(
                vertex_id = %self.id,
                received = named.len() + anonymous,
                expected,
                "fan-in barrier still waiting"
            );
            // Stay runnable so completed-but-silent sources are noticed.
            return Ok(ComputeResult::active(S::Update::empty()));
        }

        let entries = std::mem::take(&mut *received);
        drop(received);

        let mut values: Vec<Value> = entries
            .into_iter()
            .filter_map(|(_, msg)| match msg {
                WorkflowMessage::Data { value, .. } => Some(value),
                WorkflowMessage::Completed {
                    result: Some(result),
                    ..
                } => Some(Value::String(result)),
                _ => None,
            })
            .collect();
        // Null contribution per source that completed without sending.
        values.extend(silent.iter().map(|_| Value::Null));

        let merged = self.merge_values(values);

        tracing::debug!(vertex_id = %self.id, "fan-in barrier released");

        let update = match &self.merge_update {
            Some(f) => f(&merged, ctx.state),
            None => S::Update::empty(),
        };

        if let Some(target) = &self.config.output_target {
            let key = self
                .config
                .result_path
                .clone()
                .unwrap_or_else(|| "merged_result".to_string());
            ctx.send_message(
                target.as_str(),
                WorkflowMessage::Data { key, value: merged },
            );
            ctx.send_message(
                target.as_str(),
                WorkflowMessage::Completed {
                    source: self.id.clone(),
                    result: None,
                },
            );
        }

        Ok(ComputeResult::halt(update))
    }

    fn on_reactivation(&self, _messages: &[WorkflowMessage]) -> VertexState {
        VertexState::Active
    }
}
