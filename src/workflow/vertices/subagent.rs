//! SubAgentVertex: delegation to a nested workflow
//!
//! Executes a named sub-workflow through the [`SubWorkflowExecutor`]
//! capability against a projection of the parent state, guarded by a
//! recursion-depth counter. The nested result is projected back into the
//! parent via an output mapping and an optional update mapper.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId};
use crate::workflow::node::SubAgentNodeConfig;

/// Executes nested workflows on behalf of SubAgent vertices
///
/// Implementations typically wrap a compiled workflow, or a single LLM
/// call for the simple kind. `depth` is the nesting level of the requested
/// execution; implementations spawning further sub-workflows must pass
/// `depth` onward so the recursion guard keeps working. Any filesystem or
/// sandbox isolation between parent and child belongs to the
/// implementation; the engine only hands over the input value.
#[async_trait]
pub trait SubWorkflowExecutor: Send + Sync {
    /// Run the named sub-workflow with the given input
    async fn execute(
        &self,
        agent_name: &str,
        input: Value,
        depth: usize,
    ) -> Result<Value, PregelError>;
}

/// Maps the projected sub-workflow result into a parent state update
pub type SubResultUpdateFn<S> =
    Arc<dyn Fn(&Value, &S) -> <S as WorkflowState>::Update + Send + Sync>;

/// A vertex delegating to a nested workflow
pub struct SubAgentVertex<S: WorkflowState> {
    id: VertexId,
    config: SubAgentNodeConfig,
    executor: Arc<dyn SubWorkflowExecutor>,
    /// Nesting depth of the graph this vertex lives in (0 = root)
    depth: usize,
    result_update: Option<SubResultUpdateFn<S>>,
}

impl<S: WorkflowState> SubAgentVertex<S> {
    pub fn new(
        id: impl Into<VertexId>,
        config: SubAgentNodeConfig,
        executor: Arc<dyn SubWorkflowExecutor>,
        depth: usize,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            executor,
            depth,
            result_update: None,
        }
    }

    /// Map the projected result into a parent state update
    pub fn with_result_update(mut self, f: SubResultUpdateFn<S>) -> Self {
        self.result_update = Some(f);
        self
    }

    /// Concatenated prompt text carried by inbound messages
    fn extract_prompt(&self, messages: &[WorkflowMessage]) -> String {
        messages
            .iter()
            .filter_map(|m| match m {
                WorkflowMessage::Data { value, .. } => {
                    Some(value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()))
                }
                WorkflowMessage::Completed { result, .. } => result.clone(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Input value: prompt plus the mapped parent-state projection
    fn build_input(&self, state: &S, prompt: &str) -> Value
    where
        S: Serialize,
    {
        let mut input = json!({ "prompt": prompt });

        if !self.config.input_mapping.is_empty() {
            if let Ok(state_json) = serde_json::to_value(state) {
                for (input_key, state_path) in &self.config.input_mapping {
                    let mut current = Some(&state_json);
                    for part in state_path.split('.') {
                        current = current.and_then(|v| v.get(part));
                    }
                    if let Some(value) = current {
                        input[input_key.as_str()] = value.clone();
                    } else {
                        tracing::warn!(
                            vertex_id = %self.id,
                            key = %input_key,
                            path = %state_path,
                            "input mapping path not found in parent state"
                        );
                    }
                }
            }
        }

        input
    }

    /// Apply the output mapping to the raw sub-workflow result
    fn project_output(&self, result: Value) -> Value {
        if self.config.output_mapping.is_empty() {
            return result;
        }

        let mut projected = json!({});
        for (output_key, result_key) in &self.config.output_mapping {
            match result.get(result_key.as_str()) {
                Some(value) => projected[output_key.as_str()] = value.clone(),
                None => {
                    tracing::warn!(
                        vertex_id = %self.id,
                        key = %result_key,
                        "output mapping key missing from sub-workflow result"
                    );
                }
            }
        }
        projected
    }
}

#[async_trait]
impl<S: WorkflowState + Serialize> Vertex<S, WorkflowMessage> for SubAgentVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        // The nested execution sits one level below this vertex.
        let child_depth = self.depth + 1;
        if child_depth > self.config.max_recursion {
            return Err(PregelError::recursion_limit(
                self.id.clone(),
                child_depth,
                self.config.max_recursion,
            ));
        }

        let prompt = self.extract_prompt(ctx.messages);
        let input = self.build_input(ctx.state, &prompt);

        tracing::info!(
            vertex_id = %self.id,
            agent = %self.config.agent_name,
            depth = child_depth,
            superstep = ctx.superstep,
            "delegating to sub-workflow"
        );

        let execution = self
            .executor
            .execute(&self.config.agent_name, input, child_depth);

        let result = match self.config.timeout {
            Some(deadline) => tokio::time::timeout(deadline, execution)
                .await
                .map_err(|_| {
                    PregelError::vertex_error(
                        self.id.clone(),
                        format!("sub-workflow '{}' timed out", self.config.agent_name),
                    )
                })??,
            None => execution.await?,
        };

        let projected = self.project_output(result);

        let update = match &self.result_update {
            Some(f) => f(&projected, ctx.state),
            None => S::Update::empty(),
        };

        if let Some(target) = &self.config.output_target {
            let summary = projected
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| projected.to_string());
            ctx.send_message(
                target.as_str(),
                WorkflowMessage::Data {
                    key: "subagent_result".to_string(),
                    value: projected,
                },
            );
            ctx.send_message(
                target.as_str(),
                WorkflowMessage::Completed {
                    source: self.id.clone(),
                    result: Some(summary),
                },
            );
        }

        Ok(ComputeResult::halt(update))
    }
}
