//! ToolVertex: single tool invocation
//!
//! Invokes exactly one named tool through the tool runtime capability.
//! Arguments come from the static template in config merged with values
//! resolved from the workflow state; resolved values win on key collision.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId};
use crate::tools::ToolRuntime;
use crate::workflow::node::ToolNodeConfig;

/// Maps a tool result into a state update
pub type ResultUpdateFn<S> =
    Arc<dyn Fn(&serde_json::Value, &S) -> <S as WorkflowState>::Update + Send + Sync>;

/// A vertex that invokes a single tool
pub struct ToolVertex<S: WorkflowState> {
    id: VertexId,
    config: ToolNodeConfig,
    tools: Arc<dyn ToolRuntime>,
    result_update: Option<ResultUpdateFn<S>>,
}

impl<S: WorkflowState> ToolVertex<S> {
    pub fn new(
        id: impl Into<VertexId>,
        config: ToolNodeConfig,
        tools: Arc<dyn ToolRuntime>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            tools,
            result_update: None,
        }
    }

    /// Map the invocation result into a state update
    pub fn with_result_update(mut self, f: ResultUpdateFn<S>) -> Self {
        self.result_update = Some(f);
        self
    }

    /// Static args overlaid with state-resolved args
    fn build_arguments(&self, state: &S) -> serde_json::Value
    where
        S: Serialize,
    {
        let mut args: serde_json::Map<String, serde_json::Value> =
            self.config.static_args.clone().into_iter().collect();

        if !self.config.state_arg_paths.is_empty() {
            match serde_json::to_value(state) {
                Ok(state_json) => {
                    for (arg_name, state_path) in &self.config.state_arg_paths {
                        match resolve_path(&state_json, state_path) {
                            Some(value) => {
                                args.insert(arg_name.clone(), value);
                            }
                            None => {
                                tracing::warn!(
                                    vertex_id = %self.id,
                                    arg = %arg_name,
                                    path = %state_path,
                                    "state path not found; argument omitted"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        vertex_id = %self.id,
                        error = %e,
                        "failed to serialize state for argument resolution"
                    );
                }
            }
        }

        serde_json::Value::Object(args)
    }
}

/// Walk a dot-separated path through a JSON object
fn resolve_path(root: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        match current {
            serde_json::Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

#[async_trait]
impl<S: WorkflowState + Serialize> Vertex<S, WorkflowMessage> for ToolVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let args = self.build_arguments(ctx.state);

        tracing::debug!(
            vertex_id = %self.id,
            tool = %self.config.tool_name,
            superstep = ctx.superstep,
            "invoking tool"
        );

        let invocation = self.tools.invoke(&self.config.tool_name, args);
        let output = match self.config.timeout {
            Some(deadline) => tokio::time::timeout(deadline, invocation)
                .await
                .map_err(|_| {
                    PregelError::vertex_error(
                        self.id.clone(),
                        format!("tool '{}' timed out", self.config.tool_name),
                    )
                })?,
            None => invocation.await,
        }
        .map_err(|e| {
            PregelError::vertex_error_with_source(
                self.id.clone(),
                format!("tool '{}' invocation failed", self.config.tool_name),
                e,
            )
        })?;

        let update = match &self.result_update {
            Some(f) => f(&output.value, ctx.state),
            None => S::Update::empty(),
        };

        if let Some(target) = &self.config.output_target {
            let key = self
                .config
                .result_path
                .clone()
                .unwrap_or_else(|| format!("{}_result", self.config.tool_name));
            ctx.send_message(
                target.as_str(),
                WorkflowMessage::Data {
                    key,
                    value: output.value,
                },
            );
        }

        Ok(ComputeResult::halt(update))
    }
}
