//! AgentVertex: LLM loop with tool calling
//!
//! Builds a request from the system prompt, an optional projection of the
//! workflow state, and the combined inbound messages, then iterates
//! LLM call -> tool execution -> feedback until a stop condition fires.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::llm::{ChatMessage, LlmConfig, LlmProvider};
use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId};
use crate::tools::{ToolDefinition, ToolError, ToolRuntime};
use crate::workflow::node::{AgentNodeConfig, StopCondition};

/// What an agent run produced, handed to the outcome mapper
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The final assistant message
    pub final_message: ChatMessage,
    /// Every tool result gathered along the way: (tool name, result value)
    pub tool_results: Vec<(String, serde_json::Value)>,
    /// Iterations consumed
    pub iterations: usize,
}

/// Maps an agent outcome into a state update
pub type OutcomeUpdateFn<S> =
    Arc<dyn Fn(&AgentOutcome, &S) -> <S as WorkflowState>::Update + Send + Sync>;

/// An LLM-driven agent vertex
pub struct AgentVertex<S: WorkflowState> {
    id: VertexId,
    config: AgentNodeConfig,
    llm: Arc<dyn LlmProvider>,
    tools: Option<Arc<dyn ToolRuntime>>,
    outcome_update: Option<OutcomeUpdateFn<S>>,
}

impl<S: WorkflowState> AgentVertex<S> {
    pub fn new(
        id: impl Into<VertexId>,
        config: AgentNodeConfig,
        llm: Arc<dyn LlmProvider>,
        tools: Option<Arc<dyn ToolRuntime>>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            llm,
            tools,
            outcome_update: None,
        }
    }

    /// Map the agent's outcome into a state update
    pub fn with_outcome_update(mut self, f: OutcomeUpdateFn<S>) -> Self {
        self.outcome_update = Some(f);
        self
    }

    /// Tool definitions the model may see, filtered by the allow-list
    fn available_tools(&self) -> Vec<ToolDefinition> {
        let Some(runtime) = &self.tools else {
            return Vec::new();
        };
        let definitions = runtime.definitions();
        match &self.config.allowed_tools {
            Some(allowed) => definitions
                .into_iter()
                .filter(|d| allowed.contains(&d.name))
                .collect(),
            None => definitions,
        }
    }

    fn build_llm_config(&self) -> Option<LlmConfig> {
        self.config
            .temperature
            .map(|t| LlmConfig::new("").with_temperature(t as f64))
    }

    fn check_stop_conditions(
        &self,
        message: &ChatMessage,
        iteration: usize,
        state_json: Option<&serde_json::Value>,
    ) -> bool {
        for condition in &self.config.stop_conditions {
            match condition {
                StopCondition::NoToolCalls => {
                    if !message.has_tool_calls() {
                        return true;
                    }
                }
                StopCondition::OnTool { tool_name } => {
                    if let Some(tool_calls) = &message.tool_calls {
                        if tool_calls.iter().any(|tc| &tc.name == tool_name) {
                            return true;
                        }
                    }
                }
                StopCondition::ContainsText { pattern } => {
                    if message.content.contains(pattern) {
                        return true;
                    }
                }
                StopCondition::MaxIterations { count } => {
                    if iteration + 1 >= *count {
                        return true;
                    }
                }
                StopCondition::StateMatch { field, value } => {
                    if let Some(state) = state_json {
                        if let Some(field_value) = get_field(state, field) {
                            if &field_value == value {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Execute one tool call, feeding failures back to the model when the
    /// tool simply is not available
    async fn execute_tool_call(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<Result<serde_json::Value, String>, PregelError> {
        let Some(runtime) = &self.tools else {
            return Ok(Err(format!(
                "Error: tool '{}' is not available (no tool runtime configured)",
                name
            )));
        };

        match runtime.invoke(name, args).await {
            Ok(output) => Ok(Ok(output.value)),
            Err(ToolError::NotFound(_)) => {
                let names: Vec<String> = runtime.definitions().iter().map(|d| d.name.clone()).collect();
                Ok(Err(format!(
                    "Error: tool '{}' is not available. Available tools: {:?}",
                    name, names
                )))
            }
            Err(e) => Err(PregelError::vertex_error_with_source(
                self.id.clone(),
                format!("tool '{}' execution failed", name),
                e,
            )),
        }
    }
}

/// Walk a dot-separated path through a JSON object
fn get_field(state: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = state;
    for part in path.split('.') {
        match current {
            serde_json::Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

#[async_trait]
impl<S: WorkflowState + Serialize> Vertex<S, WorkflowMessage> for AgentVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let mut messages = vec![ChatMessage::system(self.config.system_prompt.clone())];

        let state_json = serde_json::to_value(ctx.state).ok();

        if self.config.include_state {
            if let Some(state) = &state_json {
                messages.push(ChatMessage::user(format!(
                    "Current workflow state:\n{}",
                    state
                )));
            }
        }

        for msg in ctx.messages {
            if let WorkflowMessage::Data { value, .. } = msg {
                let content = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                messages.push(ChatMessage::user(content));
            }
        }

        // The model needs at least one user turn to react to.
        if messages.iter().all(|m| m.role != crate::llm::Role::User) {
            messages.push(ChatMessage::user("Begin processing."));
        }

        let available_tools = self.available_tools();
        let llm_config = self.build_llm_config();
        let mut tool_results: Vec<(String, serde_json::Value)> = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let response = self
                .llm
                .complete(&messages, &available_tools, llm_config.as_ref())
                .await
                .map_err(|e| {
                    PregelError::vertex_error_with_source(
                        self.id.clone(),
                        "llm completion failed",
                        e,
                    )
                })?;

            let assistant_message = response.message.clone();
            messages.push(assistant_message.clone());

            let stopped =
                self.check_stop_conditions(&assistant_message, iteration, state_json.as_ref());

            if stopped || !assistant_message.has_tool_calls() {
                let outcome = AgentOutcome {
                    final_message: assistant_message.clone(),
                    tool_results,
                    iterations: iteration + 1,
                };

                let update = match &self.outcome_update {
                    Some(f) => f(&outcome, ctx.state),
                    None => S::Update::empty(),
                };

                if let Some(target) = &self.config.output_target {
                    ctx.send_message(
                        target.as_str(),
                        WorkflowMessage::Data {
                            key: "response".to_string(),
                            value: serde_json::Value::String(assistant_message.content),
                        },
                    );
                }

                return Ok(ComputeResult::halt(update));
            }

            // Tool phase: run every requested call and feed results back.
            let tool_calls = assistant_message.tool_calls.clone().unwrap_or_default();
            for tool_call in tool_calls {
                match self
                    .execute_tool_call(&tool_call.name, tool_call.arguments.clone())
                    .await?
                {
                    Ok(value) => {
                        let rendered = match &value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        messages.push(ChatMessage::tool(rendered, &tool_call.id));
                        tracing::debug!(
                            vertex_id = %self.id,
                            tool = %tool_call.name,
                            "tool executed"
                        );
                        tool_results.push((tool_call.name.clone(), value));
                    }
                    Err(unavailable) => {
                        messages.push(ChatMessage::tool(unavailable, &tool_call.id));
                    }
                }
            }
        }

        Err(PregelError::vertex_error(
            self.id.clone(),
            format!(
                "agent exhausted {} iterations without stopping",
                self.config.max_iterations
            ),
        ))
    }
}
