//! RouterVertex: conditional dispatch
//!
//! Picks one target from its branch list - by state inspection, by LLM
//! decision, or by a custom predicate - and sends it a single `Activate`
//! message. Routing failures are fatal: a router that cannot decide has a
//! broken graph, and retrying will not fix it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::llm::{ChatMessage, LlmConfig, LlmProvider};
use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId, END};
use crate::workflow::hooks::RouterPredicateFn;
use crate::workflow::node::{Branch, BranchCondition, RouterNodeConfig, RoutingStrategy};

/// A vertex that routes control flow to one of its branches
pub struct RouterVertex<S: WorkflowState> {
    id: VertexId,
    config: RouterNodeConfig,
    llm: Option<Arc<dyn LlmProvider>>,
    predicate: Option<RouterPredicateFn<S>>,
}

impl<S: WorkflowState + Serialize> RouterVertex<S> {
    pub fn new(
        id: impl Into<VertexId>,
        config: RouterNodeConfig,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            llm,
            predicate: None,
        }
    }

    /// Attach the predicate backing `RoutingStrategy::Custom`
    pub fn with_predicate(mut self, predicate: RouterPredicateFn<S>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn evaluate_condition(&self, value: &Value, condition: &BranchCondition) -> bool {
        match condition {
            BranchCondition::Equals { value: expected } => value == expected,
            BranchCondition::In { values } => values.contains(value),
            BranchCondition::Matches { pattern } => {
                let Some(value_str) = value.as_str() else {
                    return false;
                };
                match regex::Regex::new(pattern) {
                    Ok(re) => re.is_match(value_str),
                    Err(_) => false,
                }
            }
            BranchCondition::IsTruthy => match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                Value::String(s) => !s.is_empty(),
                Value::Array(arr) => !arr.is_empty(),
                Value::Object(obj) => !obj.is_empty(),
                Value::Null => false,
            },
            BranchCondition::IsFalsy => !self.evaluate_condition(value, &BranchCondition::IsTruthy),
            BranchCondition::Always => true,
        }
    }

    /// Resolve a dot-separated field path against the serialized state
    fn resolve_state_field(&self, state: &S, path: &str) -> Option<Value> {
        let state_json = serde_json::to_value(state).ok()?;
        let mut current = &state_json;
        for part in path.split('.') {
            match current {
                Value::Object(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current.clone())
    }

    fn route_by_state_field(&self, state: &S, field: &str, branches: &[Branch]) -> Option<String> {
        let field_value = self.resolve_state_field(state, field)?;
        branches
            .iter()
            .find(|branch| self.evaluate_condition(&field_value, &branch.condition))
            .map(|branch| branch.target.clone())
    }

    async fn route_by_llm(
        &self,
        state: &S,
        prompt: &str,
        model: Option<&str>,
        branches: &[Branch],
    ) -> Result<Option<String>, PregelError> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            PregelError::vertex_error(
                self.id.clone(),
                "llm decision strategy requires an LLM provider",
            )
        })?;

        let state_json = serde_json::to_value(state)
            .map_err(|e| PregelError::vertex_error(self.id.clone(), e.to_string()))?;

        let mut routing_prompt = prompt.to_string();
        routing_prompt.push_str("\n\nCurrent state:\n");
        routing_prompt.push_str(&state_json.to_string());
        routing_prompt.push_str("\n\nAvailable branches:\n");
        for (i, branch) in branches.iter().enumerate() {
            routing_prompt.push_str(&format!("{}. {}\n", i + 1, branch.target));
        }
        routing_prompt
            .push_str("\nRespond with only the name of the branch that should run next.");

        let config = model.map(LlmConfig::new);
        let messages = vec![ChatMessage::user(routing_prompt)];
        let response = llm
            .complete(&messages, &[], config.as_ref())
            .await
            .map_err(|e| {
                PregelError::vertex_error_with_source(self.id.clone(), "llm routing failed", e)
            })?;

        let content = response.message.content.trim().to_string();

        for branch in branches {
            if content == branch.target
                || content.to_lowercase().contains(&branch.target.to_lowercase())
            {
                return Ok(Some(branch.target.clone()));
            }
        }

        // Numbered answers ("2") map back onto the presented list.
        if let Ok(index) = content.parse::<usize>() {
            if index > 0 && index <= branches.len() {
                return Ok(Some(branches[index - 1].target.clone()));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl<S: WorkflowState + Serialize> Vertex<S, WorkflowMessage> for RouterVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let matched = match &self.config.strategy {
            RoutingStrategy::StateField { field } => {
                self.route_by_state_field(ctx.state, field, &self.config.branches)
            }
            RoutingStrategy::LlmDecision { prompt, model } => {
                self.route_by_llm(ctx.state, prompt, model.as_deref(), &self.config.branches)
                    .await?
            }
            RoutingStrategy::Custom => {
                let predicate = self.predicate.as_ref().ok_or_else(|| {
                    PregelError::vertex_error(
                        self.id.clone(),
                        "custom routing strategy requires a registered predicate",
                    )
                })?;
                predicate(ctx.state, ctx.messages)
            }
        };

        let target = matched.or_else(|| self.config.default.clone());

        match target {
            Some(target) if target == END => {
                // Route to termination: emit nothing and let the run quiesce.
                tracing::debug!(vertex_id = %self.id, "router selected END");
            }
            Some(target) => {
                tracing::debug!(vertex_id = %self.id, target = %target, "router selected branch");
                ctx.send_message(target, WorkflowMessage::Activate);
            }
            None => {
                return Err(PregelError::routing_error(
                    self.id.clone(),
                    "no branch matched and no default branch is configured",
                ));
            }
        }

        Ok(ComputeResult::halt(S::Update::empty()))
    }

    fn is_retryable(&self, error: &PregelError) -> bool {
        // A routing decision is deterministic in the state; retrying cannot
        // change the outcome. Transient LLM failures remain retryable.
        match error {
            PregelError::RoutingError { .. } => false,
            other => other.is_recoverable(),
        }
    }
}
