//! TransformVertex: pure state transform
//!
//! Applies a registered transform function to the committed state and the
//! inbox, emitting the resulting update. Without a hook it is a
//! passthrough, useful as an entry or junction node.

use async_trait::async_trait;

use crate::pregel::error::PregelError;
use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::{StateUpdate, WorkflowState};
use crate::pregel::vertex::{ComputeContext, ComputeResult, Vertex, VertexId};
use crate::workflow::hooks::TransformFn;
use crate::workflow::node::TransformNodeConfig;

/// A vertex computing a pure function of the state and inbox
pub struct TransformVertex<S: WorkflowState> {
    id: VertexId,
    config: TransformNodeConfig,
    hook: Option<TransformFn<S>>,
}

impl<S: WorkflowState> TransformVertex<S> {
    pub fn new(
        id: impl Into<VertexId>,
        config: TransformNodeConfig,
        hook: Option<TransformFn<S>>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            hook,
        }
    }
}

#[async_trait]
impl<S: WorkflowState> Vertex<S, WorkflowMessage> for TransformVertex<S> {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, WorkflowMessage>,
    ) -> Result<ComputeResult<S::Update>, PregelError> {
        let update = match &self.hook {
            Some(transform) => transform(ctx.state, ctx.messages),
            None => S::Update::empty(),
        };

        for target in &self.config.forward_to {
            ctx.send_message(target.as_str(), WorkflowMessage::Activate);
        }

        Ok(ComputeResult::halt(update))
    }
}
