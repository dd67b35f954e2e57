//! Message types for vertex communication
//!
//! Vertices communicate by addressing messages to each other. Messages sent
//! in superstep N are queued by the runtime and delivered all at once at the
//! start of superstep N+1.

use serde::{Deserialize, Serialize};

use super::vertex::VertexId;

/// Trait bound for vertex messages
pub trait VertexMessage: Clone + Send + Sync + 'static {
    /// The payload used to wake a vertex without carrying data
    fn activation_message() -> Self;
}

/// Standard message types for workflow coordination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowMessage {
    /// Wake the target vertex
    Activate,

    /// Pass data between vertices
    Data {
        key: String,
        value: serde_json::Value,
    },

    /// Signal completion of upstream work
    Completed {
        source: VertexId,
        result: Option<String>,
    },

    /// Ask the target vertex to halt
    Halt,
}

impl VertexMessage for WorkflowMessage {
    fn activation_message() -> Self {
        WorkflowMessage::Activate
    }
}

impl WorkflowMessage {
    /// Create a Data message
    pub fn data(key: impl Into<String>, value: impl Serialize) -> Self {
        Self::Data {
            key: key.into(),
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Create a Completed message
    pub fn completed(source: impl Into<VertexId>, result: Option<String>) -> Self {
        Self::Completed {
            source: source.into(),
            result,
        }
    }

    /// The payload value, if this message carries one
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            _ => None,
        }
    }
}
