//! Error types for the Pregel runtime

use thiserror::Error;

use super::vertex::VertexId;

/// Errors that can occur during workflow execution
#[derive(Debug, Error)]
pub enum PregelError {
    /// Maximum supersteps exceeded
    #[error("max supersteps exceeded: {0}")]
    MaxSuperstepsExceeded(u64),

    /// Vertex computation timed out
    #[error("vertex timeout: {0}")]
    VertexTimeout(VertexId),

    /// Error during vertex computation
    #[error("vertex error in {vertex_id}: {message}")]
    VertexError {
        vertex_id: VertexId,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A routing decision could not be resolved, or a message was addressed
    /// to a vertex that does not exist
    #[error("routing error in {vertex_id}: {reason}")]
    RoutingError { vertex_id: VertexId, reason: String },

    /// Sub-workflow nesting exceeded its depth limit
    #[error("recursion limit in {vertex_id}: depth {depth}, limit {limit}")]
    RecursionLimit {
        vertex_id: VertexId,
        depth: usize,
        limit: usize,
    },

    /// Error in workflow state management
    #[error("state error: {0}")]
    StateError(String),

    /// Error in checkpointing
    #[error("checkpoint error: {0}")]
    CheckpointError(String),

    /// Checkpoint belongs to a different workflow instance
    #[error("checkpoint workflow mismatch: expected {expected}, found {found}")]
    CheckpointMismatch { expected: String, found: String },

    /// Invalid runtime configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Workflow cancelled by the caller
    #[error("workflow cancelled")]
    Cancelled,

    /// Workflow execution timed out
    #[error("workflow timeout after {0:?}")]
    WorkflowTimeout(std::time::Duration),

    /// A vertex kept failing past its retry budget
    #[error("max retries exceeded for vertex {vertex_id}: {attempts} attempts")]
    MaxRetriesExceeded { vertex_id: VertexId, attempts: u32 },
}

impl PregelError {
    /// Create a vertex error with a message
    pub fn vertex_error(vertex_id: impl Into<VertexId>, message: impl Into<String>) -> Self {
        Self::VertexError {
            vertex_id: vertex_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a vertex error wrapping an underlying error
    pub fn vertex_error_with_source(
        vertex_id: impl Into<VertexId>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::VertexError {
            vertex_id: vertex_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a routing error
    pub fn routing_error(vertex_id: impl Into<VertexId>, reason: impl Into<String>) -> Self {
        Self::RoutingError {
            vertex_id: vertex_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a recursion limit error
    pub fn recursion_limit(vertex_id: impl Into<VertexId>, depth: usize, limit: usize) -> Self {
        Self::RecursionLimit {
            vertex_id: vertex_id.into(),
            depth,
            limit,
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint_error(message: impl Into<String>) -> Self {
        Self::CheckpointError(message.into())
    }

    /// Create a state error
    pub fn state_error(message: impl Into<String>) -> Self {
        Self::StateError(message.into())
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a checkpoint mismatch error
    pub fn checkpoint_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::CheckpointMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether the error class is transient enough to retry
    ///
    /// Vertex kinds refine this via `Vertex::is_retryable`; routing and
    /// budget errors are always fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PregelError::VertexTimeout(_) | PregelError::VertexError { .. }
        )
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PregelError::VertexTimeout(_) | PregelError::WorkflowTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(PregelError: Send, Sync);

    #[test]
    fn display_max_supersteps() {
        let err = PregelError::MaxSuperstepsExceeded(100);
        assert_eq!(format!("{}", err), "max supersteps exceeded: 100");
    }

    #[test]
    fn vertex_error_fields() {
        let err = PregelError::vertex_error("node1", "computation failed");
        match err {
            PregelError::VertexError {
                vertex_id,
                message,
                source,
            } => {
                assert_eq!(vertex_id.as_str(), "node1");
                assert_eq!(message, "computation failed");
                assert!(source.is_none());
            }
            _ => panic!("wrong error type"),
        }
    }

    #[test]
    fn routing_error_fields() {
        let err = PregelError::routing_error("router", "no matching branch");
        match err {
            PregelError::RoutingError { vertex_id, reason } => {
                assert_eq!(vertex_id.as_str(), "router");
                assert_eq!(reason, "no matching branch");
            }
            _ => panic!("wrong error type"),
        }
    }

    #[test]
    fn recursion_limit_fields() {
        let err = PregelError::recursion_limit("nested", 6, 5);
        match err {
            PregelError::RecursionLimit {
                vertex_id,
                depth,
                limit,
            } => {
                assert_eq!(vertex_id.as_str(), "nested");
                assert_eq!(depth, 6);
                assert_eq!(limit, 5);
            }
            _ => panic!("wrong error type"),
        }
    }

    #[test]
    fn recoverability_classification() {
        assert!(PregelError::VertexTimeout(VertexId::from("x")).is_recoverable());
        assert!(PregelError::vertex_error("x", "err").is_recoverable());

        assert!(!PregelError::MaxSuperstepsExceeded(100).is_recoverable());
        assert!(!PregelError::Cancelled.is_recoverable());
        assert!(!PregelError::routing_error("r", "no branch").is_recoverable());
        assert!(!PregelError::recursion_limit("x", 5, 3).is_recoverable());
        assert!(!PregelError::checkpoint_error("disk full").is_recoverable());
    }

    #[test]
    fn timeout_classification() {
        assert!(PregelError::VertexTimeout(VertexId::from("slow")).is_timeout());
        assert!(PregelError::WorkflowTimeout(std::time::Duration::from_secs(1)).is_timeout());
        assert!(!PregelError::Cancelled.is_timeout());
    }
}
