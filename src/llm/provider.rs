//! LLM provider trait
//!
//! The provider-agnostic completion interface agent and router vertices
//! consume. Implementations bridge to a concrete API; the engine only
//! requires `complete`, with `stream` as an optional refinement.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use super::config::{LlmConfig, TokenUsage};
use super::message::ChatMessage;
use crate::tools::ToolDefinition;

/// Errors surfaced by an LLM provider
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider rejected or failed the request
    #[error("provider error: {0}")]
    Provider(String),

    /// Transient rate-limit or capacity rejection
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The response could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A completion response
///
/// Carries the assistant message (with zero or more tool-call requests)
/// and optional token usage for cost accounting.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One chunk of a streaming completion
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
    pub is_final: bool,
    pub usage: Option<TokenUsage>,
}

/// Streaming response wrapper
pub struct LlmResponseStream {
    inner: Pin<Box<dyn Stream<Item = Result<MessageChunk, LlmError>> + Send>>,
}

impl LlmResponseStream {
    pub fn new<St>(stream: St) -> Self
    where
        St: Stream<Item = Result<MessageChunk, LlmError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Wrap a non-streaming response as a single-chunk stream
    pub fn from_complete(response: LlmResponse) -> Self {
        let chunk = MessageChunk {
            content: response.message.content.clone(),
            is_final: true,
            usage: response.usage,
        };
        Self::new(futures::stream::once(async move { Ok(chunk) }))
    }

    pub fn into_inner(
        self,
    ) -> Pin<Box<dyn Stream<Item = Result<MessageChunk, LlmError>> + Send>> {
        self.inner
    }
}

/// Provider-agnostic LLM completion
///
/// Implementations must be safe for concurrent use: multiple vertices may
/// call `complete` in the same superstep.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion
    ///
    /// `tools` lists the invocations the model may request; `config`
    /// overrides provider defaults per call.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        config: Option<&LlmConfig>,
    ) -> Result<LlmResponse, LlmError>;

    /// Generate a streaming completion
    ///
    /// Default falls back to `complete` wrapped in a one-chunk stream.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        config: Option<&LlmConfig>,
    ) -> Result<LlmResponseStream, LlmError> {
        let response = self.complete(messages, tools, config).await?;
        Ok(LlmResponseStream::from_complete(response))
    }

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Default model identifier
    fn default_model(&self) -> &str;
}
