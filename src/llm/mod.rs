//! LLM capability seam
//!
//! The engine never talks to a concrete model provider. Agent and router
//! vertices consume the [`LlmProvider`] trait; applications supply an
//! implementation bridging to whichever provider they use.

pub mod config;
pub mod message;
pub mod provider;

pub use config::{LlmConfig, TokenUsage};
pub use message::{ChatMessage, Role, ToolCall};
pub use provider::{LlmError, LlmProvider, LlmResponse, LlmResponseStream, MessageChunk};
