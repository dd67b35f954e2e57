//! Tool runtime capability seam
//!
//! Tools are identified by string name and invoked with JSON arguments.
//! The engine consumes the [`ToolRuntime`] trait; [`ToolRegistry`] is the
//! in-process implementation backed by a name -> [`Tool`] map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by tool invocation
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under the requested name
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool rejected its arguments
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// The tool ran and failed
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Declared interface of a tool, presented to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// The result of a tool invocation: a string or structured value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub value: serde_json::Value,
}

impl ToolOutput {
    /// A plain-text result
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::String(content.into()),
        }
    }

    /// A structured result
    pub fn json(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Render the result for feeding back into a conversation
    pub fn as_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A single invokable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's declared interface
    fn definition(&self) -> ToolDefinition;

    /// Invoke with JSON arguments
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Dynamic tool handle
pub type DynTool = Arc<dyn Tool>;

/// The tool capability the engine consumes
///
/// Must be safe for concurrent use: multiple vertices may invoke tools in
/// the same superstep.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Definitions of every available tool
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool by name
    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// In-process tool runtime backed by a name map
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, DynTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name
    pub fn register(&mut self, tool: DynTool) -> &mut Self {
        self.tools.insert(tool.definition().name, tool);
        self
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&DynTool> {
        self.tools.get(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

#[async_trait]
impl ToolRuntime for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(args).await
    }
}
