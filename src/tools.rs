//! Tool definition and registry.
//!
//! Tools are the only way the model acts on the page. This module provides:
//!
//! - [`Tool`] trait - Define custom tools the model can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`PageToolName`] - Tool names for the built-in page tools
//! - [`DynamicToolName`] - Tool names created at runtime
//! - [`ToolRegistry`] - Collection of available tools
//! - [`ToolContext`] - Context passed to tool execution
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use page_agent::{DynamicToolName, Tool, ToolContext, ToolResult};
//!
//! struct ReadClipboard;
//!
//! // No #[async_trait] needed - Rust 1.75+ supports native async traits
//! impl Tool for ReadClipboard {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("read_clipboard") }
//!     fn display_name(&self) -> &'static str { "Read Clipboard" }
//!     fn description(&self) -> &'static str { "Return the clipboard contents" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
//!         let text = ctx.page.execute_javascript("navigator.clipboard.readText()").await?;
//!         Ok(ToolResult::success(text.message()))
//!     }
//! }
//! ```

use crate::error::AgentError;
use crate::llm;
use crate::page::PageController;
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Tool Name Types
// ============================================================================

/// Marker trait for tool names.
///
/// Tool names must be serializable (for logging and the tool list sent to
/// the model) and deserializable (for parsing model responses). The string
/// representation is derived from serde serialization.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Helper to get string representation of a tool name via serde.
///
/// Falls back to an empty string for names that do not serialize to a JSON
/// string, which no derived `ToolName` does.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Parse a tool name from string via serde.
///
/// # Errors
/// Returns error if the string doesn't match a valid tool name.
pub fn tool_name_from_str<N: ToolName>(s: &str) -> Result<N, serde_json::Error> {
    serde_json::from_value(Value::String(s.to_owned()))
}

/// Tool names for the built-in page tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageToolName {
    ClickElementByIndex,
    InputText,
    SelectDropdownOption,
    Scroll,
    ScrollHorizontally,
    Wait,
    AskUser,
    Done,
    ExecuteJavascript,
}

impl ToolName for PageToolName {}

impl PageToolName {
    #[must_use]
    pub fn as_str(self) -> String {
        tool_name_to_string(&self)
    }
}

/// Dynamic tool name for tools registered at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

/// Context passed to tool execution
#[derive(Clone)]
pub struct ToolContext {
    /// The page the tool acts on
    pub page: Arc<dyn PageController>,
    /// Fires when the task is stopped; long-running tools should race it
    pub cancel: CancellationToken,
    /// Tool-specific metadata
    pub metadata: HashMap<String, Value>,
}

impl ToolContext {
    #[must_use]
    pub fn new(page: Arc<dyn PageController>) -> Self {
        Self {
            page,
            cancel: CancellationToken::new(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Definition of a tool that can be called by the agent.
///
/// Tools have a strongly-typed `Name` associated type that determines
/// how the tool name is serialized for the model.
///
/// # Native Async Support
///
/// This trait uses Rust's native async functions in traits (stabilized in Rust 1.75).
/// You do NOT need the `async_trait` crate to implement this trait.
pub trait Tool: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable display name for UI (e.g., "Click" vs "click_element_by_index").
    fn display_name(&self) -> &'static str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &'static str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input.
    ///
    /// An `Err` is not fatal to the task: it is recorded as a failed step
    /// whose output is the error message.
    ///
    /// # Errors
    /// Returns an error if tool execution fails.
    fn execute(
        &self,
        ctx: &ToolContext,
        input: Value,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

// ============================================================================
// Type-Erased Tool (for Registry)
// ============================================================================

/// Type-erased tool trait for registry storage.
///
/// This allows tools with different `Name` associated types to be stored
/// in the same registry by erasing the type information.
#[async_trait]
pub trait ErasedTool: Send + Sync {
    /// Get the tool name as a string.
    fn name_str(&self) -> &str;
    /// Get a human-friendly display name for the tool.
    fn display_name(&self) -> &'static str;
    /// Get the tool description.
    fn description(&self) -> &'static str;
    /// Get the JSON schema for tool inputs.
    fn input_schema(&self) -> Value;
    /// Execute the tool with the given input.
    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult>;
}

/// Wrapper that erases the Name associated type from a Tool.
struct ToolWrapper<T: Tool> {
    inner: T,
    name_cache: String,
}

impl<T: Tool> ToolWrapper<T> {
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        Self {
            inner: tool,
            name_cache,
        }
    }
}

#[async_trait]
impl<T> ErasedTool for ToolWrapper<T>
where
    T: Tool + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn display_name(&self) -> &'static str {
        self.inner.display_name()
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        self.inner.execute(ctx, input).await
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of available tools.
///
/// Names are kept sorted so the tool list sent to the model is stable
/// between steps. Registering a name that already exists replaces the
/// previous handler; removing a name also removes it from the schema set
/// offered to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ErasedTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        self.register_erased(Arc::new(ToolWrapper::new(tool)))
    }

    pub fn register_erased(&mut self, tool: Arc<dyn ErasedTool>) -> &mut Self {
        let name = tool.name_str().to_owned();
        if self.tools.insert(name.clone(), tool).is_some() {
            log::debug!("Tool '{name}' overridden");
        }
        self
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool>> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ErasedTool>> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Removes tools for which the predicate returns false.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Convert all tools to model tool definitions.
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<llm::Tool> {
        self.tools
            .values()
            .map(|tool| llm::Tool {
                name: tool.name_str().to_owned(),
                description: tool.description().to_owned(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Check `input` against the named tool's declared schema.
    ///
    /// # Errors
    /// - [`AgentError::ToolExecution`] if no tool has that name
    /// - [`AgentError::InvalidToolArgs`] listing every schema violation
    pub fn validate(&self, name: &str, input: &Value) -> Result<(), AgentError> {
        let tool = self.get(name).ok_or_else(|| {
            AgentError::ToolExecution(format!(
                "unknown tool `{name}`; available tools: {}",
                self.names().join(", ")
            ))
        })?;
        validate_against_schema(name, &tool.input_schema(), input)
    }
}

/// Validate a JSON value against a JSON Schema document.
///
/// A null schema means no constraint.
///
/// # Errors
/// Returns [`AgentError::InvalidToolArgs`] when the schema rejects the value.
/// A schema that fails to compile is reported the same way.
pub fn validate_against_schema(
    tool: &str,
    schema: &Value,
    input: &Value,
) -> Result<(), AgentError> {
    if schema.is_null() {
        return Ok(());
    }
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        AgentError::invalid_tool_args(tool, format!("invalid JSON Schema document: {e}"))
    })?;
    let violations: Vec<String> = validator
        .iter_errors(input)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{path}: {error}")
            }
        })
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(AgentError::invalid_tool_args(tool, violations.join("; ")))
    }
}
