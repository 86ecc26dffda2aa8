//! Core types shared across the crate.
//!
//! - [`TokenUsage`]: Token consumption statistics
//! - [`ToolResult`]: Result returned from tool execution
//! - [`AgentStatus`]: Whether a task is in flight and how the last one ended
//! - [`ExecutionResult`]: Terminal value of [`PageAgent::execute`](crate::PageAgent::execute)

use crate::error::ErrorKind;
use crate::history::HistoricalEvent;
use serde::{Deserialize, Serialize};

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Prompt tokens served from the provider's cache
    #[serde(default)]
    pub cached_tokens: u32,
}

impl TokenUsage {
    pub const fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content, recorded in history and fed back to the model
    pub output: String,
    /// Optional structured data
    pub data: Option<serde_json::Value>,
    /// Duration of the tool execution in milliseconds
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Lifecycle status of an agent.
///
/// `Idle -> Running` on execute, `Running -> Completed` on a successful
/// `done`, `Running -> Error` on any other terminal outcome. Finished
/// states go back to `Idle` on the next execute or an explicit reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl AgentStatus {
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Terminal value of one task execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Text passed to `done`, or a description of the failure
    pub data: String,
    /// Every history event recorded during the task, including partial progress on failure
    pub history: Vec<HistoricalEvent>,
    /// Cumulative token usage over all model invocations of the task
    pub usage: TokenUsage,
    /// Failure class when the task did not end through `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ExecutionResult {
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, HistoricalEvent::Step { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cached_tokens: 50,
        });
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 2,
            cached_tokens: 0,
        });
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 22);
        assert_eq!(total.cached_tokens, 50);
        assert_eq!(total.total(), 132);
    }

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::success("clicked").with_duration(12);
        assert!(ok.success);
        assert_eq!(ok.duration_ms, Some(12));

        let err = ToolResult::error("element 9 not found");
        assert!(!err.success);
        assert_eq!(err.output, "element 9 not found");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(AgentStatus::Running.to_string(), "running");
        assert!(AgentStatus::Error.is_finished());
        assert!(!AgentStatus::Idle.is_finished());
    }
}
