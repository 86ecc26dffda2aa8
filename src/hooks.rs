//! Agent lifecycle hooks for customization.
//!
//! Hooks let callers observe the agent at key points:
//!
//! - [`AgentHooks::on_before_task`] / [`AgentHooks::on_after_task`] - Task boundaries
//! - [`AgentHooks::on_before_step`] / [`AgentHooks::on_after_step`] - Step boundaries
//! - [`AgentHooks::on_event`] - Every UI event
//! - [`AgentHooks::on_dispose`] - Teardown
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - Does nothing (default)
//! - [`LoggingHooks`] - Debug logging for every hook

use crate::events::AgentEvent;
use crate::history::HistoricalEvent;
use crate::types::ExecutionResult;
use async_trait::async_trait;

/// Lifecycle hooks for the agent.
/// Implement this trait to observe agent behavior.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called once per task, after status becomes running.
    async fn on_before_task(&self, _task: &str) {}

    /// Called with the final result before `execute` returns.
    async fn on_after_task(&self, _result: &ExecutionResult) {}

    /// Called before the page state for step `step_index` is read.
    async fn on_before_step(&self, _step_index: usize) {}

    /// Called after the step's history entry is appended.
    async fn on_after_step(&self, _step_index: usize, _event: &HistoricalEvent) {}

    /// Called when the agent emits an event.
    /// Can be used for logging, metrics, or custom handling.
    async fn on_event(&self, _event: &AgentEvent) {}

    /// Called once when the agent is disposed.
    async fn on_dispose(&self) {}
}

/// Default hooks implementation that does nothing
pub struct DefaultHooks;

#[async_trait]
impl AgentHooks for DefaultHooks {}

/// Hooks that log everything (useful for debugging)
pub struct LoggingHooks;

#[async_trait]
impl AgentHooks for LoggingHooks {
    async fn on_before_task(&self, task: &str) {
        tracing::debug!(task, "Task started");
    }

    async fn on_after_task(&self, result: &ExecutionResult) {
        tracing::debug!(
            success = result.success,
            steps = result.step_count(),
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            "Task finished"
        );
    }

    async fn on_before_step(&self, step_index: usize) {
        tracing::debug!(step_index, "Step started");
    }

    async fn on_after_step(&self, step_index: usize, event: &HistoricalEvent) {
        tracing::debug!(step_index, ?event, "Step recorded");
    }

    async fn on_event(&self, event: &AgentEvent) {
        tracing::debug!(?event, "Agent event");
    }

    async fn on_dispose(&self) {
        tracing::debug!("Agent disposed");
    }
}
