//! The step state machine.
//!
//! [`AgentLoop::run`] drives one task: each step reads the page, builds the
//! prompt from the history, asks the model for exactly one action through
//! the retry policy, records the result, and stops on `done`, on a terminal
//! error, on abort, or when the step budget runs out.
//!
//! # Per-step sequence
//!
//! 1. Wait while paused (aborts still win)
//! 2. Append queued observations / user takeovers
//! 3. `get_browser_state`; failure ends the task
//! 4. `Thinking` activity, then the invocation under [`RetryPolicy`]
//! 5. Append the `step` event and clean up highlights
//! 6. `done` ends the task; anything else moves on
//!
//! Only the loop writes status and history. Everything else reads
//! snapshots or enqueues through [`AgentState::enqueue`].

pub(crate) mod prompt;
mod step;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::events::EventEmitter;
use crate::history::{HistoricalEvent, HistoryStore};
use crate::hooks::AgentHooks;
use crate::invocation::ModelInvocationClient;
use crate::page::PageController;
use crate::page_tools::DoneInput;
use crate::retry::RetryPolicy;
use crate::tools::ToolRegistry;
use crate::types::{AgentStatus, ExecutionResult, TokenUsage};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Status, history and the inbound queue shared between the loop and its
/// controller.
pub(crate) struct AgentState {
    status: RwLock<AgentStatus>,
    history: RwLock<HistoryStore>,
    pending: Mutex<Vec<HistoricalEvent>>,
    paused: watch::Sender<bool>,
}

impl AgentState {
    pub(crate) fn new() -> Self {
        Self {
            status: RwLock::new(AgentStatus::Idle),
            history: RwLock::new(HistoryStore::new()),
            pending: Mutex::new(Vec::new()),
            paused: watch::channel(false).0,
        }
    }

    pub(crate) fn status(&self) -> AgentStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the status actually changed.
    pub(crate) fn set_status(&self, status: AgentStatus) -> bool {
        let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
        let changed = *current != status;
        *current = status;
        changed
    }

    pub(crate) fn history(&self) -> Vec<HistoricalEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Append and return the new snapshot.
    pub(crate) fn push(&self, event: HistoricalEvent) -> Vec<HistoricalEvent> {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.push(event);
        history.snapshot()
    }

    /// Clear the history. Returns whether anything was removed.
    pub(crate) fn clear_history(&self) -> bool {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let had_events = !history.is_empty();
        history.clear();
        had_events
    }

    fn with_history<R>(&self, f: impl FnOnce(&HistoryStore) -> R) -> R {
        f(&self.history.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Queue an event to be appended before the next step.
    pub(crate) fn enqueue(&self, event: HistoricalEvent) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub(crate) fn clear_pending(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn drain_pending(&self) -> Vec<HistoricalEvent> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.send_replace(paused) != paused
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    fn subscribe_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }
}

/// Everything one task needs, owned by the lifecycle controller.
pub(crate) struct AgentLoop {
    pub(crate) client: ModelInvocationClient,
    pub(crate) retry: RetryPolicy,
    pub(crate) registry: ToolRegistry,
    pub(crate) page: Arc<dyn PageController>,
    pub(crate) emitter: Arc<EventEmitter>,
    pub(crate) hooks: Arc<dyn AgentHooks>,
    pub(crate) config: AgentConfig,
    pub(crate) state: AgentState,
}

impl AgentLoop {
    /// Run `task` to completion. Every outcome, including abort and budget
    /// exhaustion, is an [`ExecutionResult`].
    pub(crate) async fn run(&self, task: &str, cancel: &CancellationToken) -> ExecutionResult {
        if self.state.clear_history() {
            self.emitter.history(Vec::new()).await;
        }
        self.emitter.clear_activity();
        self.set_status(AgentStatus::Running).await;
        self.hooks.on_before_task(task).await;

        info!(
            "Starting task (model={}, max_steps={})",
            self.client.provider().model(),
            self.config.max_steps
        );

        if let Err(e) = self.page.show_mask().await {
            warn!("Failed to show mask: {e:#}");
        }

        let mut usage = TokenUsage::default();
        let outcome = self.run_steps(task, cancel, &mut usage).await;

        let (success, data, error) = match outcome {
            Ok(done) => {
                info!("Task finished with done (success={})", done.success);
                (done.success, done.text, None)
            }
            Err(err) => {
                warn!("Task failed: {err}");
                let message = prompt::failure_message(self.config.language, &err);
                let raw_response = if self.config.include_raw_response {
                    err.raw_response().cloned()
                } else {
                    None
                };
                self.record(HistoricalEvent::Error {
                    message: message.clone(),
                    raw_response,
                })
                .await;
                (false, message, Some(err.kind()))
            }
        };

        if let Err(e) = self.page.hide_mask().await {
            warn!("Failed to hide mask: {e:#}");
        }
        self.emitter.clear_activity();

        let status = if success {
            AgentStatus::Completed
        } else {
            AgentStatus::Error
        };
        self.set_status(status).await;

        let result = ExecutionResult {
            success,
            data,
            history: self.state.history(),
            usage,
            error,
        };
        debug!(
            "Task used {} input / {} output tokens over {} steps",
            usage.input_tokens,
            usage.output_tokens,
            result.step_count()
        );
        self.hooks.on_after_task(&result).await;
        result
    }

    async fn run_steps(
        &self,
        task: &str,
        cancel: &CancellationToken,
        usage: &mut TokenUsage,
    ) -> Result<DoneInput, AgentError> {
        for step_index in 0..self.config.max_steps {
            if let Some(done) = self.run_step(task, step_index, cancel, usage).await? {
                return Ok(done);
            }
        }
        Err(AgentError::StepBudgetExhausted {
            max_steps: self.config.max_steps,
        })
    }

    /// Settle a task whose `run` future was dropped before it finished.
    ///
    /// Status, history and activity are updated in place. Publishing the
    /// events and hiding the mask need to await, so they run on a spawned
    /// task when a runtime is available. A no-op once the task has settled.
    pub(crate) fn abandon(&self) {
        if self.state.status() != AgentStatus::Running {
            return;
        }
        warn!("Task was dropped while running; settling it as aborted");
        let message = prompt::failure_message(self.config.language, &AgentError::UserAborted);
        let snapshot = self.state.push(HistoricalEvent::Error {
            message,
            raw_response: None,
        });
        self.state.set_status(AgentStatus::Error);
        self.emitter.clear_activity();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to hide the mask of the dropped task");
            return;
        };
        let emitter = self.emitter.clone();
        let page = self.page.clone();
        handle.spawn(async move {
            emitter.history(snapshot).await;
            emitter.status(AgentStatus::Error).await;
            if let Err(e) = page.hide_mask().await {
                warn!("Failed to hide mask: {e:#}");
            }
        });
    }

    pub(crate) async fn set_status(&self, status: AgentStatus) {
        if self.state.set_status(status) {
            debug!("Status changed to {status}");
            self.emitter.status(status).await;
        }
    }

    /// Append to history and publish the full snapshot.
    async fn record(&self, event: HistoricalEvent) {
        let snapshot = self.state.push(event);
        self.emitter.history(snapshot).await;
    }
}
