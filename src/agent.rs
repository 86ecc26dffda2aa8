//! The public entry point: [`PageAgent`].
//!
//! `PageAgent` is the lifecycle controller around the step loop. It enforces
//! single-flight execution, owns the abort token of the running task, and
//! exposes the read-only views (status, history, activity) and the inbound
//! queue (observations, user takeover) to callers.
//!
//! # Example
//!
//! ```no_run
//! use page_agent::{InMemoryPage, LlmConfig, PageAgent};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let agent = PageAgent::builder()
//!     .llm_config(LlmConfig::from_env()?)
//!     .page(Arc::new(InMemoryPage::new("https://example.com")))
//!     .build()?;
//!
//! let result = agent.execute("Open the pricing page").await?;
//! println!("{}: {}", result.success, result.data);
//! # Ok(())
//! # }
//! ```

mod builder;

pub use builder::PageAgentBuilder;

use crate::agent_loop::AgentLoop;
use crate::error::AgentError;
use crate::events::{AgentActivity, AgentEvent, AgentEventEnvelope};
use crate::history::HistoricalEvent;
use crate::types::{AgentStatus, ExecutionResult};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// A browser agent bound to one page and one model endpoint.
///
/// Share it behind an `Arc` to call [`stop`](Self::stop) or
/// [`pause`](Self::pause) while [`execute`](Self::execute) is running on
/// another task.
pub struct PageAgent {
    inner: AgentLoop,
    /// Abort token of the running task; `Some` exactly while a task runs.
    running: Mutex<Option<CancellationToken>>,
    idle: Notify,
    disposed: AtomicBool,
}

/// Clears the running slot even if `execute` is dropped mid-task, and
/// settles a task that was dropped before it finished.
struct RunningGuard<'a>(&'a PageAgent);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.abandon();
        *self.0.running.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.0.idle.notify_waiters();
    }
}

impl PageAgent {
    #[must_use]
    pub fn builder() -> PageAgentBuilder {
        PageAgentBuilder::new()
    }

    pub(crate) fn from_loop(inner: AgentLoop) -> Self {
        Self {
            inner,
            running: Mutex::new(None),
            idle: Notify::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Run a task until the model calls `done`, the task fails, or it is stopped.
    ///
    /// The history of the previous task is cleared first. A pause left over
    /// from a previous task is lifted.
    ///
    /// # Errors
    /// Only for calls that never start a task:
    /// - [`AgentError::InvalidTask`] if `task` is blank
    /// - [`AgentError::ConcurrentExecution`] if a task is already running
    /// - [`AgentError::Disposed`] after [`dispose`](Self::dispose)
    ///
    /// Every outcome of a started task is an `Ok` [`ExecutionResult`].
    /// Dropping the future mid-task settles it like [`stop`](Self::stop):
    /// status becomes `Error`, an error entry is recorded, and the mask is
    /// hidden.
    pub async fn execute(&self, task: impl Into<String>) -> Result<ExecutionResult, AgentError> {
        let task = task.into();
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AgentError::Disposed);
        }
        if task.trim().is_empty() {
            return Err(AgentError::InvalidTask);
        }

        let cancel = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.is_some() {
                warn!("Rejected execute(): a task is already running");
                return Err(AgentError::ConcurrentExecution);
            }
            let cancel = CancellationToken::new();
            *running = Some(cancel.clone());
            cancel
        };
        let _guard = RunningGuard(self);

        self.inner.state.set_paused(false);
        Ok(self.inner.run(&task, &cancel).await)
    }

    /// Abort the running task. A no-op when idle.
    pub fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = running.as_ref()
            && !cancel.is_cancelled()
        {
            info!("Stopping task");
            cancel.cancel();
        }
    }

    /// Suspend the running task before its next step.
    pub fn pause(&self) {
        if self.inner.state.set_paused(true) {
            debug!("Pause requested");
        }
    }

    pub fn resume(&self) {
        if self.inner.state.set_paused(false) {
            debug!("Resume requested");
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.is_paused()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Clear history and queued observations and return to idle.
    ///
    /// # Errors
    /// Returns [`AgentError::ConcurrentExecution`] while a task is running.
    pub async fn reset(&self) -> Result<(), AgentError> {
        if self.is_running() {
            return Err(AgentError::ConcurrentExecution);
        }
        self.inner.state.clear_pending();
        self.inner.state.set_paused(false);
        if self.inner.state.clear_history() {
            self.inner.emitter.history(Vec::new()).await;
        }
        self.inner.emitter.clear_activity();
        self.inner.set_status(AgentStatus::Idle).await;
        Ok(())
    }

    /// Stop any running task, release the page, and refuse further tasks.
    /// Calling it again does nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disposing agent");
        self.stop();
        loop {
            let idle = self.idle.notified();
            if !self.is_running() {
                break;
            }
            idle.await;
        }

        if let Err(e) = self.inner.page.dispose().await {
            warn!("Failed to dispose page: {e:#}");
        }
        self.inner.hooks.on_dispose().await;
        self.inner.emitter.emit(AgentEvent::Dispose).await;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Add context for the model. It is appended before the next step and is
    /// never shown retroactively.
    pub fn push_observation(&self, content: impl Into<String>) {
        self.inner
            .state
            .enqueue(HistoricalEvent::observation(content));
    }

    /// Record that the user took manual control of the page.
    pub fn mark_user_takeover(&self) {
        self.inner.state.enqueue(HistoricalEvent::UserTakeover);
    }

    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.inner.state.status()
    }

    /// Snapshot of the current task's history.
    #[must_use]
    pub fn history(&self) -> Vec<HistoricalEvent> {
        self.inner.state.history()
    }

    /// Latest activity; `None` means idle.
    #[must_use]
    pub fn activity(&self) -> Option<AgentActivity> {
        self.inner.emitter.current_activity()
    }

    /// Subscribe to status, history, activity and dispose events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEventEnvelope> {
        self.inner.emitter.subscribe()
    }

    /// Names of the tools offered to the model, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.inner
            .registry
            .names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }
}
