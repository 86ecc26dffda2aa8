use super::AgentLoop;
use super::prompt::{self, PromptInput};
use crate::error::AgentError;
use crate::events::AgentActivity;
use crate::history::{Action, HistoricalEvent};
use crate::invocation::offered_tools;
use crate::llm::{ChatRequest, Message};
use crate::page::BrowserState;
use crate::page_tools::DoneInput;
use crate::retry::RetryObserver;
use crate::tools::{PageToolName, ToolContext};
use crate::types::TokenUsage;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

impl AgentLoop {
    /// One full step. `Ok(Some(_))` means the model called `done`.
    pub(super) async fn run_step(
        &self,
        task: &str,
        step_index: usize,
        cancel: &CancellationToken,
        usage: &mut TokenUsage,
    ) -> Result<Option<DoneInput>, AgentError> {
        self.wait_if_paused(cancel).await?;
        self.flush_pending().await;
        self.hooks.on_before_step(step_index).await;

        let browser_state = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::UserAborted),
            state = self.page.get_browser_state() => state.map_err(|e| {
                AgentError::Unknown(format!("page state unavailable: {e:#}"))
            })?,
        };
        debug!("Step {} on {}", step_index + 1, browser_state.url);

        let request = self.build_request(task, step_index, &browser_state);
        self.emitter.activity(AgentActivity::Thinking).await;

        let ctx = ToolContext::new(self.page.clone())
            .with_cancel(cancel.clone())
            .with_metadata("step_index", Value::from(step_index));
        let mut observer = StepRetryObserver { agent: self };
        let spent = Mutex::new(TokenUsage::default());
        let outcome = self
            .retry
            .run(
                |_| {
                    self.client.invoke(
                        &request,
                        &self.registry,
                        &ctx,
                        &self.emitter,
                        cancel,
                        &spent,
                    )
                },
                &mut observer,
                cancel,
            )
            .await;

        // Failed attempts are billed too.
        usage.add(&spent.into_inner().unwrap_or_else(PoisonError::into_inner));
        let invocation = outcome?;

        let raw_response = if self.config.include_raw_response {
            invocation.raw_response
        } else {
            None
        };
        let event = HistoricalEvent::Step {
            step_index,
            reflection: invocation.reflection,
            action: Action {
                name: invocation.tool_call.name.clone(),
                input: invocation.tool_call.input,
                output: invocation.tool_result.output.clone(),
            },
            raw_response,
        };
        self.record(event.clone()).await;
        self.hooks.on_after_step(step_index, &event).await;

        if let Err(e) = self.page.clean_up_highlights().await {
            warn!("Failed to clean up highlights: {e:#}");
        }

        if invocation.tool_call.name == PageToolName::Done.as_str() {
            return Ok(Some(DoneInput::from_result(&invocation.tool_result)));
        }
        if cancel.is_cancelled() {
            return Err(AgentError::UserAborted);
        }
        Ok(None)
    }

    fn build_request(&self, task: &str, step_index: usize, state: &BrowserState) -> ChatRequest {
        let user = self.state.with_history(|history| {
            prompt::user_message(&PromptInput {
                task,
                instructions: &self.config.instructions,
                history,
                browser_state: state,
                step_index,
                max_steps: self.config.max_steps,
            })
        });
        if log::log_enabled!(log::Level::Debug) {
            debug!("Prompt for step {}:\n{user}", step_index + 1);
        }

        ChatRequest {
            system: prompt::system_prompt(self.config.language).to_owned(),
            messages: vec![Message::user(user)],
            tools: Some(offered_tools(&self.registry)),
            max_tokens: self.config.max_tokens,
            temperature: None,
        }
    }

    /// Suspend before a step while paused. Never interrupts a running step.
    async fn wait_if_paused(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        let mut paused = self.state.subscribe_paused();
        let mut announced = false;
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::UserAborted);
            }
            if !*paused.borrow_and_update() {
                if announced {
                    info!("Resumed");
                }
                return Ok(());
            }
            if !announced {
                info!("Paused before next step");
                announced = true;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::UserAborted),
                changed = paused.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Move queued observations into the history so the next prompt sees them.
    async fn flush_pending(&self) {
        let pending = self.state.drain_pending();
        if pending.is_empty() {
            return;
        }
        let mut snapshot = Vec::new();
        for event in pending {
            snapshot = self.state.push(event);
        }
        self.emitter.history(snapshot).await;
    }
}

/// Surfaces retries as `retry` history entries and transient activity.
struct StepRetryObserver<'a> {
    agent: &'a AgentLoop,
}

impl RetryObserver for StepRetryObserver<'_> {
    async fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &AgentError) {
        self.agent
            .record(HistoricalEvent::Retry {
                message: error.to_string(),
                attempt,
                max_attempts,
            })
            .await;
        self.agent
            .emitter
            .activity(AgentActivity::Retrying {
                attempt,
                max_attempts,
            })
            .await;
    }

    async fn on_error(&mut self, error: &AgentError, will_retry: bool) {
        debug!("Invocation failed (kind={:?}, will_retry={will_retry})", error.kind());
        self.agent
            .emitter
            .activity(AgentActivity::Error {
                message: error.to_string(),
            })
            .await;
    }
}
