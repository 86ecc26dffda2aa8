//! User interaction types and the `ask_user` tool.
//!
//! - [`QuestionRequest`] / [`QuestionResponse`] - For agent-initiated questions
//! - [`UserInputHandler`] - Where questions are answered
//! - [`ChannelUserInput`] / [`CallbackUserInput`] - Ready-made handlers
//! - [`AskUserTool`] - Tool that allows the agent to ask questions
//!
//! # Question Flow
//!
//! 1. The model calls `ask_user` with a question
//! 2. The handler shows the question to the user
//! 3. The user answers with a [`QuestionResponse`]
//! 4. The answer becomes the step's output and the loop continues
//!
//! The `ask_user` tool is only registered when a handler is configured, so a
//! model without one never sees it in its tool list.
//!
//! # Example
//!
//! ```no_run
//! use page_agent::user_interaction::{ChannelUserInput, QuestionResponse};
//!
//! let (handler, mut questions, answers) = ChannelUserInput::with_channels(4);
//! // Hand `handler` to `PageAgentBuilder::user_input`, then on the UI side:
//! // while let Some(q) = questions.recv().await {
//! //     answers.send(QuestionResponse::success("yes")).await?;
//! // }
//! ```

use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Request for user to answer a question from the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    /// The question text to display.
    pub question: String,
}

impl QuestionRequest {
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

/// Response to a question request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    /// The user's answer.
    pub answer: String,

    /// Whether the user dismissed the question.
    pub cancelled: bool,
}

impl QuestionResponse {
    /// Creates a new successful response.
    #[must_use]
    pub fn success(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            cancelled: false,
        }
    }

    /// Creates a cancelled response.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self {
            answer: String::new(),
            cancelled: true,
        }
    }
}

/// Answers questions the agent asks mid-task.
#[async_trait]
pub trait UserInputHandler: Send + Sync {
    /// Wait for the user's answer.
    ///
    /// # Errors
    /// Returns an error if the question cannot be delivered or answered.
    async fn ask(&self, request: QuestionRequest) -> Result<QuestionResponse>;
}

/// Handler backed by a pair of channels to the UI.
pub struct ChannelUserInput {
    /// Channel to send questions to the UI.
    question_tx: mpsc::Sender<QuestionRequest>,

    /// Channel to receive answers from the UI.
    answer_rx: Mutex<mpsc::Receiver<QuestionResponse>>,
}

impl ChannelUserInput {
    #[must_use]
    pub fn new(
        question_tx: mpsc::Sender<QuestionRequest>,
        answer_rx: mpsc::Receiver<QuestionResponse>,
    ) -> Self {
        Self {
            question_tx,
            answer_rx: Mutex::new(answer_rx),
        }
    }

    /// Creates a handler with fresh channels.
    ///
    /// Returns `(handler, request_receiver, response_sender)` where:
    /// - `request_receiver` receives questions from the agent
    /// - `response_sender` sends user answers back to the agent
    #[must_use]
    pub fn with_channels(
        buffer_size: usize,
    ) -> (
        Self,
        mpsc::Receiver<QuestionRequest>,
        mpsc::Sender<QuestionResponse>,
    ) {
        let (request_tx, request_rx) = mpsc::channel(buffer_size);
        let (response_tx, response_rx) = mpsc::channel(buffer_size);
        (Self::new(request_tx, response_rx), request_rx, response_tx)
    }
}

#[async_trait]
impl UserInputHandler for ChannelUserInput {
    async fn ask(&self, request: QuestionRequest) -> Result<QuestionResponse> {
        self.question_tx
            .send(request)
            .await
            .context("Failed to send question to UI - channel closed")?;

        let mut rx = self.answer_rx.lock().await;
        rx.recv()
            .await
            .context("Failed to receive answer from UI - channel closed")
    }
}

type AskFn = dyn Fn(QuestionRequest) -> BoxFuture<'static, Result<QuestionResponse>> + Send + Sync;

/// Handler that forwards each question to an async callback.
pub struct CallbackUserInput {
    callback: Box<AskFn>,
}

impl CallbackUserInput {
    #[must_use]
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(QuestionRequest) -> BoxFuture<'static, Result<QuestionResponse>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl UserInputHandler for CallbackUserInput {
    async fn ask(&self, request: QuestionRequest) -> Result<QuestionResponse> {
        (self.callback)(request).await
    }
}

#[derive(Debug, Deserialize)]
struct AskUserInput {
    question: String,
}

/// Tool that suspends the task until the user answers a question.
///
/// No `executing`/`executed` activity is emitted for this tool; the UI is
/// expected to show the question itself.
pub struct AskUserTool {
    handler: Arc<dyn UserInputHandler>,
}

impl AskUserTool {
    #[must_use]
    pub fn new(handler: Arc<dyn UserInputHandler>) -> Self {
        Self { handler }
    }
}

impl Tool for AskUserTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::AskUser
    }

    fn display_name(&self) -> &'static str {
        "Ask User"
    }

    fn description(&self) -> &'static str {
        "Ask the user a question and wait for the answer. Use this only when the task \
         cannot continue without information that is not on the page, such as a \
         missing credential or an ambiguous choice."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["question"],
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask the user. Be clear and specific."
                }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: AskUserInput =
            serde_json::from_value(input).context("Invalid input for ask_user tool")?;
        let request = QuestionRequest::new(input.question.clone());

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => {
                return Ok(ToolResult::error("Question abandoned: the task was stopped."));
            }
            response = self.handler.ask(request) => response,
        };

        match response {
            Ok(response) if response.cancelled => Ok(ToolResult::error(
                "User dismissed the question without answering.",
            )),
            Ok(response) => Ok(ToolResult::success(format!(
                "User answered: {}",
                response.answer
            ))),
            Err(e) => Ok(ToolResult::error(format!(
                "Could not get an answer from the user: {e:#}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InMemoryPage;
    use futures::FutureExt;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(InMemoryPage::new("https://a.test")))
    }

    #[test]
    fn question_response_constructors() {
        let ok = QuestionResponse::success("blue");
        assert!(!ok.cancelled);
        assert_eq!(ok.answer, "blue");
        assert!(QuestionResponse::cancelled().cancelled);
    }

    #[tokio::test]
    async fn channel_handler_round_trip() -> Result<()> {
        let (handler, mut questions, answers) = ChannelUserInput::with_channels(1);
        let tool = AskUserTool::new(Arc::new(handler));

        let ui = tokio::spawn(async move {
            let q = questions.recv().await.unwrap();
            assert_eq!(q.question, "Which account?");
            answers.send(QuestionResponse::success("work")).await.unwrap();
        });

        let result = tool
            .execute(&ctx(), json!({"question": "Which account?"}))
            .await?;
        ui.await?;
        assert!(result.success);
        assert_eq!(result.output, "User answered: work");
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_answer_is_tool_failure() -> Result<()> {
        let handler = CallbackUserInput::new(|_| async { Ok(QuestionResponse::cancelled()) }.boxed());
        let tool = AskUserTool::new(Arc::new(handler));

        let result = tool.execute(&ctx(), json!({"question": "?"})).await?;
        assert!(!result.success);
        Ok(())
    }

    #[tokio::test]
    async fn closed_channel_is_tool_failure() -> Result<()> {
        let (handler, questions, answers) = ChannelUserInput::with_channels(1);
        drop(questions);
        drop(answers);
        let tool = AskUserTool::new(Arc::new(handler));

        let result = tool.execute(&ctx(), json!({"question": "?"})).await?;
        assert!(!result.success);
        assert!(result.output.contains("channel closed"));
        Ok(())
    }

    #[tokio::test]
    async fn stop_abandons_the_wait() -> Result<()> {
        let (handler, _questions, _answers) = ChannelUserInput::with_channels(1);
        let tool = AskUserTool::new(Arc::new(handler));
        let cancel = CancellationToken::new();
        let ctx = ctx().with_cancel(cancel.clone());

        let waiter = tokio::spawn(async move { tool.execute(&ctx, json!({"question": "?"})).await });
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = waiter.await??;
        assert!(!result.success);
        assert!(result.output.contains("stopped"));
        Ok(())
    }
}
