//! Error taxonomy for task execution.
//!
//! Every failure the agent can observe is mapped onto one [`AgentError`]
//! variant. The variant decides whether the retry policy absorbs it
//! ([`AgentError::is_retryable`]) or whether it ends the task immediately.
//!
//! | Kind                     | Retryable | Origin                               |
//! |--------------------------|-----------|--------------------------------------|
//! | `Network`                | yes       | transport failure talking to the LLM |
//! | `RateLimit`              | yes       | HTTP 429                             |
//! | `Server`                 | yes       | HTTP 5xx                             |
//! | `NoToolCall`             | yes       | zero / several / free-text replies   |
//! | `InvalidToolArgs`        | yes       | unrepairable schema mismatch         |
//! | `ToolExecution`          | yes       | dispatch failure (unknown tool)      |
//! | `Unknown`                | yes       | anything unclassified                |
//! | `Auth`                   | no        | HTTP 401 / 403                       |
//! | `ContextLengthExceeded`  | no        | prompt too large for the model       |
//! | `ContentFiltered`        | no        | provider safety filter               |
//! | `UserAborted`            | no        | `stop()` / `dispose()`               |

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fieldless mirror of [`AgentError`], used where only the class matters
/// (execution results, activity events, logs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Server,
    NoToolCall,
    InvalidToolArgs,
    ToolExecution,
    Auth,
    ContextLengthExceeded,
    ContentFiltered,
    Unknown,
    ConcurrentExecution,
    StepBudgetExhausted,
    UserAborted,
    InvalidTask,
    Disposed,
}

impl ErrorKind {
    /// Whether an error of this kind may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::RateLimit
                | Self::Server
                | Self::NoToolCall
                | Self::InvalidToolArgs
                | Self::ToolExecution
                | Self::Unknown
        )
    }
}

/// Error raised while running a task.
#[derive(Clone, Debug, Error)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("server error: {0}")]
    Server(String),

    /// The model answered with zero tool calls, several tool calls, or text only.
    #[error("expected exactly one tool call: {message}")]
    NoToolCall {
        message: String,
        raw_response: Option<serde_json::Value>,
    },

    #[error("invalid arguments for tool `{tool}`: {message}")]
    InvalidToolArgs {
        tool: String,
        message: String,
        raw_response: Option<serde_json::Value>,
    },

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("content filtered: {0}")]
    ContentFiltered(String),

    #[error("{0}")]
    Unknown(String),

    #[error("a task is already running on this agent")]
    ConcurrentExecution,

    #[error("step budget exhausted: no `done` after {max_steps} steps")]
    StepBudgetExhausted { max_steps: usize },

    #[error("task stopped by user")]
    UserAborted,

    #[error("task must not be empty")]
    InvalidTask,

    #[error("agent has been disposed")]
    Disposed,
}

impl AgentError {
    #[must_use]
    pub fn no_tool_call(message: impl Into<String>) -> Self {
        Self::NoToolCall {
            message: message.into(),
            raw_response: None,
        }
    }

    #[must_use]
    pub fn invalid_tool_args(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidToolArgs {
            tool: tool.into(),
            message: message.into(),
            raw_response: None,
        }
    }

    /// Attach the provider's raw response body, for the error kinds that carry one.
    #[must_use]
    pub fn with_raw_response(mut self, raw: Option<serde_json::Value>) -> Self {
        match &mut self {
            Self::NoToolCall { raw_response, .. } | Self::InvalidToolArgs { raw_response, .. } => {
                *raw_response = raw;
            }
            _ => {}
        }
        self
    }

    #[must_use]
    pub const fn raw_response(&self) -> Option<&serde_json::Value> {
        match self {
            Self::NoToolCall { raw_response, .. } | Self::InvalidToolArgs { raw_response, .. } => {
                raw_response.as_ref()
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::Server(_) => ErrorKind::Server,
            Self::NoToolCall { .. } => ErrorKind::NoToolCall,
            Self::InvalidToolArgs { .. } => ErrorKind::InvalidToolArgs,
            Self::ToolExecution(_) => ErrorKind::ToolExecution,
            Self::Auth(_) => ErrorKind::Auth,
            Self::ContextLengthExceeded(_) => ErrorKind::ContextLengthExceeded,
            Self::ContentFiltered(_) => ErrorKind::ContentFiltered,
            Self::Unknown(_) => ErrorKind::Unknown,
            Self::ConcurrentExecution => ErrorKind::ConcurrentExecution,
            Self::StepBudgetExhausted { .. } => ErrorKind::StepBudgetExhausted,
            Self::UserAborted => ErrorKind::UserAborted,
            Self::InvalidTask => ErrorKind::InvalidTask,
            Self::Disposed => ErrorKind::Disposed,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify a non-success HTTP response from an LLM endpoint.
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body_owned = body.to_owned();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Self::Auth(body_owned);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Self::RateLimit(body_owned);
        }
        if status.is_server_error() {
            return Self::Server(body_owned);
        }
        classify_message(body)
    }
}

impl From<&reqwest::Error> for AgentError {
    fn from(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(status, &error.to_string());
        }
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            return Self::Network(error.to_string());
        }
        Self::Unknown(error.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        Self::from(&error)
    }
}

/// Classify an error returned by an [`LlmProvider`](crate::llm::LlmProvider).
///
/// Transport failures keep their `reqwest` source through `anyhow` context,
/// so they are recognised here; anything else is `Unknown`.
#[must_use]
pub fn classify_provider_error(error: &anyhow::Error) -> AgentError {
    match error.downcast_ref::<reqwest::Error>() {
        Some(source) => match AgentError::from(source) {
            AgentError::Network(_) => AgentError::Network(format!("{error:#}")),
            other => other,
        },
        None => AgentError::Unknown(format!("{error:#}")),
    }
}

const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "too many tokens",
    "prompt is too long",
];

const CONTENT_FILTER_MARKERS: &[&str] = &[
    "content_filter",
    "content management policy",
    "data_inspection_failed",
    "inappropriate content",
];

const AUTH_MARKERS: &[&str] = &["invalid_api_key", "incorrect api key", "unauthorized"];

/// Classify a provider error message that carries no useful status code.
#[must_use]
pub fn classify_message(message: &str) -> AgentError {
    let lower = message.to_lowercase();
    let owned = message.to_owned();

    if CONTEXT_LENGTH_MARKERS.iter().any(|m| lower.contains(m)) {
        AgentError::ContextLengthExceeded(owned)
    } else if CONTENT_FILTER_MARKERS.iter().any(|m| lower.contains(m)) {
        AgentError::ContentFiltered(owned)
    } else if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        AgentError::Auth(owned)
    } else if lower.contains("rate limit") || lower.contains("rate_limit") {
        AgentError::RateLimit(owned)
    } else {
        AgentError::Unknown(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(AgentError::Network("reset".into()).is_retryable());
        assert!(AgentError::RateLimit("slow down".into()).is_retryable());
        assert!(AgentError::Server("502".into()).is_retryable());
        assert!(AgentError::no_tool_call("text only").is_retryable());
        assert!(AgentError::invalid_tool_args("click", "missing index").is_retryable());
        assert!(AgentError::ToolExecution("unknown tool".into()).is_retryable());
        assert!(AgentError::Unknown("?".into()).is_retryable());
    }

    #[test]
    fn terminal_kinds() {
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(!AgentError::ContextLengthExceeded("too long".into()).is_retryable());
        assert!(!AgentError::ContentFiltered("blocked".into()).is_retryable());
        assert!(!AgentError::UserAborted.is_retryable());
        assert!(!AgentError::StepBudgetExhausted { max_steps: 3 }.is_retryable());
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            AgentError::from_status(StatusCode::UNAUTHORIZED, "no").kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            AgentError::from_status(StatusCode::FORBIDDEN, "no").kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            AgentError::from_status(StatusCode::TOO_MANY_REQUESTS, "").kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            AgentError::from_status(StatusCode::BAD_GATEWAY, "").kind(),
            ErrorKind::Server
        );
        assert_eq!(
            AgentError::from_status(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"code":"context_length_exceeded"}}"#
            )
            .kind(),
            ErrorKind::ContextLengthExceeded
        );
        assert_eq!(
            AgentError::from_status(StatusCode::BAD_REQUEST, "malformed").kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn message_classification() {
        assert_eq!(
            classify_message("The response was filtered due to content_filter").kind(),
            ErrorKind::ContentFiltered
        );
        assert_eq!(
            classify_message("Incorrect API key provided").kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            classify_message("Rate limit reached for requests").kind(),
            ErrorKind::RateLimit
        );
    }

    #[test]
    fn raw_response_only_on_invocation_errors() {
        let raw = serde_json::json!({"choices": []});
        let err = AgentError::no_tool_call("empty").with_raw_response(Some(raw.clone()));
        assert_eq!(err.raw_response(), Some(&raw));

        let err = AgentError::Server("boom".into()).with_raw_response(Some(raw));
        assert!(err.raw_response().is_none());
    }

    #[test]
    fn provider_errors_without_transport_source_are_unknown() {
        let err = anyhow::anyhow!("no choices in response").context("failed to parse response");
        let classified = classify_provider_error(&err);
        assert_eq!(classified.kind(), ErrorKind::Unknown);
        assert!(classified.to_string().contains("no choices"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::StepBudgetExhausted).unwrap(),
            "\"step_budget_exhausted\""
        );
    }
}
