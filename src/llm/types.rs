use crate::error::{AgentError, classify_message};
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<Tool>>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// `input` is the parsed arguments, or the raw argument string when the
    /// provider sent something that is not valid JSON.
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
    /// Response body as received, for debugging
    pub raw: Option<serde_json::Value>,
}

impl ChatResponse {
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            ContentBlock::Text { .. } => None,
        })
    }

    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

#[derive(Debug)]
pub enum ChatOutcome {
    Success(ChatResponse),
    RateLimited(String),
    AuthFailed(String),
    ContextLengthExceeded(String),
    ContentFiltered(String),
    InvalidRequest(String),
    ServerError(String),
}

impl ChatOutcome {
    /// Map a non-success outcome onto the task error taxonomy.
    ///
    /// # Errors
    /// Returns the [`AgentError`] matching the outcome for everything except
    /// [`ChatOutcome::Success`].
    pub fn into_result(self) -> Result<ChatResponse, AgentError> {
        match self {
            Self::Success(response) => Ok(response),
            Self::RateLimited(body) => Err(AgentError::RateLimit(body)),
            Self::AuthFailed(body) => Err(AgentError::Auth(body)),
            Self::ContextLengthExceeded(body) => Err(AgentError::ContextLengthExceeded(body)),
            Self::ContentFiltered(body) => Err(AgentError::ContentFiltered(body)),
            Self::ServerError(body) => Err(AgentError::Server(body)),
            Self::InvalidRequest(body) => Err(classify_message(&body)),
        }
    }
}
