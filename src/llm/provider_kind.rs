//! Per-vendor request shaping.
//!
//! OpenAI-compatible endpoints disagree on how to force a tool call and on
//! which extra knobs they accept. The differences are captured once, when a
//! provider is built, as a [`RequestShaping`] derived from the
//! [`ProviderKind`] of the configured model.

use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAiCompatible,
    AnthropicCompatible,
    QwenCompatible,
    Generic,
}

impl ProviderKind {
    /// Classify a model name. Router prefixes such as `openai/` are ignored.
    #[must_use]
    pub fn detect(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        let name = lower.rsplit('/').next().unwrap_or(&lower);

        if name.contains("qwen") || name.starts_with("qwq") {
            Self::QwenCompatible
        } else if name.contains("claude") {
            Self::AnthropicCompatible
        } else if name.starts_with("gpt-")
            || name.starts_with("chatgpt")
            || name.starts_with("o1")
            || name.starts_with("o3")
            || name.starts_with("o4")
        {
            Self::OpenAiCompatible
        } else {
            Self::Generic
        }
    }

    #[must_use]
    pub const fn shaping(self) -> RequestShaping {
        match self {
            Self::OpenAiCompatible => RequestShaping {
                tool_choice: ToolChoice::Required,
                parallel_tool_calls: Some(false),
                disable_thinking: false,
            },
            Self::AnthropicCompatible => RequestShaping {
                tool_choice: ToolChoice::AnyTool,
                parallel_tool_calls: None,
                disable_thinking: false,
            },
            Self::QwenCompatible => RequestShaping {
                tool_choice: ToolChoice::Required,
                parallel_tool_calls: Some(false),
                disable_thinking: true,
            },
            Self::Generic => RequestShaping {
                tool_choice: ToolChoice::Required,
                parallel_tool_calls: None,
                disable_thinking: false,
            },
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai-compatible",
            Self::AnthropicCompatible => "anthropic-compatible",
            Self::QwenCompatible => "qwen-compatible",
            Self::Generic => "generic",
        }
    }
}

/// How "you must call a tool" is spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// `"required"`
    Required,
    /// `{"type": "any"}`
    AnyTool,
}

impl ToolChoice {
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Required => Value::String("required".to_owned()),
            Self::AnyTool => json!({ "type": "any" }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestShaping {
    pub tool_choice: ToolChoice,
    /// Sent only when `Some`; some gateways reject the field
    pub parallel_tool_calls: Option<bool>,
    /// Adds `enable_thinking: false`
    pub disable_thinking: bool,
}

impl RequestShaping {
    /// Add the vendor-specific fields to a request body. Only requests that
    /// offer tools get `tool_choice` and `parallel_tool_calls`.
    pub fn apply(&self, body: &mut Map<String, Value>) {
        if body.contains_key("tools") {
            body.insert("tool_choice".to_owned(), self.tool_choice.to_value());
            if let Some(parallel) = self.parallel_tool_calls {
                body.insert("parallel_tool_calls".to_owned(), Value::Bool(parallel));
            }
        }
        if self.disable_thinking {
            body.insert("enable_thinking".to_owned(), Value::Bool(false));
        }
    }
}
