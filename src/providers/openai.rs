//! `OpenAI` Chat Completions provider.
//!
//! Speaks the `/chat/completions` wire format, which most hosted and
//! self-hosted endpoints accept (`OpenAI`, `DashScope`, `OpenRouter`, vLLM,
//! Ollama). Vendor differences in how a tool call is forced are handled by
//! the [`ProviderKind`] detected from the model name once at construction.

use crate::config::LlmConfig;
use crate::llm::{
    ChatOutcome, ChatRequest, ChatResponse, ContentBlock, LlmProvider, ProviderKind, Role,
    StopReason,
};
use crate::types::TokenUsage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Provider for any OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    extra_headers: HashMap<String, String>,
    kind: ProviderKind,
}

impl OpenAIProvider {
    /// Build a provider from endpoint settings.
    ///
    /// A client supplied through [`LlmConfig::with_client`] is used as is;
    /// otherwise one is built with the configured timeout.
    ///
    /// # Errors
    /// Returns an error if the base URL is not a valid URL or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .with_context(|| format!("invalid base URL `{}`", config.base_url))?;

        let client = match &config.client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .context("failed to build HTTP client")?,
        };

        let kind = ProviderKind::detect(&config.model);
        tracing::debug!(model = %config.model, kind = kind.as_str(), "Detected provider kind");

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            temperature: config.temperature,
            extra_headers: config.extra_headers.clone(),
            kind,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn build_body(&self, request: &ChatRequest) -> Map<String, Value> {
        let messages = build_api_messages(request);
        let mut body = Map::new();
        body.insert("model".to_owned(), Value::String(self.model.clone()));
        body.insert(
            "messages".to_owned(),
            serde_json::to_value(messages).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        body.insert("max_tokens".to_owned(), Value::from(request.max_tokens));
        body.insert(
            "temperature".to_owned(),
            Value::from(request.temperature.unwrap_or(self.temperature)),
        );

        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            let api_tools: Vec<ApiTool> = tools.iter().map(convert_tool).collect();
            body.insert(
                "tools".to_owned(),
                serde_json::to_value(api_tools).unwrap_or_else(|_| Value::Array(Vec::new())),
            );
        }

        self.kind.shaping().apply(&mut body);
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let body = self.build_body(&request);

        tracing::debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "OpenAI LLM request"
        );

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key));
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .context("failed to read response body")?;

        tracing::debug!(
            status = %status,
            body_len = bytes.len(),
            "OpenAI LLM response"
        );

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            if status.is_server_error() {
                tracing::error!(status = %status, body = %body, "OpenAI server error");
            } else {
                tracing::warn!(status = %status, body = %body, "OpenAI client error");
            }
            return Ok(classify_status(status, body));
        }

        parse_response(&bytes).map(ChatOutcome::Success)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

fn classify_status(status: StatusCode, body: String) -> ChatOutcome {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatOutcome::AuthFailed(body),
        StatusCode::TOO_MANY_REQUESTS => ChatOutcome::RateLimited(body),
        s if s.is_server_error() => ChatOutcome::ServerError(body),
        _ => ChatOutcome::InvalidRequest(body),
    }
}

fn parse_response(bytes: &[u8]) -> Result<ChatResponse> {
    let raw: Value = serde_json::from_slice(bytes).context("response is not JSON")?;
    let api_response: ApiChatResponse =
        serde_json::from_value(raw.clone()).context("failed to parse response")?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .context("no choices in response")?;

    let content = build_content_blocks(choice.message);

    let stop_reason = choice.finish_reason.as_deref().and_then(|r| match r {
        "stop" => Some(StopReason::EndTurn),
        "tool_calls" | "function_call" => Some(StopReason::ToolUse),
        "length" => Some(StopReason::MaxTokens),
        "content_filter" => Some(StopReason::ContentFilter),
        _ => None,
    });

    let usage = api_response.usage.unwrap_or_default();

    Ok(ChatResponse {
        id: api_response.id,
        content,
        model: api_response.model,
        stop_reason,
        usage: TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cached_tokens: usage
                .prompt_tokens_details
                .map_or(0, |details| details.cached_tokens),
        },
        raw: Some(raw),
    })
}

fn build_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if !request.system.is_empty() {
        messages.push(ApiMessage {
            role: ApiRole::System,
            content: request.system.clone(),
        });
    }

    messages.extend(request.messages.iter().map(|msg| ApiMessage {
        role: match msg.role {
            Role::User => ApiRole::User,
            Role::Assistant => ApiRole::Assistant,
        },
        content: msg.content.clone(),
    }));

    messages
}

fn convert_tool(t: &crate::llm::Tool) -> ApiTool {
    ApiTool {
        r#type: "function",
        function: ApiFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone(),
        },
    }
}

fn build_content_blocks(message: ApiResponseMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(content) = message.content
        && !content.is_empty()
    {
        blocks.push(ContentBlock::Text { text: content });
    }

    for tc in message.tool_calls.unwrap_or_default() {
        blocks.push(ContentBlock::ToolUse {
            id: tc.id,
            name: tc.function.name,
            input: parse_arguments(tc.function.arguments),
        });
    }

    blocks
}

/// Arguments normally arrive as a JSON string. Some endpoints send the
/// object itself. Anything unparseable is kept verbatim for the repair step.
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
struct ApiMessage {
    role: ApiRole,
    content: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ApiRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize)]
struct ApiTool {
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    id: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: String,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Deserialize)]
struct ApiResponseToolCall {
    #[serde(default)]
    id: String,
    function: ApiResponseFunctionCall,
}

#[derive(Deserialize)]
struct ApiResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    prompt_tokens_details: Option<ApiPromptTokensDetails>,
}

#[derive(Deserialize)]
struct ApiPromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}
