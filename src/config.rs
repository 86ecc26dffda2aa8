//! Configuration for the model endpoint, the agent loop and the page.
//!
//! Everything here is a plain struct with sensible defaults. There are no
//! config files: callers build values in code or read the few supported
//! environment variables through [`LlmConfig::from_env`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_BASE_URL: &str = "PAGE_AGENT_BASE_URL";
pub const ENV_API_KEY: &str = "PAGE_AGENT_API_KEY";
pub const ENV_MODEL: &str = "PAGE_AGENT_MODEL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Language of the built-in prompt and user-facing messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "zh-CN")]
    ZhCn,
}

impl Language {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EnUs => "en-US",
            Self::ZhCn => "zh-CN",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "en-US" | "en" => Ok(Self::EnUs),
            "zh-CN" | "zh" => Ok(Self::ZhCn),
            other => anyhow::bail!("unsupported language: {other}"),
        }
    }
}

/// Resolver for page-specific instructions, keyed on the current URL.
pub type PageInstructionsFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Extra instructions placed in the prompt ahead of the history.
#[derive(Clone, Default)]
pub struct Instructions {
    /// Site-wide instructions, sent on every step
    pub system: Option<String>,
    /// Called with the current URL before every step
    pub page: Option<PageInstructionsFn>,
}

impl Instructions {
    #[must_use]
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }

    #[must_use]
    pub fn page<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.page = Some(Arc::new(resolver));
        self
    }

    /// Resolve the page instructions for `url`. Blank results count as none.
    #[must_use]
    pub fn resolve_page(&self, url: &str) -> Option<String> {
        self.page
            .as_ref()
            .and_then(|f| f(url))
            .filter(|s| !s.trim().is_empty())
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instructions")
            .field("system", &self.system)
            .field("page", &self.page.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Configuration for retry behavior on transient errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Retry budget for a single step's model invocation
    pub max_retries: u32,
    pub timeout: Duration,
    /// Additional headers sent with every request
    pub extra_headers: HashMap<String, String>,
    /// Pre-configured HTTP client (proxy, custom TLS, middleware headers)
    pub client: Option<reqwest::Client>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_owned(),
            temperature: 0.0,
            max_retries: 2,
            timeout: Duration::from_secs(120),
            extra_headers: HashMap::new(),
            client: None,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Read endpoint settings from the environment.
    ///
    /// `PAGE_AGENT_API_KEY` is required; base URL and model fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `PAGE_AGENT_API_KEY` is not set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ENV_API_KEY)
            .with_context(|| format!("{ENV_API_KEY} must be set"))?;
        let base_url =
            std::env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let model = std::env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        Ok(Self::new(base_url, api_key, model))
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("client", &self.client.is_some())
            .finish()
    }
}

/// Configuration for the agent loop
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub language: Language,
    /// Maximum number of steps before the task fails
    pub max_steps: usize,
    pub instructions: Instructions,
    /// Retry configuration for model invocations
    pub retry: RetryConfig,
    /// Attach the provider's raw JSON response to history events
    pub include_raw_response: bool,
    /// Maximum tokens per model response
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            max_steps: 20,
            instructions: Instructions::default(),
            retry: RetryConfig::default(),
            include_raw_response: false,
            max_tokens: 4096,
        }
    }
}

/// DOM extraction options handed to [`PageController`](crate::PageController) implementations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomConfig {
    /// Selectors always treated as interactive
    #[serde(default)]
    pub interactive_allowlist: Vec<String>,
    /// Selectors never treated as interactive
    #[serde(default)]
    pub interactive_blocklist: Vec<String>,
    /// Attributes kept in the serialized element tree besides the defaults
    #[serde(default)]
    pub extra_attributes: Vec<String>,
    pub highlight_opacity: f32,
}

impl Default for DomConfig {
    fn default() -> Self {
        Self {
            interactive_allowlist: Vec::new(),
            interactive_blocklist: Vec::new(),
            extra_attributes: Vec::new(),
            highlight_opacity: 0.1,
        }
    }
}

impl DomConfig {
    #[must_use]
    pub fn with_highlight_opacity(mut self, opacity: f32) -> Self {
        self.highlight_opacity = opacity.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn block(mut self, selector: impl Into<String>) -> Self {
        self.interactive_blocklist.push(selector.into());
        self
    }

    #[must_use]
    pub fn allow(mut self, selector: impl Into<String>) -> Self {
        self.interactive_allowlist.push(selector.into());
        self
    }

    #[must_use]
    pub fn keep_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.extra_attributes.push(attribute.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let llm = LlmConfig::default();
        assert!((llm.temperature - 0.0).abs() < f32::EPSILON);
        assert_eq!(llm.max_retries, 2);

        let agent = AgentConfig::default();
        assert_eq!(agent.max_steps, 20);
        assert_eq!(agent.language, Language::EnUs);
        assert!(!agent.include_raw_response);
    }

    #[test]
    fn page_instructions_resolve_by_url() {
        let instructions = Instructions::default()
            .system("be brief")
            .page(|url| url.contains("/checkout").then(|| "never pay".to_owned()));

        assert_eq!(
            instructions.resolve_page("https://shop.test/checkout"),
            Some("never pay".to_owned())
        );
        assert_eq!(instructions.resolve_page("https://shop.test/"), None);
    }

    #[test]
    fn blank_page_instructions_count_as_none() {
        let instructions = Instructions::default().page(|_| Some("   ".to_owned()));
        assert_eq!(instructions.resolve_page("https://a.test"), None);
    }

    #[test]
    fn language_serde_codes() {
        assert_eq!(serde_json::to_string(&Language::ZhCn).unwrap(), "\"zh-CN\"");
        assert_eq!("en-US".parse::<Language>().unwrap(), Language::EnUs);
        assert!("fr-FR".parse::<Language>().is_err());
    }

    #[test]
    fn highlight_opacity_is_clamped() {
        assert!((DomConfig::default().with_highlight_opacity(3.0).highlight_opacity - 1.0).abs() < f32::EPSILON);
        assert!(DomConfig::default().with_highlight_opacity(-1.0).highlight_opacity.abs() < f32::EPSILON);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = LlmConfig::new("https://x.test/v1", "sk-secret", "gpt-4o");
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
