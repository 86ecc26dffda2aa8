use super::PageAgent;
use crate::agent_loop::{AgentLoop, AgentState};
use crate::config::{AgentConfig, Instructions, Language, LlmConfig, RetryConfig};
use crate::events::EventEmitter;
use crate::hooks::{AgentHooks, DefaultHooks};
use crate::invocation::ModelInvocationClient;
use crate::llm::{LenientJsonRepair, LlmProvider, RepairStrategy};
use crate::page::PageController;
use crate::page_tools::{ExecuteJavascriptTool, register_defaults};
use crate::providers::OpenAIProvider;
use crate::retry::RetryPolicy;
use crate::tools::{Tool, ToolRegistry};
use crate::user_interaction::{AskUserTool, UserInputHandler};
use anyhow::{Context, Result, bail};
use std::sync::Arc;

/// Builder for [`PageAgent`].
///
/// A page and either a provider or an [`LlmConfig`] are required; everything
/// else has a default.
///
/// Tool set, in order of application:
/// 1. the built-in page tools
/// 2. `ask_user`, only when [`user_input`](Self::user_input) is set
/// 3. `execute_javascript`, only when enabled
/// 4. tools added with [`tool`](Self::tool), replacing same-named ones
/// 5. removals from [`remove_tool`](Self::remove_tool)
pub struct PageAgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    llm_config: Option<LlmConfig>,
    page: Option<Arc<dyn PageController>>,
    config: AgentConfig,
    custom_tools: ToolRegistry,
    removed_tools: Vec<String>,
    user_input: Option<Arc<dyn UserInputHandler>>,
    hooks: Arc<dyn AgentHooks>,
    repair: Arc<dyn RepairStrategy>,
    javascript_tool: bool,
}

impl Default for PageAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAgentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: None,
            llm_config: None,
            page: None,
            config: AgentConfig::default(),
            custom_tools: ToolRegistry::new(),
            removed_tools: Vec::new(),
            user_input: None,
            hooks: Arc::new(DefaultHooks),
            repair: Arc::new(LenientJsonRepair),
            javascript_tool: false,
        }
    }

    /// Use a ready-made provider. Takes precedence over [`llm_config`](Self::llm_config).
    #[must_use]
    pub fn provider<P: LlmProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn shared_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Connect to an OpenAI-compatible endpoint. Its `max_retries` replaces
    /// the retry budget of the agent config.
    #[must_use]
    pub fn llm_config(mut self, config: LlmConfig) -> Self {
        self.llm_config = Some(config);
        self
    }

    #[must_use]
    pub fn page(mut self, page: Arc<dyn PageController>) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    #[must_use]
    pub const fn language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: Instructions) -> Self {
        self.config.instructions = instructions;
        self
    }

    #[must_use]
    pub const fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub const fn include_raw_response(mut self, include: bool) -> Self {
        self.config.include_raw_response = include;
        self
    }

    /// Add a tool, or replace a built-in one with the same name.
    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.custom_tools.register(tool);
        self
    }

    /// Remove a tool from both dispatch and the schemas offered to the model.
    #[must_use]
    pub fn remove_tool(mut self, name: impl Into<String>) -> Self {
        self.removed_tools.push(name.into());
        self
    }

    /// Answer `ask_user` questions with this handler. Without one the tool
    /// is not offered at all.
    #[must_use]
    pub fn user_input(mut self, handler: Arc<dyn UserInputHandler>) -> Self {
        self.user_input = Some(handler);
        self
    }

    #[must_use]
    pub fn hooks<H: AgentHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    #[must_use]
    pub fn repair_strategy<R: RepairStrategy + 'static>(mut self, repair: R) -> Self {
        self.repair = Arc::new(repair);
        self
    }

    /// Offer the experimental `execute_javascript` tool.
    #[must_use]
    pub const fn enable_javascript_tool(mut self, enable: bool) -> Self {
        self.javascript_tool = enable;
        self
    }

    /// # Errors
    /// Returns an error if no page or no model endpoint was given, if the
    /// step budget is zero, or if the HTTP provider cannot be built.
    pub fn build(self) -> Result<PageAgent> {
        let page = self.page.context("a page controller is required")?;
        let mut config = self.config;
        if config.max_steps == 0 {
            bail!("max_steps must be at least 1");
        }

        let provider: Arc<dyn LlmProvider> = match (self.provider, &self.llm_config) {
            (Some(provider), _) => provider,
            (None, Some(llm)) => Arc::new(OpenAIProvider::new(llm)?),
            (None, None) => bail!("either a provider or an LLM config is required"),
        };
        if let Some(llm) = &self.llm_config {
            config.retry.max_retries = llm.max_retries;
        }

        let mut registry = ToolRegistry::new();
        register_defaults(&mut registry);
        if let Some(handler) = self.user_input {
            registry.register(AskUserTool::new(handler));
        }
        if self.javascript_tool {
            registry.register(ExecuteJavascriptTool);
        }
        for tool in self.custom_tools.all() {
            registry.register_erased(tool.clone());
        }
        for name in &self.removed_tools {
            if !registry.remove(name) {
                log::warn!("remove_tool: no tool named '{name}'");
            }
        }
        if registry.is_empty() {
            bail!("every tool was removed; the model would have nothing to call");
        }

        log::debug!(
            "Building agent (model={}, tools=[{}])",
            provider.model(),
            registry.names().join(", ")
        );

        let emitter = Arc::new(EventEmitter::new(self.hooks.clone()));
        Ok(PageAgent::from_loop(AgentLoop {
            client: ModelInvocationClient::new(provider, self.repair),
            retry: RetryPolicy::new(config.retry.clone()),
            registry,
            page,
            emitter,
            hooks: self.hooks,
            config,
            state: AgentState::new(),
        }))
    }
}
