//! Page Agent - drive a live web page from natural-language tasks.
//!
//! An LLM is shown a serialized view of the page's interactive elements and
//! picks exactly one tool call per step (click, type, scroll, ...) until it
//! calls `done` or the step budget runs out. This crate provides:
//! - The step loop with retries, pause/resume and abort
//! - A typed error taxonomy and a model-visible history
//! - An OpenAI-compatible provider with per-gateway request shaping
//! - The built-in page tools and a registry for custom ones
//! - A [`PageController`] seam, with an in-memory page and a remote adapter
//!
//! # Example
//!
//! ```no_run
//! use page_agent::{InMemoryPage, LlmConfig, PageAgent, PageElement};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let page = InMemoryPage::new("https://shop.test")
//!     .with_element(PageElement::new("button").text("Add to cart"));
//!
//! let agent = PageAgent::builder()
//!     .llm_config(LlmConfig::from_env()?)
//!     .page(Arc::new(page))
//!     .build()?;
//!
//! let mut events = agent.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(envelope) = events.recv().await {
//!         println!("{:?}", envelope.event);
//!     }
//! });
//!
//! let result = agent.execute("Add the item to the cart").await?;
//! println!("success={} data={}", result.success, result.data);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod agent;
mod agent_loop;
mod config;
mod error;
mod events;
mod history;
mod hooks;
pub mod invocation;
pub mod llm;
mod page;
pub mod page_tools;
pub mod providers;
pub mod retry;
mod tools;
pub mod transport;
mod types;
pub mod user_interaction;

pub use agent::{PageAgent, PageAgentBuilder};
pub use config::{
    AgentConfig, DomConfig, Instructions, Language, LlmConfig, PageInstructionsFn, RetryConfig,
};
pub use error::{AgentError, ErrorKind, classify_message, classify_provider_error};
pub use events::{AgentActivity, AgentEvent, AgentEventEnvelope, EventEmitter, SequenceCounter};
pub use history::{Action, HistoricalEvent, HistoryStore, Reflection};
pub use hooks::{AgentHooks, DefaultHooks, LoggingHooks};
pub use llm::LlmProvider;
pub use page::{
    ActionResult, BrowserState, InMemoryPage, PageController, PageElement, ScrollAmount,
    ScrollOptions,
};
pub use tools::{
    DynamicToolName, ErasedTool, PageToolName, Tool, ToolContext, ToolName, ToolRegistry,
    tool_name_from_str, tool_name_to_string, validate_against_schema,
};
pub use types::{AgentStatus, ExecutionResult, TokenUsage, ToolResult};
