//! Scripted agent example.
//!
//! Runs a full task against an in-memory page without any network access.
//! The "model" is a fixed script of tool calls, and the page sits behind a
//! channel transport the way a content script would sit behind extension
//! messaging.
//!
//! # Running
//!
//! ```bash
//! cargo run --example scripted_task
//! ```
//!
//! To see debug logs from the agent:
//! ```bash
//! RUST_LOG=page_agent=debug cargo run --example scripted_task
//! ```

use async_trait::async_trait;
use page_agent::llm::{ChatOutcome, ChatRequest, ChatResponse, ContentBlock, StopReason};
use page_agent::transport::{ChannelTransport, RemotePage};
use page_agent::{
    AgentActivity, AgentEvent, InMemoryPage, LlmProvider, LoggingHooks, PageAgent, PageElement,
    TokenUsage,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays a fixed list of tool calls, one per step.
struct ScriptedProvider {
    script: Mutex<VecDeque<(&'static str, Value)>>,
}

impl ScriptedProvider {
    fn new(script: Vec<(&'static str, Value)>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _request: ChatRequest) -> anyhow::Result<ChatOutcome> {
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow::anyhow!("script lock poisoned"))?
            .pop_front();
        let Some((name, input)) = next else {
            anyhow::bail!("script exhausted");
        };
        Ok(ChatOutcome::Success(ChatResponse {
            id: "scripted".to_owned(),
            content: vec![ContentBlock::ToolUse {
                id: format!("call_{name}"),
                name: name.to_owned(),
                input,
            }],
            model: "scripted".to_owned(),
            stop_reason: Some(StopReason::ToolUse),
            usage: TokenUsage {
                input_tokens: 500,
                output_tokens: 40,
                cached_tokens: 0,
            },
            raw: None,
        }))
    }

    fn model(&self) -> &'static str {
        "scripted"
    }

    fn provider(&self) -> &'static str {
        "scripted"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let page = Arc::new(
        InMemoryPage::new("https://shop.test/product/42")
            .with_title("Blue Mug")
            .with_element(PageElement::new("input").attr("name", "quantity"))
            .with_element(
                PageElement::new("select")
                    .attr("name", "color")
                    .options(["Blue", "Green"]),
            )
            .with_element(PageElement::new("button").text("Add to cart")),
    );

    // Serve the page on the far side of a message channel.
    let (transport, endpoint) = ChannelTransport::new(16);
    tokio::spawn(endpoint.serve(page.clone()));

    let provider = ScriptedProvider::new(vec![
        (
            "input_text",
            json!({ "index": 0, "text": "2", "next_goal": "pick a color" }),
        ),
        (
            "select_dropdown_option",
            json!({ "index": 1, "text": "Green" }),
        ),
        (
            "click_element_by_index",
            json!({ "index": 2, "memory": "quantity and color set" }),
        ),
        (
            "done",
            json!({ "text": "Added 2 green mugs to the cart.", "success": true }),
        ),
    ]);

    let agent = PageAgent::builder()
        .provider(provider)
        .page(Arc::new(RemotePage::new(transport)))
        .hooks(LoggingHooks)
        .build()?;

    let mut events = agent.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                AgentEvent::StatusChange { status } => println!("[status] {status}"),
                AgentEvent::Activity {
                    activity: AgentActivity::Executed { tool, output, .. },
                } => println!("[{tool}] {output}"),
                AgentEvent::Dispose => break,
                _ => {}
            }
        }
    });

    let result = agent
        .execute("Add two green mugs to the cart")
        .await?;

    println!("\n---");
    println!("success: {}", result.success);
    println!("result:  {}", result.data);
    println!(
        "steps: {}, tokens: {} input / {} output",
        result.step_count(),
        result.usage.input_tokens,
        result.usage.output_tokens
    );
    println!("page actions: {:?}", page.actions());

    agent.dispose().await;
    printer.await?;
    Ok(())
}
