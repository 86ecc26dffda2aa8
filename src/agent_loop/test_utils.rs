use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, ContentBlock, LlmProvider, StopReason};
use crate::tools::{DynamicToolName, Tool, ToolContext};
use crate::types::{TokenUsage, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ===================
// Mock LLM Provider
// ===================

/// What the mock does once its script runs out.
pub enum Fallback {
    /// Fail with an unscripted-call error
    Error,
    /// Keep answering with this tool call
    Repeat(&'static str, Value),
    /// Never answer
    Hang,
}

pub struct MockProvider {
    responses: Mutex<VecDeque<ChatOutcome>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
    fallback: Fallback,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            fallback: Fallback::Error,
        }
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Tool names offered on the `n`th call.
    pub fn offered_tools(&self, n: usize) -> Vec<String> {
        self.requests()[n]
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    /// The user message of the `n`th call.
    pub fn prompt(&self, n: usize) -> String {
        self.requests()[n].messages[0].content.clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.requests.lock().unwrap().push(request);
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(outcome) => Ok(outcome),
            None => match &self.fallback {
                Fallback::Error => anyhow::bail!("no scripted response left"),
                Fallback::Repeat(name, input) => Ok(tool_response(name, input.clone())),
                Fallback::Hang => std::future::pending().await,
            },
        }
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

// ===================
// Scripted responses
// ===================

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 10,
        output_tokens: 20,
        cached_tokens: 4,
    }
}

fn response(content: Vec<ContentBlock>, stop_reason: StopReason) -> ChatOutcome {
    let raw = json!({ "mock": true, "blocks": content.len() });
    ChatOutcome::Success(ChatResponse {
        id: "msg_1".to_owned(),
        content,
        model: "mock-model".to_owned(),
        stop_reason: Some(stop_reason),
        usage: usage(),
        raw: Some(raw),
    })
}

pub fn tool_response(name: &str, input: Value) -> ChatOutcome {
    multi_tool_response(vec![(name, input)])
}

pub fn multi_tool_response(calls: Vec<(&str, Value)>) -> ChatOutcome {
    let content = calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, input))| ContentBlock::ToolUse {
            id: format!("call_{i}"),
            name: name.to_owned(),
            input,
        })
        .collect();
    response(content, StopReason::ToolUse)
}

pub fn text_response(text: &str) -> ChatOutcome {
    response(
        vec![ContentBlock::Text {
            text: text.to_owned(),
        }],
        StopReason::EndTurn,
    )
}

pub fn filtered_response() -> ChatOutcome {
    response(Vec::new(), StopReason::ContentFilter)
}

pub fn done(text: &str) -> ChatOutcome {
    tool_response("done", json!({ "text": text, "success": true }))
}

pub fn click(index: u32) -> ChatOutcome {
    tool_response("click_element_by_index", json!({ "index": index }))
}

// ===================
// Test tools
// ===================

/// Counts executions and echoes its input.
pub struct CountingTool {
    pub calls: std::sync::Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new() -> (Self, std::sync::Arc<AtomicUsize>) {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Tool for CountingTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("count")
    }

    fn display_name(&self) -> &'static str {
        "Count"
    }

    fn description(&self) -> &'static str {
        "Count invocations"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolResult::success(format!("count={n} input={input}")))
    }
}

/// Always fails inside the handler.
pub struct BrokenTool;

impl Tool for BrokenTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("broken")
    }

    fn display_name(&self) -> &'static str {
        "Broken"
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _ctx: &ToolContext, _input: Value) -> Result<ToolResult> {
        anyhow::bail!("element is detached from the document")
    }
}

/// Takes a required `memory` argument of its own and records what it was given.
pub struct NoteTool {
    pub notes: std::sync::Arc<Mutex<Vec<String>>>,
}

impl NoteTool {
    pub fn new() -> (Self, std::sync::Arc<Mutex<Vec<String>>>) {
        let notes = std::sync::Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                notes: notes.clone(),
            },
            notes,
        )
    }
}

impl Tool for NoteTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("save_note")
    }

    fn display_name(&self) -> &'static str {
        "Save note"
    }

    fn description(&self) -> &'static str {
        "Save a note for later"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "memory": { "type": "string" } },
            "required": ["memory"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let note = input["memory"].as_str().unwrap_or_default().to_owned();
        self.notes.lock().unwrap().push(note.clone());
        Ok(ToolResult::success(format!("saved: {note}")))
    }
}
