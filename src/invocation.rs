//! One model invocation: request, single tool call, repair, validation, dispatch.
//!
//! [`ModelInvocationClient::invoke`] is the unit the retry policy wraps. It
//! either returns exactly one executed action or an [`AgentError`] whose kind
//! tells the policy whether another attempt may help.

use crate::error::{AgentError, classify_provider_error};
use crate::events::{AgentActivity, EventEmitter};
use crate::history::Reflection;
use crate::llm::{self, ChatRequest, ChatResponse, LlmProvider, RepairStrategy, StopReason};
use crate::tools::{PageToolName, ToolContext, ToolRegistry};
use crate::types::{TokenUsage, ToolResult};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const REFLECTION_FIELDS: [(&str, &str); 3] = [
    (
        "evaluation_previous_goal",
        "One-sentence verdict on whether the previous goal succeeded, failed or is unknown.",
    ),
    (
        "memory",
        "What to remember for the rest of the task: progress so far and facts found.",
    ),
    ("next_goal", "The immediate goal this action serves."),
];

/// The tool call chosen by the model, after repair and reflection stripping.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Result of one successful invocation.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub tool_call: ToolCall,
    pub reflection: Option<Reflection>,
    pub tool_result: ToolResult,
    pub usage: TokenUsage,
    pub raw_response: Option<Value>,
}

/// Sends one prompt to the model and executes the single action it returns.
#[derive(Clone)]
pub struct ModelInvocationClient {
    provider: Arc<dyn LlmProvider>,
    repair: Arc<dyn RepairStrategy>,
}

impl ModelInvocationClient {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, repair: Arc<dyn RepairStrategy>) -> Self {
        Self { provider, repair }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Invoke the model once and run the tool it picks.
    ///
    /// Handler failures are not errors here: they come back as a failed
    /// [`ToolResult`] so the model can adapt on the next step.
    ///
    /// The tokens of every reply are added to `spent` as soon as it arrives,
    /// so attempts that fail after the model answered are still counted.
    ///
    /// # Errors
    /// - [`AgentError::UserAborted`] if `cancel` fires while waiting on the model
    /// - the provider outcome mapped onto the taxonomy (auth, rate limit, ...)
    /// - [`AgentError::NoToolCall`] for zero, several, or text-only replies
    /// - [`AgentError::InvalidToolArgs`] for unrepairable or non-conforming arguments
    /// - [`AgentError::ToolExecution`] for a tool name that is not registered
    pub async fn invoke(
        &self,
        request: &ChatRequest,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        spent: &Mutex<TokenUsage>,
    ) -> Result<Invocation, AgentError> {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::UserAborted),
            outcome = self.provider.chat(request.clone()) => {
                outcome.map_err(|e| classify_provider_error(&e))?
            }
        };
        let response = outcome.into_result()?;
        let usage = response.usage;
        spent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(&usage);
        let raw = response.raw.clone();

        let (id, name, raw_input) = self
            .single_tool_call(&response)
            .map_err(|e| e.with_raw_response(raw.clone()))?;

        let tool = registry.get(&name).ok_or_else(|| {
            AgentError::ToolExecution(format!(
                "unknown tool `{name}`; available tools: {}",
                registry.names().join(", ")
            ))
        })?;

        let own_schema = tool.input_schema();
        let schema = with_reflection_fields(own_schema.clone());
        let repaired = self
            .repair
            .repair_arguments(&raw_input, &schema)
            .map_err(|f| {
                AgentError::invalid_tool_args(&name, f.message).with_raw_response(raw.clone())
            })?;
        let (reflection, input) = split_reflection(repaired, &own_schema);
        registry
            .validate(&name, &input)
            .map_err(|e| e.with_raw_response(raw.clone()))?;

        log::debug!("Executing tool '{name}' with input {input}");

        // ask_user has its own UI; no executing/executed frames for it.
        let report = name != PageToolName::AskUser.as_str();
        if report {
            emitter
                .activity(AgentActivity::Executing {
                    tool: name.clone(),
                    input: input.clone(),
                })
                .await;
        }

        let start = Instant::now();
        let result = match tool.execute(ctx, input.clone()).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Tool '{name}' failed: {e:#}");
                ToolResult::error(format!("{e:#}"))
            }
        };
        let duration_ms = millis_to_u64(start.elapsed().as_millis());
        let tool_result = result.with_duration(duration_ms);

        if report {
            emitter
                .activity(AgentActivity::Executed {
                    tool: name.clone(),
                    input: input.clone(),
                    output: tool_result.output.clone(),
                    duration_ms,
                })
                .await;
        }

        Ok(Invocation {
            tool_call: ToolCall { id, name, input },
            reflection,
            tool_result,
            usage,
            raw_response: raw,
        })
    }

    fn single_tool_call(&self, response: &ChatResponse) -> Result<(String, String, Value), AgentError> {
        let calls: Vec<_> = response.tool_uses().collect();
        match calls.as_slice() {
            [(id, name, input)] => Ok(((*id).to_owned(), (*name).to_owned(), (*input).clone())),
            [] => {
                if response.stop_reason == Some(StopReason::ContentFilter) {
                    return Err(AgentError::ContentFiltered(
                        "the provider's safety filter blocked the response".to_owned(),
                    ));
                }
                let text = response.first_text().unwrap_or_default();
                if let Some((name, input)) = self.repair.recover_tool_call(text) {
                    log::debug!(
                        "Recovered tool call '{name}' from a text reply ({} repair)",
                        self.repair.name()
                    );
                    return Ok((format!("{}-recovered", response.id), name, input));
                }
                Err(AgentError::no_tool_call(if text.is_empty() {
                    "the model returned no tool call".to_owned()
                } else {
                    format!("the model replied with text only: {}", truncate(text, 200))
                }))
            }
            many => Err(AgentError::no_tool_call(format!(
                "the model returned {} tool calls ({}); exactly one is allowed per step",
                many.len(),
                many.iter().map(|(_, n, _)| *n).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// Tool definitions offered to the model: every registered tool, each
/// schema extended with the optional reflection fields.
#[must_use]
pub fn offered_tools(registry: &ToolRegistry) -> Vec<llm::Tool> {
    registry
        .to_llm_tools()
        .into_iter()
        .map(|mut tool| {
            tool.input_schema = with_reflection_fields(tool.input_schema);
            tool
        })
        .collect()
}

/// Add the optional reflection properties to an object schema.
#[must_use]
pub fn with_reflection_fields(mut schema: Value) -> Value {
    let Some(obj) = schema.as_object_mut() else {
        return schema;
    };
    let props = obj
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(props) = props {
        for (field, description) in REFLECTION_FIELDS {
            props.entry(field).or_insert_with(|| {
                serde_json::json!({ "type": "string", "description": description })
            });
        }
    }
    schema
}

/// Lift the reflection fields out of the arguments.
///
/// A field the tool declares itself belongs to the tool and is left in place.
fn split_reflection(input: Value, own_schema: &Value) -> (Option<Reflection>, Value) {
    let Value::Object(mut map) = input else {
        return (None, input);
    };
    let own = own_schema.get("properties").and_then(Value::as_object);
    let mut take = |key: &str| {
        if own.is_some_and(|props| props.contains_key(key)) {
            return None;
        }
        map.remove(key).and_then(|v| match v {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    };
    let reflection = Reflection {
        evaluation_previous_goal: take("evaluation_previous_goal"),
        memory: take("memory"),
        next_goal: take("next_goal"),
    };
    let reflection = (!reflection.is_empty()).then_some(reflection);
    (reflection, Value::Object(map))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::test_utils::{MockProvider, text_response, tool_response};
    use crate::error::ErrorKind;
    use crate::hooks::DefaultHooks;
    use crate::llm::{ChatOutcome, LenientJsonRepair, Message, StrictJson};
    use crate::page::{InMemoryPage, PageElement};
    use crate::page_tools::default_registry;
    use serde_json::json;

    struct Fixture {
        page: Arc<InMemoryPage>,
        registry: ToolRegistry,
        emitter: EventEmitter,
        cancel: CancellationToken,
        spent: Mutex<TokenUsage>,
    }

    impl Fixture {
        fn new() -> Self {
            let page = Arc::new(
                InMemoryPage::new("https://shop.test")
                    .with_element(PageElement::new("button").text("Login")),
            );
            Self {
                page,
                registry: default_registry(),
                emitter: EventEmitter::new(Arc::new(DefaultHooks)),
                cancel: CancellationToken::new(),
                spent: Mutex::new(TokenUsage::default()),
            }
        }

        fn ctx(&self) -> ToolContext {
            ToolContext::new(self.page.clone()).with_cancel(self.cancel.clone())
        }

        async fn invoke(
            &self,
            outcomes: Vec<ChatOutcome>,
            repair: Arc<dyn RepairStrategy>,
        ) -> Result<Invocation, AgentError> {
            let client = ModelInvocationClient::new(Arc::new(MockProvider::new(outcomes)), repair);
            client
                .invoke(
                    &request(),
                    &self.registry,
                    &self.ctx(),
                    &self.emitter,
                    &self.cancel,
                    &self.spent,
                )
                .await
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            system: String::new(),
            messages: vec![Message::user("click login")],
            tools: None,
            max_tokens: 256,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn executes_single_tool_call_and_lifts_reflection() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let mut events = fx.emitter.subscribe();
        let invocation = fx
            .invoke(
                vec![tool_response(
                    "click_element_by_index",
                    json!({"index": 0, "next_goal": "open login form", "memory": ""}),
                )],
                Arc::new(LenientJsonRepair),
            )
            .await?;

        assert_eq!(invocation.tool_call.name, "click_element_by_index");
        assert_eq!(invocation.tool_call.input, json!({"index": 0}));
        assert_eq!(
            invocation.reflection,
            Some(Reflection {
                next_goal: Some("open login form".into()),
                ..Reflection::default()
            })
        );
        assert!(invocation.tool_result.success);
        assert!(invocation.tool_result.duration_ms.is_some());
        assert_eq!(fx.page.actions(), vec!["click:0".to_owned()]);

        let first = events.recv().await?;
        assert!(matches!(
            first.event,
            crate::events::AgentEvent::Activity { activity: AgentActivity::Executing { .. } }
        ));
        let second = events.recv().await?;
        assert!(matches!(
            second.event,
            crate::events::AgentEvent::Activity { activity: AgentActivity::Executed { .. } }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn text_only_reply_is_no_tool_call() {
        let fx = Fixture::new();
        let err = fx
            .invoke(vec![text_response("I will click it.")], Arc::new(LenientJsonRepair))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoToolCall);
        assert!(err.raw_response().is_some());
    }

    #[tokio::test]
    async fn text_with_embedded_call_is_recovered() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let invocation = fx
            .invoke(
                vec![text_response(
                    r#"{"name": "done", "input": {"text": "finished", "success": true}}"#,
                )],
                Arc::new(LenientJsonRepair),
            )
            .await?;
        assert_eq!(invocation.tool_call.name, "done");
        assert!(invocation.tool_result.success);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_tool_calls_are_rejected() {
        let fx = Fixture::new();
        let outcome = crate::agent_loop::test_utils::multi_tool_response(vec![
            ("click_element_by_index", json!({"index": 0})),
            ("done", json!({"text": "x"})),
        ]);
        let err = fx
            .invoke(vec![outcome], Arc::new(LenientJsonRepair))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoToolCall);
        assert!(err.to_string().contains("2 tool calls"));
        assert!(fx.page.actions().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_depend_on_strategy() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let malformed = || tool_response("click_element_by_index", json!("{\"index\": \"0\",}"));

        let err = fx
            .invoke(vec![malformed()], Arc::new(StrictJson))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToolArgs);

        let invocation = fx.invoke(vec![malformed()], Arc::new(LenientJsonRepair)).await?;
        assert_eq!(invocation.tool_call.input, json!({"index": 0}));
        Ok(())
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_tool_args() {
        let fx = Fixture::new();
        let err = fx
            .invoke(
                vec![tool_response("input_text", json!({"index": 0}))],
                Arc::new(LenientJsonRepair),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToolArgs);
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn rejected_reply_still_counts_its_tokens() {
        let fx = Fixture::new();
        let err = fx
            .invoke(vec![text_response("no tool today")], Arc::new(StrictJson))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoToolCall);
        let spent = *fx.spent.lock().unwrap();
        assert_eq!(spent.input_tokens, 10);
        assert_eq!(spent.output_tokens, 20);
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_execution_error() {
        let fx = Fixture::new();
        let err = fx
            .invoke(
                vec![tool_response("teleport", json!({}))],
                Arc::new(LenientJsonRepair),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
    }

    #[tokio::test]
    async fn handler_failure_is_a_failed_result_not_an_error() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let invocation = fx
            .invoke(
                vec![tool_response("click_element_by_index", json!({"index": 42}))],
                Arc::new(LenientJsonRepair),
            )
            .await?;
        assert!(!invocation.tool_result.success);
        assert!(!invocation.tool_result.output.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn content_filter_without_call_is_terminal() {
        let fx = Fixture::new();
        let err = fx
            .invoke(
                vec![crate::agent_loop::test_utils::filtered_response()],
                Arc::new(LenientJsonRepair),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentFiltered);
    }

    #[tokio::test]
    async fn cancelled_before_reply_is_user_aborted() {
        let fx = Fixture::new();
        fx.cancel.cancel();
        let err = fx
            .invoke(
                vec![tool_response("done", json!({"text": "x"}))],
                Arc::new(LenientJsonRepair),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserAborted);
    }

    #[test]
    fn offered_schemas_carry_reflection_fields() {
        let tools = offered_tools(&default_registry());
        let click = tools
            .iter()
            .find(|t| t.name == "click_element_by_index")
            .unwrap();
        let props = click.input_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("index"));
        assert!(props.contains_key("evaluation_previous_goal"));
        assert!(props.contains_key("memory"));
        assert!(props.contains_key("next_goal"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
