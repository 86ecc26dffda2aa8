//! Live model example.
//!
//! Sends a task to a real OpenAI-compatible endpoint and lets the model drive
//! an in-memory login form. Press Ctrl-C to stop the task.
//!
//! # Running
//!
//! ```bash
//! PAGE_AGENT_API_KEY=your_key cargo run --example live_task
//! ```
//!
//! `PAGE_AGENT_BASE_URL` and `PAGE_AGENT_MODEL` select another gateway or
//! model. To see the prompts sent on every step:
//! ```bash
//! RUST_LOG=page_agent=debug PAGE_AGENT_API_KEY=your_key cargo run --example live_task
//! ```

use futures::FutureExt;
use page_agent::user_interaction::{CallbackUserInput, QuestionResponse};
use page_agent::{
    AgentActivity, AgentEvent, HistoricalEvent, InMemoryPage, Instructions, LlmConfig, PageAgent,
    PageElement,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let llm = LlmConfig::from_env()?;
    println!("Using {} at {}\n", llm.model, llm.base_url);

    let page = Arc::new(
        InMemoryPage::new("https://accounts.test/login")
            .with_title("Sign in")
            .with_element(
                PageElement::new("input")
                    .attr("type", "email")
                    .attr("placeholder", "Email"),
            )
            .with_element(
                PageElement::new("input")
                    .attr("type", "password")
                    .attr("placeholder", "Password"),
            )
            .with_element(PageElement::new("button").text("Sign in"))
            .with_element(PageElement::new("a").text("Forgot password?").attr("href", "/reset")),
    );

    // Answer any question with a fixed reply so the demo runs unattended.
    let answers = CallbackUserInput::new(|request| {
        async move {
            println!("[ask_user] {}", request.question);
            Ok::<_, anyhow::Error>(QuestionResponse::success("Use demo@example.com"))
        }
        .boxed()
    });

    let agent = Arc::new(
        PageAgent::builder()
            .llm_config(llm)
            .page(page.clone())
            .max_steps(10)
            .instructions(
                Instructions::default()
                    .system("Never submit a form without filling every visible field.")
                    .page(|url| {
                        url.contains("/login")
                            .then(|| "The password for the demo account is hunter2.".to_owned())
                    }),
            )
            .user_input(Arc::new(answers))
            .build()?,
    );

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                AgentEvent::Activity { activity } => match activity {
                    AgentActivity::Thinking => println!("[thinking]"),
                    AgentActivity::Executed {
                        tool,
                        input,
                        output,
                        duration_ms,
                    } => println!("[{tool}] {input} -> {output} ({duration_ms}ms)"),
                    AgentActivity::Retrying {
                        attempt,
                        max_attempts,
                    } => println!("[retry {attempt}/{max_attempts}]"),
                    AgentActivity::Error { message } => eprintln!("[error] {message}"),
                    AgentActivity::Executing { .. } => {}
                },
                AgentEvent::Dispose => break,
                _ => {}
            }
        }
    });

    let stopper = {
        let agent = agent.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                agent.stop();
            }
        })
    };

    let result = agent
        .execute("Sign in with the demo account")
        .await?;
    stopper.abort();

    println!("\n---");
    println!("success: {}", result.success);
    println!("result:  {}", result.data);
    if let Some(kind) = result.error {
        println!("error:   {kind:?}");
    }
    for event in &result.history {
        if let HistoricalEvent::Step {
            step_index,
            reflection,
            action,
            ..
        } = event
        {
            let goal = reflection
                .as_ref()
                .and_then(|r| r.next_goal.as_deref())
                .unwrap_or("-");
            println!("step {}: {} (next goal: {goal})", step_index + 1, action.name);
        }
    }
    println!(
        "tokens: {} input ({} cached) / {} output",
        result.usage.input_tokens, result.usage.cached_tokens, result.usage.output_tokens
    );

    agent.dispose().await;
    Ok(())
}
