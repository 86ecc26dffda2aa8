//! Prompt construction for one step.
//!
//! Every block is omitted when its content is empty, so a model never sees
//! an empty `<page_instructions>` or `<agent_history>` tag.

use crate::config::{Instructions, Language};
use crate::error::AgentError;
use crate::history::HistoryStore;
use crate::page::BrowserState;
use std::fmt::Write as _;

const SYSTEM_PROMPT_EN: &str = "\
You are an agent that operates a web page on behalf of the user.

Each step you receive the user's request, the history of what you already did, \
and the current state of the page. Interactive elements are listed as \
`[index]<tag attributes>text</tag>`; refer to them by index only.

Rules:
- Call exactly one tool per step. Never answer with plain text.
- Fill `evaluation_previous_goal`, `memory` and `next_goal` to keep track of your progress.
- Only use indices that appear in the current browser state. Indices change after the page changes.
- If an action fails, read the result and try a different approach.
- Scroll to find content that is not in view before giving up.
- Use `ask_user` only when the task cannot continue without the user's input.
- When the task is complete, or cannot be completed, call `done` with a clear answer in `text` \
  and set `success` accordingly.";

const SYSTEM_PROMPT_ZH: &str = "\
你是一个代表用户操作网页的智能体。

每一步你都会收到用户的请求、你已经执行过的历史记录以及页面的当前状态。\
可交互元素以 `[index]<tag attributes>text</tag>` 的形式列出，请只通过 index 引用它们。

规则：
- 每一步只调用一个工具，不要只回复文本。
- 填写 `evaluation_previous_goal`、`memory` 和 `next_goal` 来记录你的进度。
- 只使用当前页面状态中出现的 index，页面变化后 index 也会变化。
- 如果某个操作失败，请阅读结果并换一种方式。
- 放弃之前，先滚动页面寻找不在视野中的内容。
- 只有在没有用户输入就无法继续时才使用 `ask_user`。
- 任务完成或无法完成时，调用 `done`，在 `text` 中给出清晰的答案，并相应设置 `success`。
- 使用中文回复用户。";

#[must_use]
pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::EnUs => SYSTEM_PROMPT_EN,
        Language::ZhCn => SYSTEM_PROMPT_ZH,
    }
}

/// Inputs for [`user_message`], gathered at the start of a step.
pub struct PromptInput<'a> {
    pub task: &'a str,
    pub instructions: &'a Instructions,
    pub history: &'a HistoryStore,
    pub browser_state: &'a BrowserState,
    pub step_index: usize,
    pub max_steps: usize,
}

#[must_use]
pub fn user_message(input: &PromptInput<'_>) -> String {
    let mut out = String::new();

    let system = input
        .instructions
        .system
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let page = input.instructions.resolve_page(&input.browser_state.url);

    if system.is_some() || page.is_some() {
        out.push_str("<instructions>\n");
        if let Some(system) = system {
            let _ = writeln!(out, "<system_instructions>\n{system}\n</system_instructions>");
        }
        if let Some(page) = page {
            let _ = writeln!(out, "<page_instructions>\n{}\n</page_instructions>", page.trim());
        }
        out.push_str("</instructions>\n\n");
    }

    let _ = writeln!(
        out,
        "<agent_state>\n<user_request>\n{}\n</user_request>\n<step_info>Step {} of {} max possible steps</step_info>\n</agent_state>\n",
        input.task.trim(),
        input.step_index + 1,
        input.max_steps
    );

    if !input.history.is_empty() {
        let _ = writeln!(
            out,
            "<agent_history>\n{}</agent_history>\n",
            input.history.to_prompt()
        );
    }

    out.push_str(&browser_state_block(input.browser_state));
    out
}

fn browser_state_block(state: &BrowserState) -> String {
    let mut out = String::from("<browser_state>\n");
    if state.title.is_empty() {
        let _ = writeln!(out, "Current page: {}", state.url);
    } else {
        let _ = writeln!(out, "Current page: [{}]({})", state.title, state.url);
    }

    if state.pixels_above > 0 {
        let _ = writeln!(out, "... {} pixels above ...", state.pixels_above);
    } else {
        out.push_str("[Start of page]\n");
    }

    let tree = state.element_tree.trim();
    if tree.is_empty() {
        out.push_str("No interactive elements found.\n");
    } else {
        let _ = writeln!(out, "{tree}");
    }

    if state.pixels_below > 0 {
        let _ = writeln!(out, "... {} pixels below ...", state.pixels_below);
    } else {
        out.push_str("[End of page]\n");
    }
    out.push_str("</browser_state>");
    out
}

/// User-facing text for a task that ended without `done`.
#[must_use]
pub fn failure_message(language: Language, error: &AgentError) -> String {
    match (language, error) {
        (Language::EnUs, AgentError::UserAborted) => "Task stopped by user.".to_owned(),
        (Language::ZhCn, AgentError::UserAborted) => "任务已被用户终止。".to_owned(),
        (Language::EnUs, AgentError::StepBudgetExhausted { max_steps }) => {
            format!("Step limit reached: the task did not finish within {max_steps} steps.")
        }
        (Language::ZhCn, AgentError::StepBudgetExhausted { max_steps }) => {
            format!("已达到步数上限：任务未能在 {max_steps} 步内完成。")
        }
        (Language::EnUs, other) => format!("Task failed: {other}"),
        (Language::ZhCn, other) => format!("任务失败：{other}"),
    }
}
