//! Append-only task history.
//!
//! [`HistoryStore`] is the only memory the model sees across steps. Each
//! prompt replays the whole store through [`HistoryStore::to_prompt`]; the
//! UI receives full snapshots through `HistoryChange` events.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Self-evaluation the model attaches to each action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_previous_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_goal: Option<String>,
}

impl Reflection {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.evaluation_previous_goal.is_none() && self.memory.is_none() && self.next_goal.is_none()
    }
}

/// The single action executed in a step, with its model-visible output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub input: serde_json::Value,
    pub output: String,
}

/// A persisted, model-visible record of something that happened during a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoricalEvent {
    Step {
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reflection: Option<Reflection>,
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<serde_json::Value>,
    },
    /// Context injected from outside the loop, such as a navigation notice.
    Observation { content: String },
    UserTakeover,
    Retry {
        message: String,
        attempt: u32,
        max_attempts: u32,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<serde_json::Value>,
    },
}

impl HistoricalEvent {
    #[must_use]
    pub fn observation(content: impl Into<String>) -> Self {
        Self::Observation {
            content: content.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            raw_response: None,
        }
    }

    #[must_use]
    pub const fn is_step(&self) -> bool {
        matches!(self, Self::Step { .. })
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Ordered log of [`HistoricalEvent`]s for the current task.
#[derive(Clone, Debug, Default)]
pub struct HistoryStore {
    events: Vec<HistoricalEvent>,
}

impl HistoryStore {
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: HistoricalEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[HistoricalEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoricalEvent> {
        self.events.clone()
    }

    /// Number of recorded steps, which is also the index of the next one.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_step()).count()
    }

    /// Render the history for the model.
    ///
    /// Steps become `<step_N>` blocks; everything else is a `<sys>` line.
    /// Action inputs are written as compact JSON so the model sees exactly
    /// what it sent.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event {
                HistoricalEvent::Step {
                    step_index,
                    reflection,
                    action,
                    ..
                } => {
                    let n = step_index + 1;
                    let _ = writeln!(out, "<step_{n}>");
                    if let Some(r) = reflection {
                        if let Some(eval) = &r.evaluation_previous_goal {
                            let _ = writeln!(out, "Evaluation of Previous Step: {eval}");
                        }
                        if let Some(memory) = &r.memory {
                            let _ = writeln!(out, "Memory: {memory}");
                        }
                        if let Some(goal) = &r.next_goal {
                            let _ = writeln!(out, "Next Goal: {goal}");
                        }
                    }
                    let _ = writeln!(out, "Action: {} {}", action.name, action.input);
                    let _ = writeln!(out, "Action Result: {}", action.output);
                    let _ = writeln!(out, "</step_{n}>");
                }
                HistoricalEvent::Observation { content } => {
                    let _ = writeln!(out, "<sys>{content}</sys>");
                }
                HistoricalEvent::UserTakeover => {
                    out.push_str(
                        "<sys>The user took manual control of the page. Its state may have changed.</sys>\n",
                    );
                }
                HistoricalEvent::Retry {
                    message,
                    attempt,
                    max_attempts,
                } => {
                    let _ = writeln!(
                        out,
                        "<sys>Model call failed ({message}), retrying {attempt}/{max_attempts}.</sys>"
                    );
                }
                HistoricalEvent::Error { message, .. } => {
                    let _ = writeln!(out, "<sys>Error: {message}</sys>");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(index: usize, name: &str, input: serde_json::Value, output: &str) -> HistoricalEvent {
        HistoricalEvent::Step {
            step_index: index,
            reflection: None,
            action: Action {
                name: name.to_owned(),
                input,
                output: output.to_owned(),
            },
            raw_response: None,
        }
    }

    #[test]
    fn push_and_clear() {
        let mut store = HistoryStore::new();
        assert!(store.is_empty());

        store.push(step(0, "click_element_by_index", json!({"index": 3}), "Clicked"));
        store.push(HistoricalEvent::observation("navigated"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.step_count(), 1);

        let snapshot = store.snapshot();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn prompt_renders_steps_and_system_lines() {
        let mut store = HistoryStore::new();
        store.push(HistoricalEvent::Step {
            step_index: 0,
            reflection: Some(Reflection {
                evaluation_previous_goal: Some("Start".into()),
                memory: Some("login page open".into()),
                next_goal: Some("click login".into()),
            }),
            action: Action {
                name: "click_element_by_index".into(),
                input: json!({"index": 3}),
                output: "Clicked element 3".into(),
            },
            raw_response: None,
        });
        store.push(HistoricalEvent::observation("Page navigated to /home"));
        store.push(HistoricalEvent::UserTakeover);
        store.push(HistoricalEvent::Retry {
            message: "rate limited".into(),
            attempt: 1,
            max_attempts: 3,
        });

        let prompt = store.to_prompt();
        assert!(prompt.contains("<step_1>"));
        assert!(prompt.contains("Memory: login page open"));
        assert!(prompt.contains(r#"Action: click_element_by_index {"index":3}"#));
        assert!(prompt.contains("Action Result: Clicked element 3"));
        assert!(prompt.contains("</step_1>"));
        assert!(prompt.contains("<sys>Page navigated to /home</sys>"));
        assert!(prompt.contains("manual control"));
        assert!(prompt.contains("retrying 1/3"));
    }

    #[test]
    fn prompt_preserves_action_input_exactly() {
        let input = json!({"index": 7, "text": "héllo \"quoted\"", "nested": {"a": [1, 2.5, null]}});
        let mut store = HistoryStore::new();
        store.push(step(0, "input_text", input.clone(), "ok"));

        let prompt = store.to_prompt();
        let line = prompt
            .lines()
            .find(|l| l.starts_with("Action: "))
            .unwrap();
        let rendered = line.trim_start_matches("Action: input_text ");
        let parsed: serde_json::Value = serde_json::from_str(rendered).unwrap();
        assert_eq!(parsed, input);
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(HistoricalEvent::Retry {
            message: "x".into(),
            attempt: 1,
            max_attempts: 2,
        })
        .unwrap();
        assert_eq!(json["type"], "retry");

        let json = serde_json::to_value(HistoricalEvent::UserTakeover).unwrap();
        assert_eq!(json, json!({"type": "user_takeover"}));

        let json = serde_json::to_value(step(2, "done", json!({}), "")).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step_index"], 2);
        assert!(json.get("raw_response").is_none());
    }
}
