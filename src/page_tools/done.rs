use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Terminal tool: ends the task with a final answer.
///
/// The result's `data` carries the parsed [`DoneInput`] so the loop can read
/// the success flag without re-parsing the model's arguments.
pub struct DoneTool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneInput {
    pub text: String,
    #[serde(default = "default_success")]
    pub success: bool,
}

const fn default_success() -> bool {
    true
}

impl DoneInput {
    /// Read a `done` result back, falling back to the tool output.
    #[must_use]
    pub fn from_result(result: &ToolResult) -> Self {
        result
            .data
            .clone()
            .and_then(|data| serde_json::from_value(data).ok())
            .unwrap_or_else(|| Self {
                text: result.output.clone(),
                success: result.success,
            })
    }
}

impl Tool for DoneTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::Done
    }

    fn display_name(&self) -> &'static str {
        "Done"
    }

    fn description(&self) -> &'static str {
        "Finish the task. Put the answer or a summary of what was done in `text`. \
         Set `success` to false if the task could not be completed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "success": { "type": "boolean" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: DoneInput =
            serde_json::from_value(input).context("Invalid input for done tool")?;
        let data = serde_json::to_value(&input).context("Failed to encode done result")?;
        let mut result = ToolResult::success_with_data(input.text, data);
        result.success = input.success;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InMemoryPage;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(InMemoryPage::new("https://a.test")))
    }

    #[tokio::test]
    async fn success_defaults_to_true() -> Result<()> {
        let result = DoneTool.execute(&ctx(), json!({"text": "clicked login"})).await?;
        let done = DoneInput::from_result(&result);
        assert!(done.success);
        assert_eq!(done.text, "clicked login");
        assert_eq!(result.output, "clicked login");
        Ok(())
    }

    #[tokio::test]
    async fn failure_flag_is_carried() -> Result<()> {
        let result = DoneTool
            .execute(&ctx(), json!({"text": "no such product", "success": false}))
            .await?;
        assert!(!result.success);
        assert!(!DoneInput::from_result(&result).success);
        Ok(())
    }

    #[test]
    fn from_result_without_data() {
        let done = DoneInput::from_result(&ToolResult::success("finished"));
        assert_eq!(done.text, "finished");
        assert!(done.success);
    }
}
